// This file is part of SENSA.
//
// Copyright (C) 2023 Affidaty Spa.
//
// SENSA is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// SENSA is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with SENSA. If not, see <https://www.gnu.org/licenses/>.

use crate::base::schema::{ArchivedBlock, Block};
use crate::error::Result;
#[cfg(test)]
use mockall::automock;

pub mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "with-rocksdb")]
pub mod rocks;
#[cfg(feature = "with-rocksdb")]
pub use rocks::RocksStore;

/// Trait providing access to the block tables.
///
/// Two tables are maintained: the main chain keyed by block index and the
/// archive of pruned blocks. Writers are expected to be serialized by the
/// chain engine; implementations only guarantee that each single operation
/// is atomic and, for the persistent backends, durable.
#[cfg_attr(test, automock)]
pub trait BlockStore: Send + Sync + 'static {
    /// Index of the last block of the main table, `None` when empty.
    fn last_index(&self) -> Option<u64>;

    /// Load a block of the main table.
    fn get(&self, index: u64) -> Option<Block>;

    /// Ordered blocks of the main table with `lo <= index < hi`.
    fn range(&self, lo: u64, hi: u64) -> Vec<Block>;

    /// Number of blocks in the main table.
    fn count(&self) -> u64;

    /// Insert a block in the main table.
    ///
    /// Fails with `DuplicateIndex` if the index is taken and with
    /// `HashCollision` if a different block with the same hash exists.
    /// The write is committed before the call returns.
    fn insert(&mut self, block: &Block) -> Result<()>;

    /// Atomically remove all blocks with index greater than `index`.
    /// Used only by chain replacement.
    fn delete_above(&mut self, index: u64) -> Result<()>;

    /// Atomically move all blocks with index lower than `index` to the
    /// archive table, stamped with `archived_at`. Returns the number of
    /// moved blocks.
    fn archive_below(&mut self, index: u64, archived_at: u64) -> Result<u64>;

    /// Move every archived block back into the main table. Returns the
    /// number of restored blocks.
    fn restore_all(&mut self) -> Result<u64>;

    /// Load a block from the archive table.
    fn archive_get(&self, index: u64) -> Option<ArchivedBlock>;

    /// Archived blocks whose `data` contains `pattern`, in index order.
    fn archive_search(&self, pattern: &str) -> Vec<ArchivedBlock>;

    /// Drop archive rows with `archived_at` older than `threshold`.
    /// Returns the number of removed rows.
    fn archive_compact_older_than(&mut self, threshold: u64) -> Result<u64>;

    /// Number of blocks in the archive table.
    fn archive_count(&self) -> u64;

    /// Unix time of the last completed pruning run.
    fn last_pruning(&self) -> Option<u64>;

    /// Record the time of a completed pruning run.
    fn set_last_pruning(&mut self, timestamp: u64) -> Result<()>;
}
