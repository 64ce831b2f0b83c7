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

//! Volatile block store.
//!
//! Backs the test suite and short-lived embedders. Durability is obviously
//! not provided; everything else behaves exactly like the persistent
//! backend.

use crate::{
    base::schema::{ArchivedBlock, Block},
    db::BlockStore,
    Error, ErrorKind, Result,
};
use std::collections::{BTreeMap, HashMap};

/// In-memory implementation of the block tables.
#[derive(Default)]
pub struct MemoryStore {
    blocks: BTreeMap<u64, Block>,
    hashes: HashMap<String, u64>,
    archive: BTreeMap<u64, ArchivedBlock>,
    last_pruning: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl BlockStore for MemoryStore {
    fn last_index(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }

    fn get(&self, index: u64) -> Option<Block> {
        self.blocks.get(&index).cloned()
    }

    fn range(&self, lo: u64, hi: u64) -> Vec<Block> {
        self.blocks.range(lo..hi).map(|(_, b)| b.clone()).collect()
    }

    fn count(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn insert(&mut self, block: &Block) -> Result<()> {
        if self.blocks.contains_key(&block.index) {
            return Err(Error::new_ext(
                ErrorKind::DuplicateIndex,
                format!("index {} already stored", block.index),
            ));
        }
        if let Some(owner) = self.hashes.get(&block.hash) {
            if *owner != block.index {
                return Err(Error::new_ext(
                    ErrorKind::HashCollision,
                    format!("hash already stored at index {}", owner),
                ));
            }
        }
        self.hashes.insert(block.hash.clone(), block.index);
        self.blocks.insert(block.index, block.clone());
        Ok(())
    }

    fn delete_above(&mut self, index: u64) -> Result<()> {
        let removed: Vec<u64> = self
            .blocks
            .range((index + 1)..)
            .map(|(i, _)| *i)
            .collect();
        for i in removed {
            if let Some(block) = self.blocks.remove(&i) {
                self.hashes.remove(&block.hash);
            }
        }
        Ok(())
    }

    fn archive_below(&mut self, index: u64, archived_at: u64) -> Result<u64> {
        let moved: Vec<u64> = self.blocks.range(..index).map(|(i, _)| *i).collect();
        for i in &moved {
            if let Some(block) = self.blocks.remove(i) {
                self.hashes.remove(&block.hash);
                self.archive.insert(*i, ArchivedBlock { block, archived_at });
            }
        }
        Ok(moved.len() as u64)
    }

    fn restore_all(&mut self) -> Result<u64> {
        let restored = self.archive.len() as u64;
        for (index, archived) in std::mem::take(&mut self.archive) {
            self.hashes.insert(archived.block.hash.clone(), index);
            self.blocks.insert(index, archived.block);
        }
        Ok(restored)
    }

    fn archive_get(&self, index: u64) -> Option<ArchivedBlock> {
        self.archive.get(&index).cloned()
    }

    fn archive_search(&self, pattern: &str) -> Vec<ArchivedBlock> {
        self.archive
            .values()
            .filter(|row| row.block.data.contains(pattern))
            .cloned()
            .collect()
    }

    fn archive_compact_older_than(&mut self, threshold: u64) -> Result<u64> {
        let before = self.archive.len();
        self.archive.retain(|_, row| row.archived_at >= threshold);
        Ok((before - self.archive.len()) as u64)
    }

    fn archive_count(&self) -> u64 {
        self.archive.len() as u64
    }

    fn last_pruning(&self) -> Option<u64> {
        self.last_pruning
    }

    fn set_last_pruning(&mut self, timestamp: u64) -> Result<()> {
        self.last_pruning = Some(timestamp);
        Ok(())
    }
}
