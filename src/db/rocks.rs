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

//! Persistent block store backed by RocksDB.
//!
//! Layout: one column family per table plus a hash uniqueness index and a
//! small metadata family. Rows are the JSON wire form of the block, keyed by
//! big-endian index so that iteration follows chain order. Every write batch
//! is committed with a synchronous WAL flush.

use crate::{
    base::{
        schema::{ArchivedBlock, Block},
        serialize::{json_deserialize, json_serialize},
    },
    db::BlockStore,
    Error, ErrorKind, Result,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::path::Path;

const CF_BLOCKS: &str = "blocks";
const CF_ARCHIVE: &str = "blocks_archive";
const CF_HASHES: &str = "hash_index";
const CF_META: &str = "meta";

const META_LAST_PRUNING: &[u8] = b"last_pruning";

fn index_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

fn key_index(key: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&key[..8]);
    u64::from_be_bytes(buf)
}

fn db_err(err: rocksdb::Error) -> Error {
    Error::new_ext(ErrorKind::StorageError, err)
}

/// Block store implementation using RocksDB.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Create/Open a database from the filesystem.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);

        let descriptors = [CF_BLOCKS, CF_ARCHIVE, CF_HASHES, CF_META]
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&options, path, descriptors).unwrap_or_else(|err| {
            panic!("Error opening rocks-db backend: {}", err);
        });
        RocksStore { db }
    }

    fn cf(&self, name: &str) -> &ColumnFamily {
        self.db
            .cf_handle(name)
            .unwrap_or_else(|| panic!("Missing column family: {}", name))
    }

    fn sync_opts() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    fn write_sync(&self, batch: WriteBatch) -> Result<()> {
        self.db.write_opt(batch, &Self::sync_opts()).map_err(db_err)
    }

    fn get_row<T: serde::de::DeserializeOwned>(&self, cf: &ColumnFamily, key: &[u8]) -> Option<T> {
        match self.db.get_cf(cf, key) {
            Ok(Some(buf)) => json_deserialize(&buf).ok(),
            _ => None,
        }
    }
}

impl BlockStore for RocksStore {
    fn last_index(&self) -> Option<u64> {
        let mut iter = self.db.iterator_cf(self.cf(CF_BLOCKS), IteratorMode::End);
        iter.next()
            .and_then(|item| item.ok())
            .map(|(key, _)| key_index(&key))
    }

    fn get(&self, index: u64) -> Option<Block> {
        self.get_row(self.cf(CF_BLOCKS), &index_key(index))
    }

    fn range(&self, lo: u64, hi: u64) -> Vec<Block> {
        let key = index_key(lo);
        let mode = IteratorMode::From(&key, Direction::Forward);
        self.db
            .iterator_cf(self.cf(CF_BLOCKS), mode)
            .flatten()
            .take_while(|(key, _)| key_index(key) < hi)
            .filter_map(|(_, val)| json_deserialize(&val).ok())
            .collect()
    }

    fn count(&self) -> u64 {
        self.db
            .iterator_cf(self.cf(CF_BLOCKS), IteratorMode::Start)
            .flatten()
            .count() as u64
    }

    fn insert(&mut self, block: &Block) -> Result<()> {
        let blocks = self.cf(CF_BLOCKS);
        let hashes = self.cf(CF_HASHES);
        let key = index_key(block.index);

        if self.db.get_cf(blocks, key).map_err(db_err)?.is_some() {
            return Err(Error::new_ext(
                ErrorKind::DuplicateIndex,
                format!("index {} already stored", block.index),
            ));
        }
        if let Some(owner) = self.db.get_cf(hashes, block.hash.as_bytes()).map_err(db_err)? {
            if key_index(&owner) != block.index {
                return Err(Error::new_ext(
                    ErrorKind::HashCollision,
                    format!("hash already stored at index {}", key_index(&owner)),
                ));
            }
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(blocks, key, json_serialize(block)?);
        batch.put_cf(hashes, block.hash.as_bytes(), key);
        self.write_sync(batch)
    }

    fn delete_above(&mut self, index: u64) -> Result<()> {
        let doomed = self.range(index + 1, u64::MAX);

        let blocks = self.cf(CF_BLOCKS);
        let hashes = self.cf(CF_HASHES);
        let mut batch = WriteBatch::default();
        for block in &doomed {
            batch.delete_cf(blocks, index_key(block.index));
            batch.delete_cf(hashes, block.hash.as_bytes());
        }
        self.write_sync(batch)
    }

    fn archive_below(&mut self, index: u64, archived_at: u64) -> Result<u64> {
        let doomed = self.range(0, index);

        let blocks = self.cf(CF_BLOCKS);
        let hashes = self.cf(CF_HASHES);
        let archive = self.cf(CF_ARCHIVE);
        let mut batch = WriteBatch::default();
        for block in &doomed {
            let row = ArchivedBlock {
                block: block.clone(),
                archived_at,
            };
            batch.put_cf(archive, index_key(block.index), json_serialize(&row)?);
            batch.delete_cf(blocks, index_key(block.index));
            batch.delete_cf(hashes, block.hash.as_bytes());
        }
        self.write_sync(batch)?;
        Ok(doomed.len() as u64)
    }

    fn restore_all(&mut self) -> Result<u64> {
        let rows: Vec<ArchivedBlock> = self
            .db
            .iterator_cf(self.cf(CF_ARCHIVE), IteratorMode::Start)
            .flatten()
            .filter_map(|(_, val)| json_deserialize(&val).ok())
            .collect();

        let blocks = self.cf(CF_BLOCKS);
        let hashes = self.cf(CF_HASHES);
        let archive = self.cf(CF_ARCHIVE);
        let mut batch = WriteBatch::default();
        for row in &rows {
            let key = index_key(row.block.index);
            batch.put_cf(blocks, key, json_serialize(&row.block)?);
            batch.put_cf(hashes, row.block.hash.as_bytes(), key);
            batch.delete_cf(archive, key);
        }
        self.write_sync(batch)?;
        Ok(rows.len() as u64)
    }

    fn archive_get(&self, index: u64) -> Option<ArchivedBlock> {
        self.get_row(self.cf(CF_ARCHIVE), &index_key(index))
    }

    fn archive_search(&self, pattern: &str) -> Vec<ArchivedBlock> {
        self.db
            .iterator_cf(self.cf(CF_ARCHIVE), IteratorMode::Start)
            .flatten()
            .filter_map(|(_, val)| json_deserialize::<ArchivedBlock>(&val).ok())
            .filter(|row| row.block.data.contains(pattern))
            .collect()
    }

    fn archive_compact_older_than(&mut self, threshold: u64) -> Result<u64> {
        let doomed: Vec<u64> = self
            .db
            .iterator_cf(self.cf(CF_ARCHIVE), IteratorMode::Start)
            .flatten()
            .filter_map(|(_, val)| json_deserialize::<ArchivedBlock>(&val).ok())
            .filter(|row| row.archived_at < threshold)
            .map(|row| row.block.index)
            .collect();

        let archive = self.cf(CF_ARCHIVE);
        let mut batch = WriteBatch::default();
        for index in &doomed {
            batch.delete_cf(archive, index_key(*index));
        }
        self.write_sync(batch)?;
        Ok(doomed.len() as u64)
    }

    fn archive_count(&self) -> u64 {
        self.db
            .iterator_cf(self.cf(CF_ARCHIVE), IteratorMode::Start)
            .flatten()
            .count() as u64
    }

    fn last_pruning(&self) -> Option<u64> {
        match self.db.get_cf(self.cf(CF_META), META_LAST_PRUNING) {
            Ok(Some(buf)) if buf.len() == 8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&buf);
                Some(u64::from_be_bytes(bytes))
            }
            _ => None,
        }
    }

    fn set_last_pruning(&mut self, timestamp: u64) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_META), META_LAST_PRUNING, timestamp.to_be_bytes());
        self.write_sync(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_chain;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, RocksStore) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::new(dir.path());
        (dir, store)
    }

    fn populated_store(len: usize) -> (TempDir, RocksStore) {
        let (dir, mut store) = create_test_store();
        for block in create_test_chain(len) {
            store.insert(&block).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn open_empty() {
        let (_dir, store) = create_test_store();

        assert_eq!(store.last_index(), None);
        assert_eq!(store.count(), 0);
        assert_eq!(store.last_pruning(), None);
    }

    #[test]
    fn insert_get_range() {
        let (_dir, store) = populated_store(5);

        assert_eq!(store.last_index(), Some(4));
        assert_eq!(store.count(), 5);
        assert_eq!(store.get(2).unwrap().index, 2);
        assert_eq!(
            store
                .range(1, 4)
                .iter()
                .map(|b| b.index)
                .collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn reopen_persists_rows() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = RocksStore::new(dir.path());
            for block in create_test_chain(3) {
                store.insert(&block).unwrap();
            }
        }
        let store = RocksStore::new(dir.path());

        assert_eq!(store.last_index(), Some(2));
        assert!(store.get(1).unwrap().verify_hash());
    }

    #[test]
    fn uniqueness_violations() {
        let (_dir, mut store) = populated_store(3);
        let chain = create_test_chain(3);

        let err = store.insert(&chain[2]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateIndex);

        let mut twin = chain[2].clone();
        twin.index = 9;
        let err = store.insert(&twin).unwrap_err();
        assert_eq!(err.kind, ErrorKind::HashCollision);
    }

    #[test]
    fn delete_above_suffix() {
        let (_dir, mut store) = populated_store(6);

        store.delete_above(3).unwrap();

        assert_eq!(store.last_index(), Some(3));
        let chain = create_test_chain(6);
        store.insert(&chain[4]).unwrap();
    }

    #[test]
    fn archive_move_and_restore() {
        let (_dir, mut store) = populated_store(10);

        let moved = store.archive_below(8, 1700000000).unwrap();
        assert_eq!(moved, 8);
        assert_eq!(store.count(), 2);
        assert_eq!(store.archive_count(), 8);
        assert!(store.get(0).is_none());
        assert_eq!(store.archive_get(0).unwrap().block.index, 0);

        let restored = store.restore_all().unwrap();
        assert_eq!(restored, 8);
        assert_eq!(store.count(), 10);
        assert_eq!(store.archive_count(), 0);
    }

    #[test]
    fn archive_compaction_by_stamp() {
        let (_dir, mut store) = populated_store(6);
        store.archive_below(3, 100).unwrap();
        store.archive_below(6, 200).unwrap();

        let removed = store.archive_compact_older_than(150).unwrap();

        assert_eq!(removed, 3);
        assert_eq!(store.archive_count(), 3);
    }

    #[test]
    fn last_pruning_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = RocksStore::new(dir.path());
            store.set_last_pruning(424242).unwrap();
        }
        let store = RocksStore::new(dir.path());

        assert_eq!(store.last_pruning(), Some(424242));
    }
}
