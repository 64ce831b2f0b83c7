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

//! Chain engine.
//!
//! Wraps the block store with the semantic chain operations. The store's
//! write lock is the single chain-writer lock: `append`, `adopt`, `replace`
//! and the pruning migration are mutually exclusive, while readers take
//! consistent snapshots. No network I/O ever happens under the lock.

use crate::{
    base::{
        schema::{utc_now_iso, Block, SensorRecord},
        RwLock,
    },
    db::BlockStore,
    Error, ErrorKind, Result,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Chain engine over a block store.
pub struct Chain<S: BlockStore> {
    /// Persistent storage. The write side is the chain-writer lock.
    store: Arc<RwLock<S>>,
    /// Latched on detected corruption; rejects further appends.
    poisoned: Arc<AtomicBool>,
}

impl<S: BlockStore> Clone for Chain<S> {
    fn clone(&self) -> Self {
        Chain {
            store: self.store.clone(),
            poisoned: self.poisoned.clone(),
        }
    }
}

impl<S: BlockStore> Chain<S> {
    pub fn new(store: Arc<RwLock<S>>) -> Self {
        Chain {
            store,
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a shared reference to the store.
    pub fn store_arc(&self) -> Arc<RwLock<S>> {
        self.store.clone()
    }

    /// Insert the canonical genesis block if the store is empty.
    pub fn init(&self) -> Result<()> {
        let mut store = self.store.write();
        if store.last_index().is_none() {
            let genesis = Block::genesis();
            info!("Initializing chain with genesis block {}", genesis.hash);
            store.insert(&genesis)?;
        }
        Ok(())
    }

    /// The tip of the chain.
    pub fn latest(&self) -> Result<Block> {
        let store = self.store.read();
        let index = store
            .last_index()
            .ok_or_else(|| Error::new_ext(ErrorKind::ChainInconsistency, "empty chain"))?;
        store
            .get(index)
            .ok_or_else(|| Error::new_ext(ErrorKind::ChainInconsistency, "missing tip block"))
    }

    /// Number of blocks in the visible chain.
    pub fn len(&self) -> u64 {
        self.store.read().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once corruption has been detected.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Relaxed)
    }

    /// Append a sensor record as a new block and return it.
    pub fn append(&self, record: &SensorRecord) -> Result<Block> {
        if self.is_poisoned() {
            return Err(Error::new_ext(
                ErrorKind::ChainInconsistency,
                "appends disabled on corrupted chain",
            ));
        }
        record.validate()?;
        let data = record.to_data()?;

        let mut store = self.store.write();
        let tip_index = store
            .last_index()
            .ok_or_else(|| Error::new_ext(ErrorKind::ChainInconsistency, "empty chain"))?;
        let tip = store
            .get(tip_index)
            .ok_or_else(|| Error::new_ext(ErrorKind::ChainInconsistency, "missing tip block"))?;

        let block = Block::next(&tip, data, utc_now_iso());
        if !block.verify_hash() || !block.links_to(&tip) {
            return Err(Error::new_ext(
                ErrorKind::InvalidBlockHash,
                "freshly built block failed self-check",
            ));
        }
        store.insert(&block)?;
        debug!("Appended block {} ({})", block.index, block.hash);
        Ok(block)
    }

    /// Adopt a block produced by a peer as the new tip.
    ///
    /// The block must be the immediate successor of the current tip.
    pub fn adopt(&self, block: &Block) -> Result<()> {
        if !block.verify_hash() {
            return Err(Error::new_ext(
                ErrorKind::InvalidBlockHash,
                "block hash does not match contents",
            ));
        }

        let mut store = self.store.write();
        let tip_index = store
            .last_index()
            .ok_or_else(|| Error::new_ext(ErrorKind::ChainInconsistency, "empty chain"))?;
        if block.index <= tip_index {
            return Err(Error::new_ext(
                ErrorKind::DuplicateIndex,
                format!("block {} already covered by tip {}", block.index, tip_index),
            ));
        }
        let tip = store
            .get(tip_index)
            .ok_or_else(|| Error::new_ext(ErrorKind::ChainInconsistency, "missing tip block"))?;
        if !block.links_to(&tip) {
            return Err(Error::new_ext(
                ErrorKind::InvalidSequence,
                format!(
                    "block {} does not extend tip {} ({})",
                    block.index, tip.index, tip.hash
                ),
            ));
        }
        store.insert(block)?;
        debug!("Adopted block {} ({})", block.index, block.hash);
        Ok(())
    }

    /// Atomically replace the suffix diverging from `candidate`.
    ///
    /// The candidate is expected to be fully validated by the caller and to
    /// share the local genesis. The common prefix stays untouched; on a
    /// storage fault the previous suffix is put back so the local chain is
    /// left intact.
    pub fn replace(&self, candidate: &[Block]) -> Result<()> {
        let first = candidate
            .first()
            .ok_or_else(|| Error::new_ext(ErrorKind::InvalidSequence, "empty candidate chain"))?;
        if *first != Block::genesis() {
            return Err(Error::new_ext(
                ErrorKind::InvalidSequence,
                "candidate genesis differs from local genesis",
            ));
        }

        let mut store = self.store.write();
        let local = store.range(0, u64::MAX);

        // Highest common prefix; genesis always matches, so fork >= 1.
        let mut fork = 0;
        while fork < local.len() && fork < candidate.len() && local[fork] == candidate[fork] {
            fork += 1;
        }
        if fork == candidate.len() {
            // Candidate is a prefix of the local chain, nothing to adopt.
            return Ok(());
        }
        let fork_index = candidate[fork].index;

        store.delete_above(fork_index.saturating_sub(1))?;
        for block in &candidate[fork..] {
            if let Err(err) = store.insert(block) {
                error!(
                    "Chain replacement aborted at block {}: {}",
                    block.index,
                    err.to_string_full()
                );
                // Roll the old suffix back, best effort.
                let _ = store.delete_above(fork_index.saturating_sub(1));
                for old in &local[fork..] {
                    let _ = store.insert(old);
                }
                return Err(err);
            }
        }
        info!(
            "Chain replaced from index {} (new length {})",
            fork_index,
            candidate.len()
        );
        Ok(())
    }

    /// Stream the ordered chain, re-verifying its invariants on the fly.
    ///
    /// A violation marks the chain poisoned: this should be impossible in
    /// normal operation and signals on-disk corruption.
    pub fn get_chain(&self) -> Result<Vec<Block>> {
        let store = self.store.read();
        let blocks = store.range(0, u64::MAX);
        drop(store);

        for block in &blocks {
            if !block.verify_hash() {
                return self.poison(block.index, "block hash mismatch");
            }
        }
        for pair in blocks.windows(2) {
            if !pair[1].links_to(&pair[0]) {
                return self.poison(pair[1].index, "broken chain link");
            }
        }
        Ok(blocks)
    }

    fn poison(&self, index: u64, what: &str) -> Result<Vec<Block>> {
        self.poisoned.store(true, Ordering::Relaxed);
        error!(
            "CHAIN CORRUPTION at index {}: {}. Appends disabled, operator intervention required",
            index, what
        );
        Err(Error::new_ext(
            ErrorKind::ChainInconsistency,
            format!("{} at index {}", what, index),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::{create_test_chain, create_test_record};
    use crate::db::{MemoryStore, MockBlockStore};

    fn create_test_engine() -> Chain<MemoryStore> {
        let chain = Chain::new(Arc::new(RwLock::new(MemoryStore::new())));
        chain.init().unwrap();
        chain
    }

    fn engine_with_chain(len: usize) -> Chain<MemoryStore> {
        let engine = create_test_engine();
        {
            let store_arc = engine.store_arc();
            let mut store = store_arc.write();
            for block in create_test_chain(len).into_iter().skip(1) {
                store.insert(&block).unwrap();
            }
        }
        engine
    }

    #[test]
    fn init_inserts_canonical_genesis() {
        let engine = create_test_engine();

        let tip = engine.latest().unwrap();

        assert_eq!(tip, Block::genesis());
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn init_is_idempotent() {
        let engine = create_test_engine();
        engine.init().unwrap();

        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn append_links_to_tip() {
        let engine = create_test_engine();

        let block = engine.append(&create_test_record()).unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.previous_hash, Block::genesis().hash);
        assert!(block.verify_hash());
        assert_eq!(engine.latest().unwrap(), block);
    }

    #[test]
    fn append_rejects_bad_payload() {
        let engine = create_test_engine();
        let mut record = create_test_record();
        record.sensor_id.clear();

        let err = engine.append(&record).unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidPayload);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn adopt_next_block() {
        let engine = create_test_engine();
        let remote = create_test_chain(2);

        engine.adopt(&remote[1]).unwrap();

        assert_eq!(engine.latest().unwrap(), remote[1]);
    }

    #[test]
    fn adopt_rejects_gap_and_duplicate() {
        let engine = create_test_engine();
        let remote = create_test_chain(4);

        let err = engine.adopt(&remote[2]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidSequence);

        let err = engine.adopt(&remote[0]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateIndex);
    }

    #[test]
    fn adopt_rejects_tampered_block() {
        let engine = create_test_engine();
        let mut block = create_test_chain(2)[1].clone();
        block.data = "{}".to_owned();

        let err = engine.adopt(&block).unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidBlockHash);
    }

    #[test]
    fn replace_swaps_diverging_suffix() {
        let engine = create_test_engine();
        engine.append(&create_test_record()).unwrap();
        let remote = create_test_chain(5);

        engine.replace(&remote).unwrap();

        let local = engine.get_chain().unwrap();
        assert_eq!(local, remote);
    }

    #[test]
    fn replace_keeps_common_prefix() {
        let engine = engine_with_chain(3);
        let mut remote = create_test_chain(3);
        let forked = SensorRecord {
            sensor_id: "validator-09".to_owned(),
            value: serde_json::Number::from(7u64),
            timestamp: "2024-02-02T00:00:00.000Z".to_owned(),
        };
        remote.truncate(2);
        let block = Block::next(
            &remote[1].clone(),
            forked.to_data().unwrap(),
            "2024-02-02T00:00:01.000Z".to_owned(),
        );
        remote.push(block.clone());
        let next = Block::next(
            &block,
            forked.to_data().unwrap(),
            "2024-02-02T00:00:02.000Z".to_owned(),
        );
        remote.push(next);

        engine.replace(&remote).unwrap();

        let local = engine.get_chain().unwrap();
        assert_eq!(local.len(), 4);
        assert_eq!(local[..2], create_test_chain(2)[..]);
        assert_eq!(local[2], block);
    }

    #[test]
    fn replace_rejects_foreign_genesis() {
        let engine = create_test_engine();
        let mut remote = create_test_chain(3);
        remote[0].timestamp = "2020-01-01T00:00:00.000Z".to_owned();
        remote[0].hash = remote[0].compute_hash();

        let err = engine.replace(&remote).unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidSequence);
    }

    #[test]
    fn replace_with_prefix_is_noop() {
        let engine = engine_with_chain(5);

        engine.replace(&create_test_chain(3)).unwrap();

        assert_eq!(engine.len(), 5);
    }

    #[test]
    fn get_chain_verifies_invariants() {
        let engine = engine_with_chain(4);

        let chain = engine.get_chain().unwrap();

        assert_eq!(chain.len(), 4);
        assert_eq!(chain, create_test_chain(4));
    }

    #[test]
    fn append_surfaces_storage_faults() {
        let mut store = MockBlockStore::new();
        store.expect_last_index().return_const(Some(0u64));
        store.expect_get().returning(|_| Some(Block::genesis()));
        store
            .expect_insert()
            .returning(|_| Err(Error::new_ext(ErrorKind::StorageError, "disk on fire")));
        let chain = Chain::new(Arc::new(RwLock::new(store)));

        let err = chain.append(&create_test_record()).unwrap_err();

        assert_eq!(err.kind, ErrorKind::StorageError);
    }

    #[test]
    fn corruption_poisons_the_chain() {
        let engine = create_test_engine();
        {
            let store_arc = engine.store_arc();
            let mut store = store_arc.write();
            let mut rogue = create_test_chain(2)[1].clone();
            rogue.index = 5;
            rogue.hash = rogue.compute_hash();
            store.insert(&rogue).unwrap();
        }

        let err = engine.get_chain().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChainInconsistency);
        assert!(engine.is_poisoned());

        let err = engine.append(&create_test_record()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChainInconsistency);
    }
}
