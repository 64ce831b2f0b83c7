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

//! Chain service component in charge of archiving old blocks.
//!
//! Eligible runs move the oldest 80% of the chain into the archive table,
//! stamped with the archival time. The first remaining block keeps its
//! `previousHash` untouched, so the suffix stays linked to the archived
//! prefix. The migration runs under the chain-writer lock.

use super::service::ChainConfig;
use crate::{
    base::{schema::unix_now, RwLock},
    db::BlockStore,
};
use std::sync::Arc;

/// Never prune when the cut point would fall below this index.
const MIN_PRUNE_BELOW: u64 = 100;

/// Archival context data.
pub(crate) struct Pruner<S: BlockStore> {
    /// Persistent storage.
    store: Arc<RwLock<S>>,
    /// Chain service configuration.
    config: Arc<ChainConfig>,
}

impl<S: BlockStore> Clone for Pruner<S> {
    fn clone(&self) -> Self {
        Pruner {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: BlockStore> Pruner<S> {
    pub fn new(store: Arc<RwLock<S>>, config: Arc<ChainConfig>) -> Self {
        Self { store, config }
    }

    /// Run one pruning pass if the chain is eligible.
    pub fn run(&self) {
        let now = unix_now();
        let mut store = self.store.write();

        let tip = match store.last_index() {
            Some(tip) => tip,
            None => return,
        };
        let length = tip + 1;
        if length <= self.config.pruning_threshold {
            return;
        }
        let last = store.last_pruning().unwrap_or_default();
        if now.saturating_sub(last) <= self.config.archive_interval {
            debug!("[prune] archive interval not elapsed, skipping");
            return;
        }

        // Keep the newest 20% of the chain.
        let prune_below = length * 8 / 10;
        if prune_below < MIN_PRUNE_BELOW {
            return;
        }

        match store.archive_below(prune_below, now) {
            Ok(moved) => {
                if let Err(err) = store.set_last_pruning(now) {
                    error!("[prune] cannot record pruning time: {}", err.to_string_full());
                }
                info!(
                    "[prune] archived {} blocks below index {}",
                    moved, prune_below
                );
            }
            Err(err) => {
                error!("[prune] archival failure: {}", err.to_string_full());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_chain;
    use crate::db::{BlockStore, MemoryStore};
    use crate::merkle;

    fn populated_store(len: usize) -> Arc<RwLock<MemoryStore>> {
        let mut store = MemoryStore::new();
        for block in create_test_chain(len) {
            store.insert(&block).unwrap();
        }
        Arc::new(RwLock::new(store))
    }

    fn create_test_pruner(
        store: Arc<RwLock<MemoryStore>>,
        threshold: u64,
    ) -> Pruner<MemoryStore> {
        let config = ChainConfig {
            pruning_threshold: threshold,
            ..Default::default()
        };
        Pruner::new(store, Arc::new(config))
    }

    #[test]
    fn prune_and_restore_round_trip() {
        let store = populated_store(1200);
        let pruner = create_test_pruner(store.clone(), 1000);

        pruner.run();

        {
            let guard = store.read();
            assert_eq!(guard.count(), 240);
            assert_eq!(guard.archive_count(), 960);
            assert_eq!(guard.last_index(), Some(1199));
            assert_eq!(guard.range(960, 961)[0].index, 960);
            assert!(guard.last_pruning().is_some());

            // The remaining suffix is still internally consistent.
            let suffix = guard.range(0, u64::MAX);
            assert!(merkle::validate_chain(&suffix));
        }

        let restored = store.write().restore_all().unwrap();
        assert_eq!(restored, 960);

        let guard = store.read();
        assert_eq!(guard.count(), 1200);
        let full = guard.range(0, u64::MAX);
        assert!(merkle::validate_chain(&full));
    }

    #[test]
    fn short_chain_is_not_pruned() {
        let store = populated_store(500);
        let pruner = create_test_pruner(store.clone(), 1000);

        pruner.run();

        assert_eq!(store.read().count(), 500);
        assert_eq!(store.read().archive_count(), 0);
    }

    #[test]
    fn recent_pruning_blocks_another_run() {
        let store = populated_store(1200);
        store.write().set_last_pruning(unix_now()).unwrap();
        let pruner = create_test_pruner(store.clone(), 1000);

        pruner.run();

        assert_eq!(store.read().count(), 1200);
    }

    #[test]
    fn low_cut_point_bails_out() {
        let store = populated_store(120);
        // Threshold low enough to pass the length gate: 120 * 0.8 = 96 < 100.
        let pruner = create_test_pruner(store.clone(), 100);

        pruner.run();

        assert_eq!(store.read().count(), 120);
        assert_eq!(store.read().archive_count(), 0);
    }
}
