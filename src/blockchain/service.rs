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

use super::{
    message::{BlockRequestSender, Message},
    worker::ChainWorker,
};
use crate::{channel::confirmed_channel, db::BlockStore};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Chain service configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Chain length above which pruning becomes eligible.
    pub pruning_threshold: u64,
    /// Min seconds between two pruning runs.
    pub archive_interval: u64,
    /// Seconds between two pruning eligibility checks.
    pub prune_interval: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            pruning_threshold: 1000,
            archive_interval: 24 * 60 * 60,
            prune_interval: 6 * 60 * 60,
        }
    }
}

/// Chain service data.
pub struct ChainService<S: BlockStore> {
    /// Worker object.
    worker: Option<ChainWorker<S>>,
    /// Threads data.
    handler: Option<JoinHandle<ChainWorker<S>>>,
    /// To send messages to the worker.
    tx_chan: BlockRequestSender,
    /// Chain engine shared reference.
    chain: super::chain::Chain<S>,
    /// To check if the worker thread is still alive.
    canary: Arc<()>,
}

impl<S: BlockStore> ChainService<S> {
    /// Create a new chain service instance.
    ///
    /// An empty store is seeded with the canonical genesis block; a fault
    /// doing so panics early at node boot.
    pub fn new(config: ChainConfig, store: S) -> Self {
        let (tx_chan, rx_chan) = confirmed_channel::<Message, Message>();

        let worker = ChainWorker::new(config, store, rx_chan);
        let chain = worker.chain();

        ChainService {
            worker: Some(worker),
            handler: None,
            tx_chan,
            chain,
            canary: Arc::new(()),
        }
    }

    /// Start the chain service.
    pub fn start(&mut self) {
        debug!("Starting chain service");
        let mut worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                warn!("service was already running");
                return;
            }
        };

        let mut canary = Arc::clone(&self.canary);
        let handle = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            worker.run_sync();
            worker
        });
        self.handler = Some(handle);
    }

    /// Stop the chain service.
    pub fn stop(&mut self) {
        debug!("Stopping chain service");
        match self.handler.take() {
            Some(handle) => {
                if let Err(err) = self.tx_chan.send_sync(Message::Stop) {
                    error!("Error stopping chain service thread: {:?}", err);
                }
                let worker = handle.join().unwrap();
                self.worker = Some(worker);
            }
            None => {
                debug!("service was not running");
            }
        };
    }

    /// Check if the service is running.
    pub fn is_running(&self) -> bool {
        // Hack to intercept crashed subthreads.
        Arc::strong_count(&self.canary) == 2 && self.worker.is_none()
    }

    /// Get a clone of the service input channel.
    pub fn request_channel(&self) -> BlockRequestSender {
        self.tx_chan.clone()
    }

    /// Get a clone of the chain engine.
    pub fn chain(&self) -> super::chain::Chain<S> {
        self.chain.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn create_chain_service() -> ChainService<MemoryStore> {
        ChainService::new(ChainConfig::default(), MemoryStore::new())
    }

    #[test]
    fn start_stop() {
        let mut svc = create_chain_service();

        svc.start();
        assert!(svc.is_running());

        svc.stop();
        assert!(!svc.is_running());
    }

    #[test]
    fn stopped_subthread() {
        let mut svc = create_chain_service();

        svc.start();
        assert!(svc.is_running());

        svc.tx_chan.send_sync(Message::Stop).unwrap();
        std::thread::sleep(std::time::Duration::from_secs(1));

        assert!(!svc.is_running());
        svc.stop();
    }

    #[test]
    fn request_round_trip_through_the_worker() {
        let mut svc = create_chain_service();
        svc.start();

        let rx = svc
            .request_channel()
            .send_sync(Message::GetChainRequest)
            .unwrap();
        let res = rx.recv_sync().unwrap();

        match res {
            Message::GetChainResponse { chain } => assert_eq!(chain.len(), 1),
            other => panic!("unexpected response: {:?}", other),
        }
        svc.stop();
    }
}
