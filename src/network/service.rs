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

use super::worker;
use crate::{
    base::RwLock,
    blockchain::BlockRequestSender,
    channel::{simple_channel, Sender},
    crypto::{KeyPair, TrustRoster},
    peers::PeerRegistry,
};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

/// Network service configuration.
pub struct NetConfig {
    /// Listening address (`host:port`).
    pub addr: String,
    /// Network identifier.
    pub network: String,
    /// Own validator identifier, as enrolled in the roster.
    pub validator: String,
    /// Node key pair (transport identity).
    pub keypair: KeyPair,
    /// Roster of allowed validator keys.
    pub roster: TrustRoster,
    /// Seed peer addresses.
    pub seeds: Vec<String>,
    /// Address advertised to peers, when it differs from `addr`.
    pub advertised: Option<String>,
    /// Seconds between two peer probing rounds.
    pub discovery_interval: u64,
    /// Per-peer probe deadline in seconds.
    pub health_timeout: u64,
    /// Seconds of sustained unhealthiness before eviction.
    pub unhealthy_ttl: u64,
    /// Min milliseconds between two broadcast waves.
    pub broadcast_cooldown_ms: u64,
    /// Per-peer broadcast deadline in seconds.
    pub broadcast_timeout: u64,
    /// Per-peer chain pull deadline in seconds during sync.
    pub sync_peer_timeout: u64,
    /// Seconds before the sync watchdog force-releases the lock.
    pub sync_lock_timeout: u64,
    /// Max concurrent outbound calls during a broadcast wave.
    pub max_fanout: usize,
}

impl NetConfig {
    /// Configuration with the default cadences and thresholds.
    pub fn new(
        addr: String,
        network: String,
        validator: String,
        keypair: KeyPair,
        roster: TrustRoster,
    ) -> Self {
        NetConfig {
            addr,
            network,
            validator,
            keypair,
            roster,
            seeds: vec![],
            advertised: None,
            discovery_interval: 60,
            health_timeout: 10,
            unhealthy_ttl: 5 * 60,
            broadcast_cooldown_ms: 1000,
            broadcast_timeout: 3,
            sync_peer_timeout: 5,
            sync_lock_timeout: 5,
            max_fanout: 8,
        }
    }

    /// Address peers should reach us on.
    pub fn self_address(&self) -> &str {
        self.advertised.as_deref().unwrap_or(&self.addr)
    }
}

/// Network service data.
pub struct NetService {
    /// Service configuration.
    config: Arc<NetConfig>,
    /// Working thread handler.
    handle: Option<JoinHandle<()>>,
    /// Message queue sender to reach the chain service.
    bc_chan: BlockRequestSender,
    /// Peer registry shared with the worker.
    registry: Arc<RwLock<PeerRegistry>>,
    /// Stop signal of the running worker.
    stop_tx: Option<Sender<()>>,
}

impl NetService {
    /// Create a new network service instance.
    pub fn new(config: NetConfig, bc_chan: BlockRequestSender) -> Self {
        let registry = PeerRegistry::new(
            config.self_address(),
            config.seeds.iter(),
            Duration::from_secs(config.unhealthy_ttl),
        );
        NetService {
            config: Arc::new(config),
            handle: None,
            bc_chan,
            registry: Arc::new(RwLock::new(registry)),
            stop_tx: None,
        }
    }

    pub fn start(&mut self) {
        debug!("Starting network service");
        if self.is_running() {
            return;
        }

        let config = self.config.clone();
        let bc_chan = self.bc_chan.clone();
        let registry = self.registry.clone();
        let (stop_tx, stop_rx) = simple_channel();
        self.stop_tx = Some(stop_tx);

        let handle = thread::spawn(move || {
            worker::run(config, bc_chan, registry, stop_rx);
        });
        self.handle = Some(handle);
    }

    pub fn stop(&mut self) {
        debug!("Stopping network service");
        match self.handle.take() {
            Some(handle) => {
                if let Some(stop_tx) = self.stop_tx.take() {
                    let _ = stop_tx.send_sync(());
                }
                if let Err(err) = handle.join() {
                    error!("Error joining network worker thread: {:?}", err);
                }
            }
            None => {
                debug!("service was not running");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        Arc::strong_count(&self.config) == 2
    }

    /// Get a shared reference to the peer registry.
    pub fn registry(&self) -> Arc<RwLock<PeerRegistry>> {
        self.registry.clone()
    }
}
