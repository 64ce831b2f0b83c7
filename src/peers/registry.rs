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

//! Peer registry.
//!
//! Single source of truth for peer addresses and their health. Every peer
//! selection in the node goes through the selectors below; nobody else keeps
//! address lists.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Probe outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerHealth {
    /// Never probed.
    Unknown,
    /// Answered the last probe.
    Healthy,
    /// Failed the last probe.
    Unhealthy,
}

/// Bookkeeping for one known peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Peer address (`host:port`).
    pub address: String,
    /// Last probe outcome.
    pub health: PeerHealth,
    /// Time of the last successful exchange.
    pub last_seen: Option<Instant>,
    /// Chain length cached from the last exchange.
    pub chain_length: Option<u64>,
    /// Response time of the last successful probe.
    pub response_time: Option<Duration>,
    /// Start of the current unbroken unhealthy streak.
    unhealthy_since: Option<Instant>,
}

impl PeerRecord {
    fn new(address: String) -> Self {
        PeerRecord {
            address,
            health: PeerHealth::Unknown,
            last_seen: None,
            chain_length: None,
            response_time: None,
            unhealthy_since: None,
        }
    }
}

/// Registry of known peers.
pub struct PeerRegistry {
    /// Known peers keyed by address.
    peers: HashMap<String, PeerRecord>,
    /// Own address, never enrolled.
    self_address: String,
    /// Eviction threshold for continuously unhealthy peers.
    unhealthy_ttl: Duration,
}

impl PeerRegistry {
    /// Build a registry seeded with `seeds`, excluding the node's own
    /// address.
    pub fn new<I, A>(self_address: &str, seeds: I, unhealthy_ttl: Duration) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        let mut registry = PeerRegistry {
            peers: HashMap::new(),
            self_address: self_address.to_owned(),
            unhealthy_ttl,
        };
        for seed in seeds {
            registry.discover(seed.as_ref());
        }
        registry
    }

    /// Enroll an address if it is new and not our own.
    pub fn discover(&mut self, address: &str) {
        if address.is_empty() || address == self.self_address {
            return;
        }
        if !self.peers.contains_key(address) {
            debug!("[peers] discovered {}", address);
            self.peers
                .insert(address.to_owned(), PeerRecord::new(address.to_owned()));
        }
    }

    /// Record a successful exchange with a peer.
    pub fn record_success(&mut self, address: &str, chain_length: u64, elapsed: Duration) {
        if let Some(peer) = self.peers.get_mut(address) {
            peer.health = PeerHealth::Healthy;
            peer.last_seen = Some(Instant::now());
            peer.chain_length = Some(chain_length);
            peer.response_time = Some(elapsed);
            peer.unhealthy_since = None;
        }
    }

    /// Record a failed exchange with a peer.
    pub fn record_failure(&mut self, address: &str) {
        if let Some(peer) = self.peers.get_mut(address) {
            peer.health = PeerHealth::Unhealthy;
            peer.unhealthy_since.get_or_insert_with(Instant::now);
        }
    }

    /// Update the cached chain length without touching health.
    pub fn note_chain_length(&mut self, address: &str, chain_length: u64) {
        if let Some(peer) = self.peers.get_mut(address) {
            peer.chain_length = Some(chain_length);
        }
    }

    /// Drop peers that stayed unhealthy for longer than the TTL.
    pub fn evict_stale(&mut self) {
        let ttl = self.unhealthy_ttl;
        self.peers.retain(|address, peer| {
            let stale = matches!(peer.health, PeerHealth::Unhealthy)
                && peer
                    .unhealthy_since
                    .map(|since| since.elapsed() > ttl)
                    .unwrap_or(false);
            if stale {
                info!("[peers] evicting {} after sustained unhealthiness", address);
            }
            !stale
        });
    }

    /// Addresses of all known peers.
    pub fn all(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.peers.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Addresses of the currently healthy peers.
    pub fn healthy(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .peers
            .values()
            .filter(|peer| peer.health == PeerHealth::Healthy)
            .map(|peer| peer.address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    /// The healthy peer with the lowest response time.
    pub fn best(&self) -> Option<String> {
        self.peers
            .values()
            .filter(|peer| peer.health == PeerHealth::Healthy)
            .min_by_key(|peer| peer.response_time.unwrap_or(Duration::MAX))
            .map(|peer| peer.address.clone())
    }

    /// Bookkeeping of one peer.
    pub fn info(&self, address: &str) -> Option<PeerRecord> {
        self.peers.get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
