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

//! Publish/subscribe for chain events.
//!
//! Events are propagated over the channel the subscriber handed in with the
//! `Subscribe` message. A subscriber closing the receiving side is
//! interpreted as an implicit unsubscribe.

use super::{message::BlockResponseSender, message::Message};
use std::collections::HashMap;

bitflags::bitflags! {
    /// Chain event kinds.
    pub struct Event: u8 {
        /// A block has been appended by local admission.
        const BLOCK = 1 << 0;
        /// The chain has been replaced under consensus.
        const REPLACE = 1 << 1;
    }
}

const EVENTS_NUM: usize = 2;

/// Chain events subscribers.
pub(crate) struct PubSub {
    events_sub: HashMap<Event, HashMap<String, BlockResponseSender>>,
}

impl Default for PubSub {
    fn default() -> Self {
        PubSub {
            events_sub: HashMap::new(),
        }
    }
}

impl PubSub {
    pub fn new() -> Self {
        PubSub::default()
    }

    /// Check if the `event` kind has subscribers.
    pub fn has_subscribers(&self, event: Event) -> bool {
        match self.events_sub.get(&event) {
            Some(subs) => !subs.is_empty(),
            None => false,
        }
    }

    /// Subscribe to chain events.
    /// The `events` parameter is a bitflag, multiple kinds can be OR-ed
    /// together. Events are received from the receiver end of `chan`.
    pub fn subscribe(&mut self, id: String, events: Event, chan: BlockResponseSender) {
        for i in 0..EVENTS_NUM {
            if let Some(event) = Event::from_bits((1 << i) & events.bits()) {
                if event.is_empty() {
                    continue;
                }
                debug!("[sub] '{}' subscribed to '{:?}' event", id, event);
                self.events_sub
                    .entry(event)
                    .or_default()
                    .insert(id.clone(), chan.clone());
            }
        }
    }

    /// Unsubscribe from chain events.
    pub fn unsubscribe(&mut self, id: &str, events: Event) {
        for i in 0..EVENTS_NUM {
            if let Some(event) = Event::from_bits((1 << i) & events.bits()) {
                if event.is_empty() {
                    continue;
                }
                debug!("[sub] '{}' unsubscribed from '{:?}' event", id, event);
                if let Some(subs) = self.events_sub.get_mut(&event) {
                    subs.remove(id);
                }
            }
        }
    }

    /// Publish a message to the `event` subscribers.
    /// Subscribers with a closed channel are dropped.
    pub fn publish(&mut self, event: Event, msg: Message) {
        let mut dead = vec![];
        if let Some(subs) = self.events_sub.get(&event) {
            for (id, chan) in subs.iter() {
                if chan.send_sync(msg.clone()).is_err() {
                    debug!("[sub] '{}' gone, removing from '{:?}' event", id, event);
                    dead.push(id.clone());
                }
            }
        }
        if let Some(subs) = self.events_sub.get_mut(&event) {
            for id in dead {
                subs.remove(&id);
            }
        }
    }
}
