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

//! Chain service component in charge of handling incoming messages.
//!
//! Admission appends, remote block delivery and consensus reconciliation all
//! land here. The dispatcher owns no state of its own: it drives the chain
//! engine and publishes events for the network worker.

use super::{
    consensus,
    message::{BlockResponseSender, Message},
    pubsub::{Event, PubSub},
};
use crate::{
    base::{
        schema::{Block, SensorRecord},
        Mutex,
    },
    blockchain::chain::Chain,
    db::BlockStore,
    merkle, ErrorKind,
};
use std::sync::Arc;

pub(crate) struct Dispatcher<S: BlockStore> {
    /// Chain engine.
    chain: Chain<S>,
    /// PubSub system to propagate unsolicited messages.
    pubsub: Arc<Mutex<PubSub>>,
}

impl<S: BlockStore> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Dispatcher {
            chain: self.chain.clone(),
            pubsub: self.pubsub.clone(),
        }
    }
}

impl<S: BlockStore> Dispatcher<S> {
    pub fn new(chain: Chain<S>, pubsub: Arc<Mutex<PubSub>>) -> Self {
        Self { chain, pubsub }
    }

    /// Handle one request, returning the response to send back (if any).
    pub fn message_handler(
        &self,
        req: Message,
        res_chan: &BlockResponseSender,
    ) -> Option<Message> {
        match req {
            Message::Subscribe { id, events } => {
                self.pubsub.lock().subscribe(id, events, res_chan.clone());
                None
            }
            Message::Unsubscribe { id, events } => {
                self.pubsub.lock().unsubscribe(&id, events);
                None
            }
            Message::PutRecordRequest { record } => Some(self.put_record(record)),
            Message::GetChainRequest => Some(self.get_chain()),
            Message::ReceiveBlockRequest { block } => Some(self.remote_block(block, false)),
            Message::AddBlockRequest { block } => Some(self.remote_block(block, true)),
            Message::SyncRequest { candidates } => Some(self.reconcile(candidates)),
            _ => {
                warn!("Unexpected message in dispatcher: {:?}", req);
                Some(Message::Exception(ErrorKind::Other.into()))
            }
        }
    }

    fn put_record(&self, record: SensorRecord) -> Message {
        match self.chain.append(&record) {
            Ok(block) => {
                self.pubsub.lock().publish(
                    Event::BLOCK,
                    Message::BlockEvent {
                        block: block.clone(),
                    },
                );
                Message::PutRecordResponse { block }
            }
            Err(err) => Message::Exception(err),
        }
    }

    fn get_chain(&self) -> Message {
        match self.chain.get_chain() {
            Ok(chain) => Message::GetChainResponse { chain },
            Err(err) => Message::Exception(err),
        }
    }

    /// Apply a block pushed by a peer.
    ///
    /// With `idempotent` set a `DuplicateIndex` outcome is demoted to
    /// success and the current chain is returned unchanged.
    fn remote_block(&self, block: Block, idempotent: bool) -> Message {
        match self.chain.adopt(&block) {
            Ok(()) => self.get_chain(),
            Err(err) if idempotent && err.kind == ErrorKind::DuplicateIndex => {
                debug!("Duplicate block {} delivery, answering current chain", block.index);
                self.get_chain()
            }
            Err(err) => Message::Exception(err),
        }
    }

    /// Validate the collected candidates and reconcile via the consensus
    /// rule. Candidates shorter than the Merkle threshold get the simple
    /// validation, the rest the full one; invalid chains are discarded.
    fn reconcile(&self, candidates: Vec<Vec<Block>>) -> Message {
        let local = match self.chain.get_chain() {
            Ok(chain) => chain,
            Err(err) => return Message::Exception(err),
        };

        let total = candidates.len();
        let valid: Vec<Vec<Block>> = candidates
            .into_iter()
            .filter(|chain| merkle::validate_chain(chain))
            .collect();
        if valid.len() < total {
            warn!(
                "[sync] discarded {} invalid candidate chain(s)",
                total - valid.len()
            );
        }

        match consensus::resolve(&local, &valid) {
            Some(winner) => match self.chain.replace(&valid[winner]) {
                Ok(()) => {
                    let length = valid[winner].len() as u64;
                    self.pubsub
                        .lock()
                        .publish(Event::REPLACE, Message::ReplaceEvent { length });
                    Message::SyncResponse {
                        adopted: true,
                        length,
                    }
                }
                Err(err) => Message::Exception(err),
            },
            None => Message::SyncResponse {
                adopted: false,
                length: local.len() as u64,
            },
        }
    }
}
