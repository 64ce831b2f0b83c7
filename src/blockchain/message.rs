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

//! Messages used to interact with the chain service.
//!
//! External components (the network worker, the admission front-end) talk to
//! the chain service exclusively via these messages over the confirmed
//! channel.

use super::pubsub::Event;
use crate::{
    base::schema::{Block, SensorRecord},
    channel, Error,
};

/// Message types enumeration.
#[derive(Debug, PartialEq, Clone)]
pub enum Message {
    /// Exception response used for the full set of messages.
    Exception(Error),
    /// Subscribe to a set of chain events.
    Subscribe {
        /// Subscriber identifier.
        id: String,
        /// Events set (bitflags).
        events: Event,
    },
    /// Unsubscribe from a set of chain events.
    Unsubscribe {
        /// Subscriber identifier.
        id: String,
        /// Events set (bitflags).
        events: Event,
    },
    /// Admission request: append a verified sensor record.
    PutRecordRequest { record: SensorRecord },
    /// The freshly appended block.
    PutRecordResponse { block: Block },
    /// Full local chain request.
    GetChainRequest,
    /// Full local chain, in index order.
    GetChainResponse { chain: Vec<Block> },
    /// A peer pushed the next block (strict sequence check).
    ReceiveBlockRequest { block: Block },
    /// A peer pushed a block, idempotent on the index.
    AddBlockRequest { block: Block },
    /// Remote chains collected by the network worker for reconciliation.
    SyncRequest { candidates: Vec<Vec<Block>> },
    /// Reconciliation outcome.
    SyncResponse {
        /// True if the local chain was replaced.
        adopted: bool,
        /// Local chain length after reconciliation.
        length: u64,
    },
    /// Published to [Event::BLOCK] subscribers on every local append.
    BlockEvent { block: Block },
    /// Published to [Event::REPLACE] subscribers after a chain replacement.
    ReplaceEvent { length: u64 },
    /// Stop the chain service.
    Stop,
}

/// Chain request sender alias.
pub type BlockRequestSender = channel::RequestSender<Message, Message>;

/// Chain request receiver alias.
pub type BlockRequestReceiver = channel::RequestReceiver<Message, Message>;

/// Chain response sender alias.
pub type BlockResponseSender = channel::Sender<Message>;

/// Chain response receiver alias.
pub type BlockResponseReceiver = channel::Receiver<Message>;
