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

//! Chain service components.
//!
//! This module contains the logic to maintain the local chain of sensor
//! record blocks.
//!
//! The service exploits several sub-modules to perform specialized works, in
//! particular:
//! - chain: the engine enforcing the structural invariants.
//! - dispatcher: handles incoming chain messages.
//! - consensus: the longest-valid-chain reconciliation rule.
//! - pruner: moves old blocks to the archive table.
//!
//! External components interact with the chain service via message passing.

pub(crate) mod dispatcher;
pub(crate) mod pruner;

pub mod chain;
pub mod consensus;
pub mod message;
pub mod pubsub;
pub mod service;
pub mod worker;

pub use chain::Chain;
pub use message::{
    BlockRequestReceiver, BlockRequestSender, BlockResponseReceiver, BlockResponseSender, Message,
};
pub use pubsub::Event;
pub use service::{ChainConfig, ChainService};
