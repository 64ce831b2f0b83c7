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

//! Peer-to-peer transport components.
//!
//! The worker owns the RPC server, the broadcast fan-out, the periodic sync
//! schedule and the peer health probing. Peers authenticate each other with
//! a mutual Ed25519 challenge-response bound to the validator roster before
//! a single application frame is exchanged.

pub(crate) mod client;
pub(crate) mod worker;

pub mod protocol;
pub mod service;

pub use protocol::{RpcRequest, RpcResponse, StatusCode};
pub use service::{NetConfig, NetService};
