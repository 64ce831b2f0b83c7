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

// External crates macros.
#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

// Public modules.
pub mod base;
pub mod blockchain;
pub mod channel;
pub mod crypto;
pub mod db;
pub mod error;
pub mod merkle;
pub mod network;
pub mod peers;

pub use base::{Block, SensorRecord, SignedSensorRecord};
pub use blockchain::{Chain, ChainConfig, ChainService, Message};
pub use crypto::{KeyPair, PublicKey, TrustRoster};
pub use error::{Error, ErrorKind, Result};
pub use network::{NetConfig, NetService};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
pub const VERSION_MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");
pub const VERSION_PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");
