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

//! Cryptographic primitives: hex-string SHA-256 hashing, Ed25519 key pairs
//! and the validator trust roster.

pub mod ed25519;
pub mod hash;
pub mod sign;

pub use ed25519::{KeyPair, PublicKey};
pub use hash::{chain_fingerprint, hash_block, hash_pair, sha256_hex};
pub use sign::TrustRoster;
