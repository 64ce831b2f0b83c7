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

//! Ledger data structures.
//!
//! A block hash is computed over the textual concatenation of the decimal
//! index, the ISO-8601 timestamp, the raw JSON `data` string and the previous
//! hash. This recipe is the wire contract shared by every node: changing any
//! canonicalization detail invalidates all existing chains.

use crate::{
    base::serialize::json_serialize_string,
    crypto::hash::hash_block,
    Error, ErrorKind, Result,
};

/// Timestamp of the genesis block, fixed so that isolated nodes produce the
/// same genesis hash as any peer.
pub const GENESIS_TIMESTAMP: &str = "2023-01-01T00:00:00.000Z";

/// Payload of the genesis block, verbatim.
pub const GENESIS_DATA: &str = "{\"message\":\"Genesis Block\"}";

/// Previous-hash marker of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// One immutable record of the chain.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Block {
    /// Position in the chain, strictly monotonic from 0.
    pub index: u64,
    /// ISO-8601 creation time with millisecond precision.
    pub timestamp: String,
    /// Opaque JSON text of the sensor payload.
    pub data: String,
    /// Hash of the previous block, `"0"` for genesis.
    #[serde(rename = "previousHash")]
    pub previous_hash: String,
    /// Hex SHA-256 over the block contents.
    pub hash: String,
}

impl Block {
    /// The canonical genesis block.
    pub fn genesis() -> Block {
        let hash = hash_block(
            0,
            GENESIS_TIMESTAMP,
            GENESIS_DATA,
            GENESIS_PREVIOUS_HASH,
        );
        Block {
            index: 0,
            timestamp: GENESIS_TIMESTAMP.to_owned(),
            data: GENESIS_DATA.to_owned(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_owned(),
            hash,
        }
    }

    /// Build the successor of `prev` carrying `data`.
    pub fn next(prev: &Block, data: String, timestamp: String) -> Block {
        let index = prev.index + 1;
        let hash = hash_block(index, &timestamp, &data, &prev.hash);
        Block {
            index,
            timestamp,
            data,
            previous_hash: prev.hash.clone(),
            hash,
        }
    }

    /// Recompute the hash from the block contents.
    pub fn compute_hash(&self) -> String {
        hash_block(self.index, &self.timestamp, &self.data, &self.previous_hash)
    }

    /// Check that the stored hash matches the block contents.
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Check that this block is the immediate successor of `prev`.
    pub fn links_to(&self, prev: &Block) -> bool {
        self.index == prev.index + 1 && self.previous_hash == prev.hash
    }
}

/// Sensor measurement accepted by the admission layer.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SensorRecord {
    /// Submitting validator identifier.
    pub sensor_id: String,
    /// Measured value.
    pub value: serde_json::Number,
    /// Measurement time as reported by the sensor.
    pub timestamp: String,
}

impl SensorRecord {
    /// Shape validation performed before a record enters the chain.
    pub fn validate(&self) -> Result<()> {
        if self.sensor_id.is_empty() {
            return Err(Error::new_ext(ErrorKind::InvalidPayload, "empty sensor_id"));
        }
        if self.timestamp.is_empty() {
            return Err(Error::new_ext(ErrorKind::InvalidPayload, "empty timestamp"));
        }
        if let Some(value) = self.value.as_f64() {
            if !value.is_finite() {
                return Err(Error::new_ext(
                    ErrorKind::InvalidPayload,
                    "non-finite value",
                ));
            }
        }
        Ok(())
    }

    /// JSON text form carried as block `data`.
    pub fn to_data(&self) -> Result<String> {
        json_serialize_string(self)
    }
}

/// Signed sensor record as delivered by the admission collaborator.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SignedSensorRecord {
    pub sensor_id: String,
    pub value: serde_json::Number,
    pub timestamp: String,
    /// Hex signature over `sensor_id|value|timestamp`.
    pub signature: String,
    /// Hex Ed25519 public key of the submitter.
    pub public_key: String,
}

impl SignedSensorRecord {
    /// The record stripped of its authentication envelope.
    pub fn record(&self) -> SensorRecord {
        SensorRecord {
            sensor_id: self.sensor_id.clone(),
            value: self.value.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// Block moved to the archive table by the pruner.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ArchivedBlock {
    #[serde(flatten)]
    pub block: Block,
    /// Unix seconds of the archival move.
    #[serde(rename = "archivedAt")]
    pub archived_at: u64,
}

/// Current UTC time as ISO-8601 with millisecond precision.
pub fn utc_now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
