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

//! Library error codes and results.

use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Project-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Max string length when the error is converted to string using `to_string_full`.
const MAX_ERROR_SOURCE_STRING_LENGTH: usize = 128;

/// Error kind to better contextualize the returned error.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ErrorKind {
    /// Admission payload with missing or mistyped fields.
    InvalidPayload,
    /// Block with missing fields or malformed hex strings.
    InvalidBlockStructure,
    /// Block hash does not match the block contents.
    InvalidBlockHash,
    /// Block index or previous-hash link out of sequence.
    InvalidSequence,
    /// A block with the same index is already stored.
    DuplicateIndex,
    /// A different block with the same hash is already stored.
    HashCollision,
    /// The locally visible chain violates its structural invariants.
    ChainInconsistency,
    /// Requested element lies outside the addressed range.
    OutOfRange,
    /// The addressed peer is not answering probes.
    PeerUnhealthy,
    /// A remote call did not complete within its deadline.
    RpcTimeout,
    /// Persistent store fault.
    StorageError,
    /// Peer speaks for a different network identifier.
    BadNetwork,
    /// Signature verification failure.
    InvalidSignature,
    /// Codec failure.
    MalformedData,
    Other,
}

/// Error kind strings.
pub(crate) mod error_kind_str {
    pub const INVALID_PAYLOAD: &str = "invalid payload";
    pub const INVALID_BLOCK_STRUCTURE: &str = "invalid block structure";
    pub const INVALID_BLOCK_HASH: &str = "invalid block hash";
    pub const INVALID_SEQUENCE: &str = "invalid sequence";
    pub const DUPLICATE_INDEX: &str = "duplicate index";
    pub const HASH_COLLISION: &str = "hash collision";
    pub const CHAIN_INCONSISTENCY: &str = "chain inconsistency";
    pub const OUT_OF_RANGE: &str = "out of range";
    pub const PEER_UNHEALTHY: &str = "peer unhealthy";
    pub const RPC_TIMEOUT: &str = "rpc timeout";
    pub const STORAGE_ERROR: &str = "storage error";
    pub const BAD_NETWORK: &str = "bad network";
    pub const INVALID_SIGNATURE: &str = "invalid signature";
    pub const MALFORMED_DATA: &str = "malformed data";
    pub const OTHER: &str = "other";
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;
        let kind_str = match self {
            InvalidPayload => error_kind_str::INVALID_PAYLOAD,
            InvalidBlockStructure => error_kind_str::INVALID_BLOCK_STRUCTURE,
            InvalidBlockHash => error_kind_str::INVALID_BLOCK_HASH,
            InvalidSequence => error_kind_str::INVALID_SEQUENCE,
            DuplicateIndex => error_kind_str::DUPLICATE_INDEX,
            HashCollision => error_kind_str::HASH_COLLISION,
            ChainInconsistency => error_kind_str::CHAIN_INCONSISTENCY,
            OutOfRange => error_kind_str::OUT_OF_RANGE,
            PeerUnhealthy => error_kind_str::PEER_UNHEALTHY,
            RpcTimeout => error_kind_str::RPC_TIMEOUT,
            StorageError => error_kind_str::STORAGE_ERROR,
            BadNetwork => error_kind_str::BAD_NETWORK,
            InvalidSignature => error_kind_str::INVALID_SIGNATURE,
            MalformedData => error_kind_str::MALFORMED_DATA,
            Other => error_kind_str::OTHER,
        };
        write!(f, "{}", kind_str)
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let msg = self.to_string();
        serializer.serialize_str(&msg)
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ErrorKindVisitor;

        impl<'de> Visitor<'de> for ErrorKindVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<R>(self, value: &str) -> std::result::Result<String, R> {
                Ok(value.to_string())
            }
        }

        let kind = match deserializer.deserialize_str(ErrorKindVisitor)?.as_str() {
            error_kind_str::INVALID_PAYLOAD => ErrorKind::InvalidPayload,
            error_kind_str::INVALID_BLOCK_STRUCTURE => ErrorKind::InvalidBlockStructure,
            error_kind_str::INVALID_BLOCK_HASH => ErrorKind::InvalidBlockHash,
            error_kind_str::INVALID_SEQUENCE => ErrorKind::InvalidSequence,
            error_kind_str::DUPLICATE_INDEX => ErrorKind::DuplicateIndex,
            error_kind_str::HASH_COLLISION => ErrorKind::HashCollision,
            error_kind_str::CHAIN_INCONSISTENCY => ErrorKind::ChainInconsistency,
            error_kind_str::OUT_OF_RANGE => ErrorKind::OutOfRange,
            error_kind_str::PEER_UNHEALTHY => ErrorKind::PeerUnhealthy,
            error_kind_str::RPC_TIMEOUT => ErrorKind::RpcTimeout,
            error_kind_str::STORAGE_ERROR => ErrorKind::StorageError,
            error_kind_str::BAD_NETWORK => ErrorKind::BadNetwork,
            error_kind_str::INVALID_SIGNATURE => ErrorKind::InvalidSignature,
            error_kind_str::MALFORMED_DATA => ErrorKind::MalformedData,
            _ => ErrorKind::Other,
        };
        Ok(kind)
    }
}

/// Project-wide error type.
/// Contains a kind enumerate and a `source` to identify the subsystem that may
/// have propagated the error.
#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Not propagated by service messages.
    #[serde(serialize_with = "source_se", deserialize_with = "source_de")]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

fn source_se<S: Serializer>(
    source: &Option<Box<dyn std::error::Error + Send + Sync>>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match source {
        Some(b) => s.serialize_str(&b.to_string()),
        None => s.serialize_unit(),
    }
}

fn source_de<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Box<dyn std::error::Error + Send + Sync>>, D::Error> {
    let source: Option<String> = Option::deserialize(d)?;
    Ok(source.map(Into::into))
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Error {
            kind: self.kind,
            source: None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    pub fn new_ext<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = error.into();
        Error {
            kind,
            source: Some(source),
        }
    }

    pub fn to_string_full(&self) -> String {
        let mut err_string = self.to_string();
        if let Some(ref source) = self.source {
            let detail = format!(": {}", source);
            let max_len = std::cmp::min(detail.len(), MAX_ERROR_SOURCE_STRING_LENGTH);
            err_string.push_str(&detail[..max_len]);
        }
        err_string
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        if self.kind != other.kind {
            return false;
        }
        if self.source.is_none() && other.source.is_none() {
            true
        } else if self.source.is_some() && other.source.is_some() {
            format!("{:?}", self.source) == format!("{:?}", other.source)
        } else {
            false
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.source {
            None => None,
            Some(ref source) => Some(source.as_ref()),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::serialize::{json_deserialize, json_serialize};
    use std::io;
    use ErrorKind::*;

    #[test]
    fn generic_error_type() {
        let src1 = io::Error::new(io::ErrorKind::PermissionDenied, "oh no!");
        let src2 = io::Error::new(io::ErrorKind::TimedOut, "oh no!");
        let err1 = Error::new_ext(StorageError, src1);
        let err2 = Error::new_ext(StorageError, src2);

        assert_ne!(err1, err2);
    }

    #[test]
    fn external_store_failure() {
        let source = io::Error::new(io::ErrorKind::PermissionDenied, "oh no!");

        let error = Error::new_ext(StorageError, source);

        assert_eq!(error.to_string(), "storage error");
        assert_eq!(error.to_string_full(), "storage error: oh no!");
        let source = std::error::Error::source(&error)
            .unwrap()
            .downcast_ref::<io::Error>()
            .unwrap();
        assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
    }

    const ERROR_JSON: &str = r#"{"kind":"storage error","source":"oh no!"}"#;
    const ERROR_NO_SOURCE_JSON: &str = r#"{"kind":"storage error","source":null}"#;

    #[test]
    fn error_serialize() {
        let source = io::Error::new(io::ErrorKind::PermissionDenied, "oh no!");
        let error = Error::new_ext(StorageError, source);

        let buf = json_serialize(&error).unwrap();

        assert_eq!(String::from_utf8_lossy(&buf), ERROR_JSON);
    }

    #[test]
    fn error_deserialize() {
        let err: Error = json_deserialize(ERROR_JSON.as_bytes()).unwrap();

        assert_eq!(err, Error::new_ext(StorageError, "oh no!"));
    }

    #[test]
    fn error_deserialize_no_source() {
        let err: Error = json_deserialize(ERROR_NO_SOURCE_JSON.as_bytes()).unwrap();

        assert_eq!(err.kind, StorageError);
    }

    #[test]
    fn kind_round_trip() {
        for kind in [
            InvalidPayload,
            InvalidSequence,
            DuplicateIndex,
            HashCollision,
            ChainInconsistency,
            RpcTimeout,
        ] {
            let buf = json_serialize(&kind).unwrap();
            let back: ErrorKind = json_deserialize(&buf).unwrap();
            assert_eq!(back, kind);
        }
    }
}
