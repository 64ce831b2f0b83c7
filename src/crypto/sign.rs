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

//! Validator trust roster and signed record verification.
//!
//! The network is permissioned: both the transport handshake and the
//! admission path accept signatures only from keys present in the roster.

use crate::{
    base::schema::{SensorRecord, SignedSensorRecord},
    crypto::ed25519::PublicKey,
    Error, ErrorKind, Result,
};
use std::collections::HashMap;

/// Roster of allowed validator public keys, keyed by validator identifier.
#[derive(Debug, Clone, Default)]
pub struct TrustRoster {
    keys: HashMap<String, PublicKey>,
}

impl TrustRoster {
    /// Build a roster from `(validator id, hex public key)` entries.
    pub fn from_entries<I, S>(entries: I) -> Result<TrustRoster>
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let mut keys = HashMap::new();
        for (id, hex) in entries {
            let key = PublicKey::from_hex(hex.as_ref())?;
            keys.insert(id.as_ref().to_owned(), key);
        }
        Ok(TrustRoster { keys })
    }

    /// Lookup a validator key by identifier.
    pub fn get(&self, id: &str) -> Option<&PublicKey> {
        self.keys.get(id)
    }

    /// Identifier of the validator owning `key`, if enrolled.
    pub fn find(&self, key: &PublicKey) -> Option<&str> {
        self.keys
            .iter()
            .find(|(_, k)| *k == key)
            .map(|(id, _)| id.as_str())
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.find(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Text payload covered by a sensor record signature.
pub fn record_signing_payload(record: &SensorRecord) -> String {
    format!(
        "{}|{}|{}",
        record.sensor_id, record.value, record.timestamp
    )
}

/// Verify a signed sensor record against the roster.
///
/// On success the bare record is returned, ready for admission.
pub fn verify_record(roster: &TrustRoster, signed: &SignedSensorRecord) -> Result<SensorRecord> {
    let record = signed.record();
    record.validate()?;

    let key = PublicKey::from_hex(&signed.public_key)
        .map_err(|_| Error::new_ext(ErrorKind::InvalidSignature, "malformed public key"))?;
    if !roster.contains(&key) {
        return Err(Error::new_ext(
            ErrorKind::InvalidSignature,
            "submitter not enrolled in the validator roster",
        ));
    }

    let payload = record_signing_payload(&record);
    if !key.verify_hex(&payload, &signed.signature) {
        return Err(Error::new_ext(
            ErrorKind::InvalidSignature,
            "record signature verification failure",
        ));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_record;
    use crate::crypto::ed25519::tests::{ed25519_test_keypair, ED25519_PUB_HEX};

    fn create_test_roster() -> TrustRoster {
        TrustRoster::from_entries([("validator-01", ED25519_PUB_HEX)]).unwrap()
    }

    fn create_signed_record() -> SignedSensorRecord {
        let record = create_test_record();
        let keypair = ed25519_test_keypair();
        let signature = keypair.sign_hex(&record_signing_payload(&record));
        SignedSensorRecord {
            sensor_id: record.sensor_id,
            value: record.value,
            timestamp: record.timestamp,
            signature,
            public_key: ED25519_PUB_HEX.to_owned(),
        }
    }

    #[test]
    fn signing_payload_format() {
        let record = create_test_record();

        assert_eq!(
            record_signing_payload(&record),
            "validator-01|100|2024-01-01T00:01:00.000Z"
        );
    }

    #[test]
    fn roster_lookup() {
        let roster = create_test_roster();
        let key = PublicKey::from_hex(ED25519_PUB_HEX).unwrap();

        assert_eq!(roster.len(), 1);
        assert!(roster.contains(&key));
        assert_eq!(roster.find(&key), Some("validator-01"));
        assert!(roster.get("validator-02").is_none());
    }

    #[test]
    fn verify_valid_record() {
        let roster = create_test_roster();
        let signed = create_signed_record();

        let record = verify_record(&roster, &signed).unwrap();

        assert_eq!(record, create_test_record());
    }

    #[test]
    fn verify_tampered_record() {
        let roster = create_test_roster();
        let mut signed = create_signed_record();
        signed.value = serde_json::Number::from(999u64);

        let err = verify_record(&roster, &signed).unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidSignature);
    }

    #[test]
    fn verify_unknown_submitter() {
        let roster = TrustRoster::default();
        let signed = create_signed_record();

        let err = verify_record(&roster, &signed).unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidSignature);
    }
}
