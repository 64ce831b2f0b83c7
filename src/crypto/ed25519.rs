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

//! Ed25519 key pairs used for node transport identity and sensor record
//! signatures. Public keys travel hex-encoded everywhere.

use crate::{Error, ErrorKind, Result};
use ed25519_dalek::{
    Keypair as KeyPairImpl, PublicKey as PublicKeyImpl, Signer as _, Verifier as _,
};
use rand::rngs::OsRng;
use serde::{de::Visitor, Deserialize, Serialize};
use std::convert::TryFrom;

pub struct KeyPair(KeyPairImpl);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    imp: PublicKeyImpl,
}

impl KeyPair {
    /// Load a key pair from its 64-byte secret+public form.
    pub fn from_bytes(bytes: &[u8]) -> Result<KeyPair> {
        let internal = KeyPairImpl::from_bytes(bytes)
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        Ok(KeyPair(internal))
    }

    /// Load a key pair from its hex form.
    pub fn from_hex(hex: &str) -> Result<KeyPair> {
        let bytes =
            hex::decode(hex).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        KeyPair::from_bytes(&bytes)
    }

    pub fn from_random() -> KeyPair {
        let mut csprng = OsRng {};
        KeyPair(KeyPairImpl::generate(&mut csprng))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.0.sign(data).to_bytes().to_vec()
    }

    /// Hex signature over a text payload.
    pub fn sign_hex(&self, data: &str) -> String {
        hex::encode(self.sign(data.as_bytes()))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey { imp: self.0.public }
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<PublicKey> {
        let internal = PublicKeyImpl::from_bytes(bytes)
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        Ok(PublicKey { imp: internal })
    }

    pub fn from_hex(hex: &str) -> Result<PublicKey> {
        let bytes =
            hex::decode(hex).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        PublicKey::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.imp.to_bytes().to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn verify(&self, data: &[u8], sig: &[u8]) -> bool {
        ed25519_dalek::Signature::try_from(sig)
            .and_then(|s| self.imp.verify(data, &s))
            .is_ok()
    }

    /// Verify a hex signature over a text payload.
    pub fn verify_hex(&self, data: &str, sig_hex: &str) -> bool {
        match hex::decode(sig_hex) {
            Ok(sig) => self.verify(data.as_bytes(), &sig),
            Err(_) => false,
        }
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct HexVisitor;

        impl<'v> Visitor<'v> for HexVisitor {
            type Value = PublicKey;

            fn expecting(
                &self,
                fmt: &mut std::fmt::Formatter<'_>,
            ) -> std::result::Result<(), std::fmt::Error> {
                write!(fmt, "expecting a hex string.")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                PublicKey::from_hex(value)
                    .map_err(|_err| serde::de::Error::custom("Invalid public key"))
            }
        }
        deserializer.deserialize_str(HexVisitor)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const ED25519_BYTES_HEX: &str = "5fe6fc0f9274651d278798a4d86d9395ffdf4eff7361876f72201a130befb2c9587b8d516e9605a6ee57a19e2734f1ab3bb8b45e6062801dff3e6408d8594063";
    pub const ED25519_PUB_HEX: &str =
        "587b8d516e9605a6ee57a19e2734f1ab3bb8b45e6062801dff3e6408d8594063";

    pub fn ed25519_test_keypair() -> KeyPair {
        KeyPair::from_hex(ED25519_BYTES_HEX).unwrap()
    }

    pub fn ed25519_test_public_key() -> PublicKey {
        ed25519_test_keypair().public_key()
    }

    #[test]
    fn ed25519_public_key_hex() {
        let public = ed25519_test_public_key();

        assert_eq!(public.to_hex(), ED25519_PUB_HEX);
    }

    #[test]
    fn ed25519_public_key_serialize() {
        let public = ed25519_test_public_key();

        let json = serde_json::to_string(&public).unwrap();

        assert_eq!(json, format!("\"{}\"", ED25519_PUB_HEX));
    }

    #[test]
    fn ed25519_public_key_deserialize() {
        let expected = ed25519_test_public_key();
        let json = format!("\"{}\"", ED25519_PUB_HEX);

        let public: PublicKey = serde_json::from_str(&json).unwrap();

        assert_eq!(public, expected);
    }

    #[test]
    fn ed25519_sign_and_verify() {
        let keypair = ed25519_test_keypair();
        let data = "hello world";

        let sig = keypair.sign_hex(data);

        assert!(keypair.public_key().verify_hex(data, &sig));
        assert!(!keypair.public_key().verify_hex("tampered", &sig));
    }

    #[test]
    fn ed25519_random_keypair_round_trip() {
        let keypair = KeyPair::from_random();
        let data = b"sensor data";

        let sig = keypair.sign(data);

        assert!(keypair.public_key().verify(data, &sig));
    }
}
