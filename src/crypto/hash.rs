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

//! SHA-256 primitives over text.
//!
//! Every digest in the system is the lowercase hex form of a SHA-256 over a
//! textual concatenation. Host byte order and locale never enter the
//! picture: the input is always a UTF-8 string and the output always a hex
//! string.

use ring::digest;

/// Hex SHA-256 of a text string.
pub fn sha256_hex(data: &str) -> String {
    let digest = digest::digest(&digest::SHA256, data.as_bytes());
    hex::encode(digest.as_ref())
}

/// Canonical block hash: decimal index, timestamp, raw JSON data and
/// previous hash, concatenated as text.
pub fn hash_block(index: u64, timestamp: &str, data: &str, previous_hash: &str) -> String {
    let mut buf = String::with_capacity(
        20 + timestamp.len() + data.len() + previous_hash.len(),
    );
    buf.push_str(&index.to_string());
    buf.push_str(timestamp);
    buf.push_str(data);
    buf.push_str(previous_hash);
    sha256_hex(&buf)
}

/// Hash of a Merkle node pair, hex children concatenated as text.
pub fn hash_pair(left: &str, right: &str) -> String {
    let mut buf = String::with_capacity(left.len() + right.len());
    buf.push_str(left);
    buf.push_str(right);
    sha256_hex(&buf)
}

/// Deterministic fingerprint of a chain: SHA-256 over the concatenation of
/// its block hashes. Used as the consensus tie-break.
pub fn chain_fingerprint<'a, I>(hashes: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut buf = String::new();
    for hash in hashes {
        buf.push_str(hash);
    }
    sha256_hex(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256_HEX: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn sha256_of_empty_string() {
        assert_eq!(sha256_hex(""), EMPTY_SHA256_HEX);
    }

    #[test]
    fn sha256_of_abc() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn block_hash_is_textual_concatenation() {
        let manual = sha256_hex("42t-stampdatadeadbeef");

        assert_eq!(hash_block(42, "t-stamp", "data", "deadbeef"), manual);
    }

    #[test]
    fn pair_hash_matches_concatenation() {
        let left = sha256_hex("a");
        let right = sha256_hex("b");

        let manual = sha256_hex(&format!("{}{}", left, right));
        assert_eq!(hash_pair(&left, &right), manual);
    }

    #[test]
    fn fingerprint_is_order_sensitive() {
        let a = sha256_hex("a");
        let b = sha256_hex("b");

        let fp_ab = chain_fingerprint([a.as_str(), b.as_str()]);
        let fp_ba = chain_fingerprint([b.as_str(), a.as_str()]);

        assert_ne!(fp_ab, fp_ba);
        assert_eq!(fp_ab, sha256_hex(&format!("{}{}", a, b)));
    }
}
