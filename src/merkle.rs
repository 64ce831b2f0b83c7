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

//! Merkle integrity validator.
//!
//! The tree is built level by level over the chain's block hashes. When a
//! level has odd length the last node is paired with itself. All functions
//! are pure; nothing here touches the store.

use crate::{
    base::schema::Block,
    crypto::hash::hash_pair,
    Error, ErrorKind, Result,
};

/// Chains shorter than this are validated structurally only.
pub const MERKLE_VALIDATION_THRESHOLD: usize = 4;

/// Which side the sibling occupies when folding a proof step.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, PartialEq, Clone)]
pub struct ProofStep {
    /// Sibling hash at this level.
    pub sibling: String,
    /// Side of the sibling in the pair.
    pub side: Side,
}

/// Merkle root of the given leaf hashes. `None` when there are no leaves.
pub fn root_of_hashes(leaves: &[String]) -> Option<String> {
    if leaves.is_empty() {
        return None;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = fold_level(&level);
    }
    level.pop()
}

/// Merkle root of a chain's block hashes.
pub fn root(blocks: &[Block]) -> Option<String> {
    let leaves: Vec<String> = blocks.iter().map(|b| b.hash.clone()).collect();
    root_of_hashes(&leaves)
}

fn fold_level(level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [odd] => hash_pair(odd, odd),
            _ => unreachable!(),
        })
        .collect()
}

/// Inclusion proof for the leaf at `index`.
///
/// The proof walks the same bottom-up construction as [root], recording at
/// every level the sibling hash and its side, so that verification can apply
/// each pair in the original order.
pub fn proof(blocks: &[Block], index: usize) -> Result<Vec<ProofStep>> {
    if index >= blocks.len() {
        return Err(Error::new_ext(
            ErrorKind::OutOfRange,
            format!("proof index {} out of {} leaves", index, blocks.len()),
        ));
    }

    let mut level: Vec<String> = blocks.iter().map(|b| b.hash.clone()).collect();
    let mut pos = index;
    let mut steps = vec![];

    while level.len() > 1 {
        let sibling_pos = if pos % 2 == 0 { pos + 1 } else { pos - 1 };
        let (sibling, side) = if pos % 2 == 0 {
            // Self-pairing on odd-length levels.
            let sibling = level.get(sibling_pos).unwrap_or(&level[pos]);
            (sibling.clone(), Side::Right)
        } else {
            (level[sibling_pos].clone(), Side::Left)
        };
        steps.push(ProofStep { sibling, side });

        level = fold_level(&level);
        pos /= 2;
    }
    Ok(steps)
}

/// Re-derive the root by folding `proof` against `leaf` and compare.
pub fn verify(leaf: &str, proof: &[ProofStep], root: &str) -> bool {
    let mut acc = leaf.to_owned();
    for step in proof {
        acc = match step.side {
            Side::Left => hash_pair(&step.sibling, &acc),
            Side::Right => hash_pair(&acc, &step.sibling),
        };
    }
    acc == root
}

/// Structural chain validation: hashes, links and index contiguity.
///
/// The first block is accepted either as the canonical genesis or, for a
/// pruned chain suffix, as any self-consistent block.
fn check_structure(blocks: &[Block]) -> bool {
    let first = match blocks.first() {
        Some(first) => first,
        None => return false,
    };
    if first.index == 0 && (first.previous_hash != "0" || *first != Block::genesis()) {
        debug!("[merkle] non-canonical genesis block");
        return false;
    }
    for block in blocks {
        if !block.verify_hash() {
            debug!("[merkle] hash mismatch at index {}", block.index);
            return false;
        }
    }
    for pair in blocks.windows(2) {
        if !pair[1].links_to(&pair[0]) {
            debug!("[merkle] broken link at index {}", pair[1].index);
            return false;
        }
    }
    true
}

/// Whole-chain validation.
///
/// Chains below [MERKLE_VALIDATION_THRESHOLD] get the structural checks
/// only; longer chains additionally verify the inclusion proof of every
/// block against the locally computed root. The empty chain is invalid.
pub fn validate_chain(blocks: &[Block]) -> bool {
    if !check_structure(blocks) {
        return false;
    }
    if blocks.len() < MERKLE_VALIDATION_THRESHOLD {
        return true;
    }

    let root = match root(blocks) {
        Some(root) => root,
        None => return false,
    };
    for (i, block) in blocks.iter().enumerate() {
        let steps = match proof(blocks, i) {
            Ok(steps) => steps,
            Err(_) => return false,
        };
        if !verify(&block.hash, &steps, &root) {
            debug!("[merkle] inclusion proof failure at index {}", block.index);
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_chain;
    use crate::crypto::hash::sha256_hex;

    const ROOT3_HEX: &str = "0bdf27bf7ec894ca7cadfe491ec1a3ece840f117989e8c5e9bd7086467bf6c38";

    fn abc_leaves() -> Vec<String> {
        vec![sha256_hex("a"), sha256_hex("b"), sha256_hex("c")]
    }

    #[test]
    fn empty_chain_has_no_root() {
        assert_eq!(root(&[]), None);
        assert!(!validate_chain(&[]));
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let chain = create_test_chain(1);

        assert_eq!(root(&chain), Some(chain[0].hash.clone()));

        let steps = proof(&chain, 0).unwrap();
        assert!(steps.is_empty());
        assert!(verify(&chain[0].hash, &steps, &chain[0].hash));
    }

    #[test]
    fn odd_leaf_count_self_pairs() {
        let leaves = abc_leaves();

        let expected = hash_pair(
            &hash_pair(&leaves[0], &leaves[1]),
            &hash_pair(&leaves[2], &leaves[2]),
        );

        assert_eq!(root_of_hashes(&leaves), Some(expected.clone()));
        assert_eq!(expected, ROOT3_HEX);
    }

    #[test]
    fn proof_verifies_for_every_leaf() {
        for len in 1..=9 {
            let chain = create_test_chain(len);
            let root = root(&chain).unwrap();
            for i in 0..len {
                let steps = proof(&chain, i).unwrap();
                assert!(
                    verify(&chain[i].hash, &steps, &root),
                    "len {} leaf {}",
                    len,
                    i
                );
            }
        }
    }

    #[test]
    fn proof_rejects_wrong_leaf() {
        let chain = create_test_chain(5);
        let root = root(&chain).unwrap();

        let steps = proof(&chain, 2).unwrap();

        assert!(!verify(&chain[3].hash, &steps, &root));
    }

    #[test]
    fn proof_out_of_range() {
        let chain = create_test_chain(3);

        let err = proof(&chain, 3).unwrap_err();

        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }

    #[test]
    fn short_chain_simple_validation() {
        let chain = create_test_chain(3);

        assert!(validate_chain(&chain));
    }

    #[test]
    fn long_chain_merkle_validation() {
        let chain = create_test_chain(8);

        assert!(validate_chain(&chain));
    }

    #[test]
    fn tampered_data_fails_validation() {
        let mut chain = create_test_chain(6);
        chain[2].data = "{\"sensor_id\":\"evil\"}".to_owned();

        assert!(!validate_chain(&chain));
    }

    #[test]
    fn broken_link_fails_validation() {
        let mut chain = create_test_chain(6);
        chain[4].previous_hash = sha256_hex("somewhere else");
        // Keep the block self-consistent so only the link is broken.
        chain[4].hash = chain[4].compute_hash();

        assert!(!validate_chain(&chain));
    }

    #[test]
    fn forged_genesis_fails_validation() {
        let mut chain = create_test_chain(3);
        chain[0].timestamp = "2020-01-01T00:00:00.000Z".to_owned();
        chain[0].hash = chain[0].compute_hash();

        assert!(!validate_chain(&chain));
    }

    #[test]
    fn pruned_suffix_still_validates() {
        let chain = create_test_chain(10);
        let suffix = &chain[6..];

        assert!(validate_chain(suffix));
    }
}
