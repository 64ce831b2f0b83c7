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

//! Longest-valid-chain consensus with deterministic tie-break.
//!
//! Rules, applied over the local chain and the set of valid candidates
//! sharing the local genesis:
//! - a candidate strictly longer than the local chain by more than
//!   [ADOPTION_GAP] wins; a one or two block lead is ignored so that two
//!   nodes racing by one block do not thrash each other's chain;
//! - at equal length the chain with the lexicographically greater
//!   fingerprint (SHA-256 over the concatenation of block hashes) wins, so
//!   every honest node converges to the same choice regardless of which
//!   peer answered first;
//! - in every other case the local chain is kept.

use crate::{base::schema::Block, crypto::hash::chain_fingerprint};

/// A candidate must exceed the local length by more than this to be adopted
/// on length alone.
pub const ADOPTION_GAP: u64 = 2;

fn fingerprint(chain: &[Block]) -> String {
    chain_fingerprint(chain.iter().map(|b| b.hash.as_str()))
}

/// Pick a chain among `local` and `candidates`.
///
/// Returns the index of the adopted candidate, or `None` to keep the local
/// chain. Candidates are assumed individually valid; those not sharing the
/// local genesis are ignored here as well.
pub fn resolve(local: &[Block], candidates: &[Vec<Block>]) -> Option<usize> {
    let genesis = local.first()?;

    let eligible: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, chain)| chain.first() == Some(genesis))
        .map(|(i, _)| i)
        .collect();
    if eligible.is_empty() {
        return None;
    }

    let local_len = local.len() as u64;
    let top_len = eligible
        .iter()
        .map(|i| candidates[*i].len() as u64)
        .max()
        .unwrap_or(0);

    if top_len > local_len + ADOPTION_GAP {
        // Clear winner by length; break remaining ties deterministically.
        return eligible
            .into_iter()
            .filter(|i| candidates[*i].len() as u64 == top_len)
            .max_by_key(|i| fingerprint(&candidates[*i]));
    }

    if top_len == local_len {
        // Tie with the local chain: the greater fingerprint wins, with a
        // bias for keeping local to avoid gratuitous churn.
        let local_fp = fingerprint(local);
        return eligible
            .into_iter()
            .filter(|i| candidates[*i].len() as u64 == top_len)
            .max_by_key(|i| fingerprint(&candidates[*i]))
            .filter(|i| fingerprint(&candidates[*i]) > local_fp);
    }

    // Short candidates, or a lead of one or two blocks: keep local.
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::{tests::create_test_chain, SensorRecord};

    /// Chain of `len` blocks forked away from genesis with a distinguishing
    /// record so fingerprints differ between `tag`s.
    fn forked_chain(len: usize, tag: u64) -> Vec<Block> {
        let mut chain = vec![Block::genesis()];
        for i in 1..len {
            let record = SensorRecord {
                sensor_id: format!("validator-{}", tag),
                value: serde_json::Number::from(tag * 1000 + i as u64),
                timestamp: "2024-03-01T00:00:00.000Z".to_owned(),
            };
            let block = Block::next(
                chain.last().unwrap(),
                record.to_data().unwrap(),
                "2024-03-01T00:00:01.000Z".to_owned(),
            );
            chain.push(block);
        }
        chain
    }

    #[test]
    fn no_candidates_keeps_local() {
        let local = create_test_chain(3);

        assert_eq!(resolve(&local, &[]), None);
    }

    #[test]
    fn clearly_longer_candidate_adopted() {
        let local = create_test_chain(5);
        let remote = create_test_chain(8);

        assert_eq!(resolve(&local, &[remote]), Some(0));
    }

    #[test]
    fn short_lead_keeps_local() {
        let local = create_test_chain(5);

        // One and two block leads are within the anti-thrash gap.
        assert_eq!(resolve(&local, &[create_test_chain(6)]), None);
        assert_eq!(resolve(&local, &[create_test_chain(7)]), None);
    }

    #[test]
    fn shorter_candidates_ignored() {
        let local = create_test_chain(5);

        assert_eq!(resolve(&local, &[create_test_chain(2)]), None);
    }

    #[test]
    fn foreign_genesis_filtered_out() {
        let local = create_test_chain(3);
        let mut foreign = create_test_chain(9);
        foreign[0].timestamp = "1999-01-01T00:00:00.000Z".to_owned();
        foreign[0].hash = foreign[0].compute_hash();

        assert_eq!(resolve(&local, &[foreign]), None);
    }

    #[test]
    fn equal_length_tie_breaks_on_fingerprint() {
        let a = forked_chain(4, 1);
        let b = forked_chain(4, 2);
        let fp = |chain: &[Block]| {
            chain_fingerprint(chain.iter().map(|blk| blk.hash.as_str()))
        };

        let a_wins = fp(&a) > fp(&b);

        // Whoever holds the smaller fingerprint adopts the other chain.
        let from_a = resolve(&a, std::slice::from_ref(&b));
        let from_b = resolve(&b, std::slice::from_ref(&a));
        if a_wins {
            assert_eq!(from_a, None);
            assert_eq!(from_b, Some(0));
        } else {
            assert_eq!(from_a, Some(0));
            assert_eq!(from_b, None);
        }
    }

    #[test]
    fn resolution_is_deterministic_over_permutations() {
        let local = create_test_chain(4);
        let c1 = forked_chain(9, 1);
        let c2 = forked_chain(9, 2);
        let c3 = forked_chain(8, 3);

        let pick = |cands: &[Vec<Block>]| {
            resolve(&local, cands).map(|i| cands[i].clone())
        };

        let w1 = pick(&[c1.clone(), c2.clone(), c3.clone()]);
        let w2 = pick(&[c3.clone(), c1.clone(), c2.clone()]);
        let w3 = pick(&[c2, c3, c1]);

        assert!(w1.is_some());
        assert_eq!(w1, w2);
        assert_eq!(w2, w3);
    }

    #[test]
    fn local_among_longest_keeps_local_unless_outweighed() {
        let local = forked_chain(4, 1);
        let twin = local.clone();

        // An identical chain never displaces local.
        assert_eq!(resolve(&local, &[twin]), None);
    }
}
