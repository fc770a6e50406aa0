//! Vote power distribution over a proof map.

use argus_types::{Hash, ProofMap, Validator};
use std::collections::HashMap;

/// Per-block and total voting power derived from a proof map and the
/// validator set its signer indices refer to.
///
/// Unlike the vote summary this is built on demand against an arbitrary
/// proof map, e.g. when deciding whether a block hash has enough backing to
/// be worth fetching.
#[derive(Debug)]
pub(crate) struct VoteDistribution {
    /// Total power of the validator set.
    pub available_vote_power: u64,

    /// Power that has signed per voted block hash (`None` = nil).
    pub block_vote_power: HashMap<Option<Hash>, u64>,
}

impl VoteDistribution {
    /// Compute the distribution of `proofs` over `validators`.
    pub fn new(proofs: &ProofMap, validators: &[Validator]) -> Self {
        let available_vote_power = validators.iter().map(|v| v.power).sum();

        let mut block_vote_power = HashMap::with_capacity(proofs.len());
        for (block_hash, proof) in proofs {
            let mut power = 0u64;
            for index in proof.signature_bitfield().iter_set() {
                if let Some(validator) = validators.get(index) {
                    power += validator.power;
                }
            }
            block_vote_power.insert(*block_hash, power);
        }

        Self {
            available_vote_power,
            block_vote_power,
        }
    }

    /// The power backing one block hash; zero when unseen.
    pub fn power_for(&self, block_hash: Option<Hash>) -> u64 {
        self.block_vote_power.get(&block_hash).copied().unwrap_or(0)
    }
}
