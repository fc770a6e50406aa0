//! Observed state of a single consensus round.

use crate::{ProofMap, ProposedBlock, Validator, VoteKind};
use crate::hash::Hash;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

/// Derived vote-power bookkeeping for one round.
///
/// Recomputed from the proofs and validator set after every accepted vote;
/// never authoritative on its own.
#[derive(Debug, Clone, Default)]
pub struct VoteSummary {
    /// Total voting power of the round's validator set.
    pub available_power: u64,

    /// Power that has prevoted, across all block hashes and nil.
    pub total_prevote_power: u64,

    /// Power that has precommitted, across all block hashes and nil.
    pub total_precommit_power: u64,

    /// Prevote power per voted block hash (`None` = nil).
    pub prevote_block_power: HashMap<Option<Hash>, u64>,

    /// Precommit power per voted block hash (`None` = nil).
    pub precommit_block_power: HashMap<Option<Hash>, u64>,

    /// The hash with the most prevote power; `None` when nil leads or no
    /// prevotes exist.
    pub most_voted_prevote_hash: Option<Hash>,

    /// The hash with the most precommit power; `None` when nil leads or no
    /// precommits exist.
    pub most_voted_precommit_hash: Option<Hash>,
}

impl VoteSummary {
    /// Create an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the available power from the round's validator set.
    pub fn set_available_power(&mut self, validators: &[Validator]) {
        self.available_power = validators.iter().map(|v| v.power).sum();
    }

    /// Recompute the per-hash and total powers of one vote kind from the
    /// given proofs.
    pub fn set_vote_powers(&mut self, kind: VoteKind, validators: &[Validator], proofs: &ProofMap) {
        let (block_power, total, most_voted) = match kind {
            VoteKind::Prevote => (
                &mut self.prevote_block_power,
                &mut self.total_prevote_power,
                &mut self.most_voted_prevote_hash,
            ),
            VoteKind::Precommit => (
                &mut self.precommit_block_power,
                &mut self.total_precommit_power,
                &mut self.most_voted_precommit_hash,
            ),
        };

        block_power.clear();
        *total = 0;

        let mut best_hash: Option<Hash> = None;
        let mut best_power = 0u64;
        for (block_hash, proof) in proofs {
            let mut power = 0u64;
            for index in proof.signature_bitfield().iter_set() {
                if let Some(validator) = validators.get(index) {
                    power += validator.power;
                }
            }
            block_power.insert(*block_hash, power);
            *total += power;

            // Deterministic leader selection: more power wins; on a tie, a
            // block hash beats nil and the smaller hash beats the larger.
            let leads = power > best_power
                || (power == best_power
                    && power > 0
                    && match (*block_hash, best_hash) {
                        (Some(candidate), Some(best)) => candidate < best,
                        (Some(_), None) => true,
                        _ => false,
                    });
            if leads {
                best_power = power;
                best_hash = *block_hash;
            }
        }
        *most_voted = best_hash;
    }

    /// Power of the most voted hash for the given kind.
    pub fn most_voted_power(&self, kind: VoteKind) -> u64 {
        match kind {
            VoteKind::Prevote => self
                .prevote_block_power
                .get(&self.most_voted_prevote_hash)
                .copied()
                .unwrap_or(0),
            VoteKind::Precommit => self
                .precommit_block_power
                .get(&self.most_voted_precommit_hash)
                .copied()
                .unwrap_or(0),
        }
    }

    /// Zero out everything, including available power.
    pub fn reset(&mut self) {
        self.available_power = 0;
        self.reset_for_same_height();
    }

    /// Zero out the vote bookkeeping but keep the available power, for reuse
    /// within the same height where the validators are unchanged.
    pub fn reset_for_same_height(&mut self) {
        self.total_prevote_power = 0;
        self.total_precommit_power = 0;
        self.prevote_block_power.clear();
        self.precommit_block_power.clear();
        self.most_voted_prevote_hash = None;
        self.most_voted_precommit_hash = None;
    }
}

/// The mirror's observed state of a particular round.
///
/// May be on a later height and round, or with different validators,
/// compared to the local state machine.
#[derive(Debug, Clone, Default)]
pub struct RoundView {
    /// Height of the round.
    pub height: u64,
    /// Round number within the height.
    pub round: u32,

    /// Ordered validator set; positions define signer indices.
    pub validators: Vec<Validator>,

    /// Content hash of the ordered validator public keys.
    pub validator_pub_key_hash: Hash,
    /// Content hash of the ordered validator vote powers.
    pub validator_vote_power_hash: Hash,

    /// Proposed blocks in arrival order.
    pub proposed_blocks: Vec<ProposedBlock>,

    /// Prevote proofs per voted block hash. Once the view is initialized the
    /// nil entry (`None`) always exists.
    pub prevote_proofs: ProofMap,
    /// Precommit proofs per voted block hash; same invariants as prevotes.
    pub precommit_proofs: ProofMap,

    /// Derived vote-power bookkeeping.
    pub vote_summary: VoteSummary,
}

impl RoundView {
    /// The proofs of the given vote kind.
    pub fn proofs(&self, kind: VoteKind) -> &ProofMap {
        match kind {
            VoteKind::Prevote => &self.prevote_proofs,
            VoteKind::Precommit => &self.precommit_proofs,
        }
    }

    /// Mutable access to the proofs of the given vote kind.
    pub fn proofs_mut(&mut self, kind: VoteKind) -> &mut ProofMap {
        match kind {
            VoteKind::Prevote => &mut self.prevote_proofs,
            VoteKind::Precommit => &mut self.precommit_proofs,
        }
    }

    /// Recompute the vote summary's powers of one kind from the current
    /// proofs.
    pub fn recompute_vote_powers(&mut self, kind: VoteKind) {
        let proofs = match kind {
            VoteKind::Prevote => &self.prevote_proofs,
            VoteKind::Precommit => &self.precommit_proofs,
        };
        self.vote_summary
            .set_vote_powers(kind, &self.validators, proofs);
    }

    /// Whether a proposed block with the given hash is present.
    pub fn has_proposed_block(&self, hash: Hash) -> bool {
        self.proposed_blocks.iter().any(|pb| pb.block.hash == hash)
    }

    /// Zero out all fields, retaining allocated capacity.
    pub fn reset(&mut self) {
        self.height = 0;
        self.validators.clear();
        self.validator_pub_key_hash = Hash::ZERO;
        self.validator_vote_power_hash = Hash::ZERO;
        self.reset_for_same_height();
        self.vote_summary.reset();
    }

    /// Clear the round, proposed blocks and vote information, keeping the
    /// height, validators and validator hashes.
    ///
    /// For reusing a view within the same height, where the validator slice
    /// and hashes stay valid.
    pub fn reset_for_same_height(&mut self) {
        self.round = 0;
        self.proposed_blocks.clear();
        self.prevote_proofs.clear();
        self.precommit_proofs.clear();
        self.vote_summary.reset_for_same_height();
    }
}

/// A [`RoundView`] with version counters, for consumers that receive live
/// updates and need to identify what changed between two snapshots.
#[derive(Debug, Clone, Default)]
pub struct VersionedRoundView {
    /// The underlying view.
    pub round_view: RoundView,

    /// Overall version, incremented on each observable change. A single
    /// overall increment may cover several sub-version increments.
    pub version: u32,

    /// Version of the prevote set as a whole.
    pub prevote_version: u32,
    /// Version of the precommit set as a whole.
    pub precommit_version: u32,

    /// Per-hash prevote versions, the optimistic-concurrency tokens for
    /// vote updates. Independent of `prevote_version`.
    pub prevote_block_versions: HashMap<Option<Hash>, u32>,

    /// Per-hash precommit versions; same contract as the prevote side.
    pub precommit_block_versions: HashMap<Option<Hash>, u32>,
}

impl Deref for VersionedRoundView {
    type Target = RoundView;

    fn deref(&self) -> &RoundView {
        &self.round_view
    }
}

impl DerefMut for VersionedRoundView {
    fn deref_mut(&mut self) -> &mut RoundView {
        &mut self.round_view
    }
}

impl VersionedRoundView {
    /// The per-hash version map of the given vote kind.
    pub fn block_versions(&self, kind: VoteKind) -> &HashMap<Option<Hash>, u32> {
        match kind {
            VoteKind::Prevote => &self.prevote_block_versions,
            VoteKind::Precommit => &self.precommit_block_versions,
        }
    }

    /// The current per-hash version for one hash of the given kind. Zero
    /// means no proof has been installed for that hash yet.
    pub fn block_version(&self, kind: VoteKind, block_hash: &Option<Hash>) -> u32 {
        self.block_versions(kind).get(block_hash).copied().unwrap_or(0)
    }

    /// Increment the per-hash version for one hash of the given kind.
    pub fn bump_block_version(&mut self, kind: VoteKind, block_hash: Option<Hash>) {
        let versions = match kind {
            VoteKind::Prevote => &mut self.prevote_block_versions,
            VoteKind::Precommit => &mut self.precommit_block_versions,
        };
        *versions.entry(block_hash).or_insert(0) += 1;
    }

    /// Increment the whole-set version of the given kind.
    pub fn bump_vote_version(&mut self, kind: VoteKind) {
        match kind {
            VoteKind::Prevote => self.prevote_version += 1,
            VoteKind::Precommit => self.precommit_version += 1,
        }
    }

    /// Zero out all fields, retaining allocated capacity.
    pub fn reset(&mut self) {
        self.round_view.reset();
        self.reset_versions();
    }

    /// Reset the view for reuse within the same height; see
    /// [`RoundView::reset_for_same_height`].
    pub fn reset_for_same_height(&mut self) {
        self.round_view.reset_for_same_height();
        self.reset_versions();
    }

    fn reset_versions(&mut self) {
        self.version = 0;
        self.prevote_version = 0;
        self.precommit_version = 0;
        self.prevote_block_versions.clear();
        self.precommit_block_versions.clear();
    }
}
