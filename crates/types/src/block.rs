//! Block, proposed block and committed block types.

use crate::{Hash, ProofMap, PublicKey, Signature, SparseSignature, Validator};
use std::collections::HashMap;

/// Sparse commit evidence piggybacked in a block for the previous height.
///
/// Maps each voted block hash (`None` = nil) at `(height - 1, round)` to the
/// precommit signatures the proposer had collected when building the block.
/// Merging this into the mirror's committing view is the *backfill* path.
#[derive(Debug, Clone, Default)]
pub struct CommitProof {
    /// Round of the previous height the precommits were cast in.
    pub round: u32,
    /// Hash of the ordered validator public keys the sparse indices refer to.
    pub pub_key_hash: Hash,
    /// Sparse precommit signatures per voted block hash.
    pub proofs: HashMap<Option<Hash>, Vec<SparseSignature>>,
}

impl CommitProof {
    /// Build a commit proof by exporting each proof in `precommits` to its
    /// sparse form.
    ///
    /// Entries whose bitfields carry no signatures are skipped.
    pub fn from_proof_map(round: u32, pub_key_hash: Hash, precommits: &ProofMap) -> Self {
        let mut proofs = HashMap::with_capacity(precommits.len());
        for (block_hash, proof) in precommits {
            let sparse = proof.to_sparse();
            if sparse.signatures.is_empty() {
                continue;
            }
            proofs.insert(*block_hash, sparse.signatures);
        }
        Self {
            round,
            pub_key_hash,
            proofs,
        }
    }
}

/// A block as observed by the mirror.
///
/// The mirror never interprets the application payload; `data_id` is an
/// opaque identifier for it.
#[derive(Debug, Clone)]
pub struct Block {
    /// Content hash identifying the block.
    pub hash: Hash,

    /// Hash of the previous height's committed block, `None` at the initial
    /// height.
    pub prev_block_hash: Option<Hash>,

    /// Height this block occupies.
    pub height: u64,

    /// Precommit evidence for the previous height's commit.
    pub prev_commit_proof: CommitProof,

    /// Validators of this height, ordered; the order defines signer indices.
    pub validators: Vec<Validator>,

    /// Validators of the next height.
    pub next_validators: Vec<Validator>,

    /// Opaque identifier of the application data.
    pub data_id: Hash,
}

/// A block proposed into a particular round, with the proposer's signature.
#[derive(Debug, Clone)]
pub struct ProposedBlock {
    /// The proposed block.
    pub block: Block,

    /// Round the block is proposed for (the block's height plus this round
    /// locate the view it belongs to).
    pub round: u32,

    /// Public key of the proposer.
    pub proposer_pub_key: PublicKey,

    /// Proposer's signature over the proposal.
    ///
    /// Two distinct blocks cannot share a signature, so this doubles as the
    /// proposal's dedup key inside a view.
    pub signature: Signature,
}

/// A block that reached precommit majority, paired with the evidence.
///
/// This is the unit the block store persists and the finalizer consumes.
#[derive(Debug, Clone)]
pub struct CommittedBlock {
    /// The committed block.
    pub block: Block,

    /// Precommit proof attesting to the commit, taken from the *next*
    /// block's `prev_commit_proof`.
    pub proof: CommitProof,
}
