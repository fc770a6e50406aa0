//! Deterministic validator committee fixture.

use argus_types::{
    Blake3HashScheme, Block, CommitProof, CommonSignatureProof, Hash, HashScheme, ProposedBlock,
    PublicKey, Signature, SignatureProofScheme, SignatureScheme, SimpleProofScheme,
    StandardSignatureScheme, Validator, VoteKind, VoteTarget,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// A deterministic committee of equal-power validators, plus the default
/// schemes, for building test inputs.
pub struct TestCommittee {
    validators: Vec<Validator>,
    proof_scheme: SimpleProofScheme,
    signature_scheme: StandardSignatureScheme,
    hash_scheme: Blake3HashScheme,
}

impl TestCommittee {
    /// Power assigned to every fixture validator.
    pub const VALIDATOR_POWER: u64 = 10;

    /// A committee of `size` validators with equal power, keyed from a
    /// fixed seed so runs are reproducible.
    pub fn new(size: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(0x0a5_905);
        let validators = (0..size)
            .map(|_| Validator {
                pub_key: PublicKey::from_bytes(rng.gen()),
                power: Self::VALIDATOR_POWER,
            })
            .collect();
        Self {
            validators,
            proof_scheme: SimpleProofScheme,
            signature_scheme: StandardSignatureScheme,
            hash_scheme: Blake3HashScheme,
        }
    }

    /// The committee's validator set.
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// The validator at an index.
    pub fn validator(&self, index: usize) -> &Validator {
        &self.validators[index]
    }

    /// The ordered public keys.
    pub fn pub_keys(&self) -> Vec<PublicKey> {
        self.validators.iter().map(|v| v.pub_key).collect()
    }

    /// Content hash of the ordered public keys, per the default scheme.
    pub fn pub_key_hash(&self) -> Hash {
        self.hash_scheme.pub_keys(&self.pub_keys())
    }

    /// A synthetic but unique signature for one signer over one target.
    pub fn vote_signature(
        &self,
        signer: usize,
        kind: VoteKind,
        target: &VoteTarget,
    ) -> Signature {
        let mut bytes = self.signature_scheme.sign_bytes(kind, target);
        bytes.push(signer as u8);
        Signature::from_bytes(bytes)
    }

    /// An aggregate vote proof carrying the given signers' votes.
    pub fn vote_proof(
        &self,
        kind: VoteKind,
        height: u64,
        round: u32,
        block_hash: Option<Hash>,
        signers: &[usize],
    ) -> Box<dyn CommonSignatureProof> {
        let target = VoteTarget {
            height,
            round,
            block_hash,
        };
        let keys = self.pub_keys();
        let mut proof = self.proof_scheme.new_proof(
            self.signature_scheme.sign_bytes(kind, &target),
            &keys,
            self.pub_key_hash(),
        );
        for signer in signers {
            proof
                .add_signature(self.vote_signature(*signer, kind, &target), &keys[*signer])
                .expect("fixture signer must be in the committee");
        }
        proof
    }

    /// Sparse commit evidence for a previous height, as carried in a later
    /// block's header.
    pub fn commit_proof(
        &self,
        height: u64,
        round: u32,
        block_hash: Option<Hash>,
        signers: &[usize],
    ) -> CommitProof {
        let proof = self.vote_proof(VoteKind::Precommit, height, round, block_hash, signers);
        let mut proofs = HashMap::new();
        proofs.insert(block_hash, proof.to_sparse().signatures);
        CommitProof {
            round,
            pub_key_hash: self.pub_key_hash(),
            proofs,
        }
    }

    /// A proposed block at the initial height: no predecessor, no commit
    /// evidence.
    pub fn proposed_block(&self, height: u64, round: u32, tag: &[u8], proposer: usize) -> ProposedBlock {
        self.build_proposed_block(height, round, tag, proposer, None, CommitProof::default())
    }

    /// A proposed block extending `prev`, carrying the given commit
    /// evidence for it.
    pub fn proposed_block_after(
        &self,
        height: u64,
        round: u32,
        tag: &[u8],
        proposer: usize,
        prev: &Block,
        prev_commit: CommitProof,
    ) -> ProposedBlock {
        self.build_proposed_block(height, round, tag, proposer, Some(prev.hash), prev_commit)
    }

    fn build_proposed_block(
        &self,
        height: u64,
        round: u32,
        tag: &[u8],
        proposer: usize,
        prev_block_hash: Option<Hash>,
        prev_commit_proof: CommitProof,
    ) -> ProposedBlock {
        let block = Block {
            hash: Hash::from_bytes(tag),
            prev_block_hash,
            height,
            prev_commit_proof,
            validators: self.validators.clone(),
            next_validators: self.validators.clone(),
            data_id: Hash::from_parts(&[b"data", tag]),
        };

        // Unique per (block, round, proposer); doubles as the dedup key.
        let mut signature = Vec::with_capacity(Hash::BYTES + 13);
        signature.extend_from_slice(block.hash.as_bytes());
        signature.extend_from_slice(&height.to_le_bytes());
        signature.extend_from_slice(&round.to_le_bytes());
        signature.push(proposer as u8);

        ProposedBlock {
            block,
            round,
            proposer_pub_key: self.validators[proposer].pub_key,
            signature: Signature::from_bytes(signature),
        }
    }
}
