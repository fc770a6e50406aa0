//! Core types for the argus consensus mirror.
//!
//! This crate provides the foundational types used throughout the mirror
//! implementation:
//!
//! - **Primitives**: `Hash`, opaque public keys and signatures
//! - **Validators**: `Validator` and the derived key/power projections
//! - **Proofs**: the aggregate signature proof abstraction and its sparse
//!   wire form
//! - **Round state**: `RoundView`, `VersionedRoundView`, `VoteSummary`
//! - **Blocks**: `Block`, `ProposedBlock`, `CommittedBlock`
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. Signature
//! *verification* is deliberately absent: every signature and proof reaching
//! these types has already been verified upstream, so keys and signatures are
//! opaque identifiers here.

mod block;
mod crypto;
mod hash;
mod power;
mod proofs;
mod round_view;
mod signer_bitfield;
mod signing;
mod validator;

pub use block::{Block, CommitProof, CommittedBlock, ProposedBlock};
pub use crypto::{PublicKey, Signature};
pub use hash::{Blake3HashScheme, Hash, HashScheme};
pub use power::{byzantine_majority, byzantine_minority};
pub use proofs::{
    CommonSignatureProof, ProofError, ProofMap, SignatureProofScheme, SimpleProofScheme,
    SimpleSignatureProof, SparseMergeResult, SparseSignature, SparseSignatureProof,
};
pub use round_view::{RoundView, VersionedRoundView, VoteSummary};
pub use signer_bitfield::SignerBitfield;
pub use signing::{
    StandardSignatureScheme, SignatureScheme, VoteKind, VoteTarget, DOMAIN_PRECOMMIT,
    DOMAIN_PREVOTE,
};
pub use validator::{pub_keys, vote_powers, Validator};

/// The network's current height/round pointer, as persisted by the mirror.
///
/// Tracks both the round currently accepting votes and the round whose block
/// has been committed locally but is still being published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkHeightRound {
    /// Height currently accepting prevotes and precommits.
    pub voting_height: u64,
    /// Round currently accepting prevotes and precommits.
    pub voting_round: u32,
    /// Height of the block committed locally but still being published.
    /// Zero until the first block reaches commit.
    pub committing_height: u64,
    /// Round the committing block was committed in.
    pub committing_round: u32,
}
