//! Domain-separated sign bytes for votes.
//!
//! Each signable message type has a unique domain tag prefix, preventing a
//! prevote signature from being replayed as a precommit (or vice versa), and
//! preventing cross-height or cross-round replay.

use crate::Hash;

/// Domain tag for prevotes.
///
/// Format: `PREVOTE` || height || round || block_hash (zero hash for nil)
pub const DOMAIN_PREVOTE: &[u8] = b"PREVOTE";

/// Domain tag for precommits.
///
/// Format: `PRECOMMIT` || height || round || block_hash (zero hash for nil)
pub const DOMAIN_PRECOMMIT: &[u8] = b"PRECOMMIT";

/// The kind of a vote.
///
/// Prevote and precommit handling are structurally identical throughout the
/// mirror; this enum selects which of the two parallel proof sets an
/// operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteKind {
    /// First-phase vote on a proposed block.
    Prevote,
    /// Second-phase vote; a majority commits the block.
    Precommit,
}

impl VoteKind {
    /// Returns a string representation for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteKind::Prevote => "prevote",
            VoteKind::Precommit => "precommit",
        }
    }
}

/// What a single vote is cast for.
///
/// `block_hash` of `None` is the nil vote: "I do not support any proposal
/// this round."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTarget {
    /// Height the vote applies to.
    pub height: u64,
    /// Round the vote applies to.
    pub round: u32,
    /// The block voted for, or `None` for the nil vote.
    pub block_hash: Option<Hash>,
}

/// Scheme producing the canonical bytes a validator signs for a vote.
///
/// Injected into the mirror so the hosting engine controls the wire format;
/// the mirror only needs the bytes to seed fresh signature proofs.
pub trait SignatureScheme: Send + Sync {
    /// Sign bytes for a prevote on the given target.
    fn prevote_sign_bytes(&self, target: &VoteTarget) -> Vec<u8>;

    /// Sign bytes for a precommit on the given target.
    fn precommit_sign_bytes(&self, target: &VoteTarget) -> Vec<u8>;

    /// Sign bytes for a vote of the given kind. Convenience dispatcher.
    fn sign_bytes(&self, kind: VoteKind, target: &VoteTarget) -> Vec<u8> {
        match kind {
            VoteKind::Prevote => self.prevote_sign_bytes(target),
            VoteKind::Precommit => self.precommit_sign_bytes(target),
        }
    }
}

/// The default [`SignatureScheme`]: domain tag, then height, round and block
/// hash in little-endian fixed width.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardSignatureScheme;

fn vote_message(domain: &[u8], target: &VoteTarget) -> Vec<u8> {
    let mut message = Vec::with_capacity(domain.len() + 12 + Hash::BYTES);
    message.extend_from_slice(domain);
    message.extend_from_slice(&target.height.to_le_bytes());
    message.extend_from_slice(&target.round.to_le_bytes());
    message.extend_from_slice(target.block_hash.unwrap_or(Hash::ZERO).as_bytes());
    message
}

impl SignatureScheme for StandardSignatureScheme {
    fn prevote_sign_bytes(&self, target: &VoteTarget) -> Vec<u8> {
        vote_message(DOMAIN_PREVOTE, target)
    }

    fn precommit_sign_bytes(&self, target: &VoteTarget) -> Vec<u8> {
        vote_message(DOMAIN_PRECOMMIT, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prevote_precommit_domains_disjoint() {
        let scheme = StandardSignatureScheme;
        let target = VoteTarget {
            height: 3,
            round: 1,
            block_hash: Some(Hash::from_bytes(b"block")),
        };
        assert_ne!(
            scheme.prevote_sign_bytes(&target),
            scheme.precommit_sign_bytes(&target)
        );
    }

    #[test]
    fn test_nil_vote_distinct_from_block_vote() {
        let scheme = StandardSignatureScheme;
        let nil = VoteTarget {
            height: 3,
            round: 1,
            block_hash: None,
        };
        let block = VoteTarget {
            block_hash: Some(Hash::from_bytes(b"block")),
            ..nil
        };
        assert_ne!(
            scheme.precommit_sign_bytes(&nil),
            scheme.precommit_sign_bytes(&block)
        );
    }

    #[test]
    fn test_round_separation() {
        let scheme = StandardSignatureScheme;
        let r0 = VoteTarget {
            height: 3,
            round: 0,
            block_hash: None,
        };
        let r1 = VoteTarget { round: 1, ..r0 };
        assert_ne!(
            scheme.prevote_sign_bytes(&r0),
            scheme.prevote_sign_bytes(&r1)
        );
    }
}
