//! Snapshot requests into kernel state.

use argus_types::VersionedRoundView;
use tokio::sync::oneshot;

/// Selects which [`VersionedRoundView`] fields a snapshot or lookup copies.
///
/// Callers that only need, say, vote summaries avoid paying for proof
/// clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RvFieldFlags(u8);

impl RvFieldFlags {
    /// Copy the validator set and its hashes.
    pub const VALIDATORS: Self = Self(1 << 0);
    /// Copy the proposed blocks.
    pub const PROPOSED_BLOCKS: Self = Self(1 << 1);
    /// Copy the prevote proofs and per-hash prevote versions.
    pub const PREVOTES: Self = Self(1 << 2);
    /// Copy the precommit proofs and per-hash precommit versions.
    pub const PRECOMMITS: Self = Self(1 << 3);
    /// Copy the vote summary.
    pub const VOTE_SUMMARY: Self = Self(1 << 4);

    /// Copy everything.
    pub const ALL: Self = Self(0b1_1111);

    /// No fields at all (heights, rounds and versions still copy).
    pub const NONE: Self = Self(0);

    /// Whether every flag in `other` is set in `self`.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RvFieldFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Caller-provided destination views for a snapshot.
///
/// Buffers travel into the kernel, are filled field-by-field reusing their
/// allocated capacity, and travel back through the response channel.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Destination for the voting view, if requested.
    pub voting: Option<VersionedRoundView>,
    /// Destination for the committing view, if requested.
    pub committing: Option<VersionedRoundView>,
}

/// Request for a copy of the kernel's voting and/or committing views.
#[derive(Debug)]
pub struct SnapshotRequest {
    /// The destination buffers.
    pub snapshot: Snapshot,
    /// Which fields to copy.
    pub fields: RvFieldFlags,
    /// Returns the filled buffers. Dropped unread responses are discarded.
    pub ready: oneshot::Sender<Snapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_containment() {
        let flags = RvFieldFlags::VALIDATORS | RvFieldFlags::PREVOTES;
        assert!(flags.contains(RvFieldFlags::VALIDATORS));
        assert!(flags.contains(RvFieldFlags::PREVOTES));
        assert!(!flags.contains(RvFieldFlags::PRECOMMITS));
        assert!(RvFieldFlags::ALL.contains(flags));
        assert!(flags.contains(RvFieldFlags::NONE));
    }
}
