//! Aggregate view update for the gossip strategy.

use argus_types::VersionedRoundView;

/// One aggregate emission to the gossip layer.
///
/// Carries a clone of every tracked view with unsent changes, plus at most
/// one snapshot of a round that concluded by nil vote. Views included here
/// count as sent; nil-vote proof entries with empty bitsets are stripped
/// before inclusion.
#[derive(Debug, Default)]
pub struct NetworkViewUpdate {
    /// The voting view, when it has unsent changes.
    pub voting: Option<VersionedRoundView>,

    /// The committing view, when it has unsent changes.
    pub committing: Option<VersionedRoundView>,

    /// The next-round view, when it has unsent changes.
    pub next_round: Option<VersionedRoundView>,

    /// Snapshot of a voting round that was advanced past without a commit.
    /// Delivered exactly once so the gossip layer can observe that the round
    /// concluded, even though the replacement view may already have been
    /// published.
    pub nil_voted_round: Option<VersionedRoundView>,
}

impl NetworkViewUpdate {
    /// Whether the update carries nothing.
    pub fn is_empty(&self) -> bool {
        self.voting.is_none()
            && self.committing.is_none()
            && self.next_round.is_none()
            && self.nil_voted_round.is_none()
    }
}
