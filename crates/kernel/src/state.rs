//! Kernel-owned mutable state.

use crate::state_machine_view::StateMachineView;
use argus_core::{ViewId, ViewLookupStatus};
use argus_types::{Block, Hash, VersionedRoundView};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Cache of the last state published for a view.
///
/// `update_outgoing` snapshots the live view and clears `sent`;
/// `mark_sent` suppresses further emission until the next change.
#[derive(Debug)]
pub(crate) struct OutgoingView {
    /// The snapshot offered to consumers.
    pub vrv: VersionedRoundView,
    /// Whether the snapshot has been delivered (on any output).
    pub sent: bool,
}

impl Default for OutgoingView {
    fn default() -> Self {
        Self {
            vrv: VersionedRoundView::default(),
            // A view with no recorded changes has nothing to announce.
            sent: true,
        }
    }
}

/// A live tracked round plus its outgoing cache.
#[derive(Debug, Default)]
pub(crate) struct View {
    /// The authoritative state, mutated only by the kernel task.
    pub vrv: VersionedRoundView,
    /// The last published snapshot.
    pub outgoing: OutgoingView,
}

impl View {
    /// Record an observable change: bump the overall version, refresh the
    /// outgoing snapshot and mark it unsent.
    pub fn update_outgoing(&mut self) {
        self.vrv.version += 1;
        self.outgoing.vrv = self.vrv.clone();
        self.outgoing.sent = false;
    }

    /// Whether the current outgoing snapshot has been delivered.
    pub fn has_been_sent(&self) -> bool {
        self.outgoing.sent
    }

    /// Suppress emission until the next `update_outgoing`.
    pub fn mark_sent(&mut self) {
        self.outgoing.sent = true;
    }
}

/// The complete mutable state owned by the kernel task.
pub(crate) struct KernelState {
    /// The round whose block is committed locally but still being
    /// published. Meaningful only once `committing_block` is set.
    pub committing: View,

    /// The round currently accepting votes.
    pub voting: View,

    /// The round after the voting round, where early votes accrue.
    /// Always `voting.height` at `voting.round + 1`.
    pub next_round: View,

    /// The block the committing view decided on.
    pub committing_block: Option<Block>,

    /// Cancellation handles for outstanding proposed-block fetches, keyed
    /// by block hash. Each entry is released exactly once: on arrival of
    /// the block, on abandonment of its view, or on shutdown.
    pub in_flight_fetch_pbs: HashMap<Hash, CancellationToken>,

    /// Snapshot of a voting round that advanced without a commit, stashed
    /// for single delivery with the next gossip emission.
    pub nil_voted_round: Option<VersionedRoundView>,

    /// The state-machine-facing conduit's bookkeeping.
    pub state_machine_view: StateMachineView,
}

impl KernelState {
    /// Seed state carrying only the stored heights and rounds; the initial
    /// view loaders fill in the rest.
    pub fn new(nhr: argus_types::NetworkHeightRound) -> Self {
        let mut state = Self {
            committing: View::default(),
            voting: View::default(),
            next_round: View::default(),
            committing_block: None,
            in_flight_fetch_pbs: HashMap::new(),
            nil_voted_round: None,
            state_machine_view: StateMachineView::new(),
        };
        state.committing.vrv.height = nhr.committing_height;
        state.committing.vrv.round = nhr.committing_round;
        state.voting.vrv.height = nhr.voting_height;
        state.voting.vrv.round = nhr.voting_round;
        state
    }

    /// Locate the view tracking `(height, round)`.
    ///
    /// The returned id is `Some` exactly when the status is
    /// [`ViewLookupStatus::Found`].
    pub fn find_view(&self, height: u64, round: u32) -> (Option<ViewId>, ViewLookupStatus) {
        let voting_height = self.voting.vrv.height;
        let voting_round = self.voting.vrv.round;

        if height == voting_height {
            if round == voting_round {
                return (Some(ViewId::Voting), ViewLookupStatus::Found);
            }
            if round == voting_round + 1 {
                return (Some(ViewId::NextRound), ViewLookupStatus::Found);
            }
            if round < voting_round {
                return (None, ViewLookupStatus::Orphaned);
            }
            return (None, ViewLookupStatus::FutureNotYetTracked);
        }

        if height > voting_height {
            return (None, ViewLookupStatus::FutureNotYetTracked);
        }

        if self.committing_block.is_some() && height == self.committing.vrv.height {
            if round == self.committing.vrv.round {
                return (Some(ViewId::Committing), ViewLookupStatus::Found);
            }
            return (None, ViewLookupStatus::WrongCommit);
        }

        (None, ViewLookupStatus::BeforeCommitting)
    }

    /// The view for an id returned by [`Self::find_view`].
    pub fn view(&self, id: ViewId) -> &View {
        match id {
            ViewId::Committing => &self.committing,
            ViewId::Voting => &self.voting,
            ViewId::NextRound => &self.next_round,
        }
    }

    /// Mutable access to the view for an id.
    pub fn view_mut(&mut self, id: ViewId) -> &mut View {
        match id {
            ViewId::Committing => &mut self.committing,
            ViewId::Voting => &mut self.voting,
            ViewId::NextRound => &mut self.next_round,
        }
    }

    /// The pending state-machine emission, if the bound round has an
    /// unacknowledged update.
    pub fn state_machine_output(&self) -> Option<VersionedRoundView> {
        self.state_machine_view
            .output(&self.committing.vrv, &self.voting.vrv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_types::NetworkHeightRound;

    fn state(
        voting: (u64, u32),
        committing: Option<(u64, u32)>,
    ) -> KernelState {
        let mut s = KernelState::new(NetworkHeightRound {
            voting_height: voting.0,
            voting_round: voting.1,
            committing_height: committing.map(|c| c.0).unwrap_or(0),
            committing_round: committing.map(|c| c.1).unwrap_or(0),
        });
        if committing.is_some() {
            s.committing_block = Some(Block {
                hash: Hash::from_bytes(b"committing"),
                prev_block_hash: None,
                height: committing.unwrap().0,
                prev_commit_proof: argus_types::CommitProof::default(),
                validators: vec![],
                next_validators: vec![],
                data_id: Hash::ZERO,
            });
        }
        s
    }

    #[test]
    fn test_find_view_voting_and_next_round() {
        let s = state((3, 1), Some((2, 0)));
        assert_eq!(
            s.find_view(3, 1),
            (Some(ViewId::Voting), ViewLookupStatus::Found)
        );
        assert_eq!(
            s.find_view(3, 2),
            (Some(ViewId::NextRound), ViewLookupStatus::Found)
        );
        assert_eq!(
            s.find_view(2, 0),
            (Some(ViewId::Committing), ViewLookupStatus::Found)
        );
    }

    #[test]
    fn test_find_view_orphaned_round() {
        let s = state((3, 2), Some((2, 0)));
        assert_eq!(s.find_view(3, 0), (None, ViewLookupStatus::Orphaned));
        assert_eq!(s.find_view(3, 1), (None, ViewLookupStatus::Orphaned));
    }

    #[test]
    fn test_find_view_before_committing() {
        let s = state((3, 0), Some((2, 0)));
        assert_eq!(s.find_view(1, 0), (None, ViewLookupStatus::BeforeCommitting));
    }

    #[test]
    fn test_find_view_wrong_commit() {
        let s = state((3, 0), Some((2, 1)));
        assert_eq!(s.find_view(2, 0), (None, ViewLookupStatus::WrongCommit));
        assert_eq!(s.find_view(2, 3), (None, ViewLookupStatus::WrongCommit));
    }

    #[test]
    fn test_find_view_future() {
        let s = state((3, 0), Some((2, 0)));
        assert_eq!(s.find_view(4, 0), (None, ViewLookupStatus::FutureNotYetTracked));
        assert_eq!(s.find_view(3, 2), (None, ViewLookupStatus::FutureNotYetTracked));
    }

    #[test]
    fn test_find_view_before_first_commit() {
        // No committing block yet: everything below voting is BeforeCommitting.
        let s = state((1, 0), None);
        assert_eq!(s.find_view(0, 0), (None, ViewLookupStatus::BeforeCommitting));
        assert_eq!(
            s.find_view(1, 0),
            (Some(ViewId::Voting), ViewLookupStatus::Found)
        );
    }

    #[test]
    fn test_update_outgoing_bumps_version_and_dirties() {
        let mut view = View::default();
        assert!(view.has_been_sent());

        view.update_outgoing();
        assert!(!view.has_been_sent());
        assert_eq!(view.outgoing.vrv.version, 1);

        view.mark_sent();
        assert!(view.has_been_sent());

        view.update_outgoing();
        assert_eq!(view.outgoing.vrv.version, 2);
        assert!(!view.has_been_sent());
    }

    #[test]
    fn test_outgoing_snapshot_is_detached() {
        let mut view = View::default();
        view.vrv.height = 4;
        view.update_outgoing();

        // Later mutation of the live view must not leak into the snapshot.
        view.vrv.height = 5;
        assert_eq!(view.outgoing.vrv.height, 4);
    }
}
