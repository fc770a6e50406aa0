//! Bookkeeping for the state-machine-facing view conduit.

use argus_types::{PublicKey, VersionedRoundView};

/// Tracks what the local state machine is bound to and what it has seen.
///
/// The kernel emits on the state-machine channel only when the view
/// matching the bound `(height, round)` has a strictly greater version than
/// the last one acknowledged, or when a snapshot was force-queued during a
/// round advance.
#[derive(Debug)]
pub(crate) struct StateMachineView {
    height: u64,
    round: u32,
    pub_key: Option<PublicKey>,

    /// Highest version the state machine has been sent for this binding.
    last_sent_version: u32,

    /// A snapshot queued for unconditional delivery, bypassing the version
    /// gate. Used when a round advances while the state machine still
    /// points at it, so commit-wait information is not lost.
    forced: Option<VersionedRoundView>,
}

impl StateMachineView {
    /// An unbound conduit; emits nothing until the first round action set.
    pub fn new() -> Self {
        Self {
            height: 0,
            round: 0,
            pub_key: None,
            last_sent_version: 0,
            forced: None,
        }
    }

    /// Rebind to the state machine's declared round, dropping any pending
    /// outbound state.
    pub fn reset(&mut self, height: u64, round: u32, pub_key: Option<PublicKey>) {
        self.height = height;
        self.round = round;
        self.pub_key = pub_key;
        self.last_sent_version = 0;
        self.forced = None;
    }

    /// Record the version sent with the action-set handshake, so the
    /// version gate suppresses a duplicate first emission.
    pub fn mark_first_sent_version(&mut self, version: u32) {
        self.last_sent_version = version;
    }

    /// Queue a snapshot for unconditional delivery.
    pub fn force_send(&mut self, vrv: VersionedRoundView) {
        self.forced = Some(vrv);
    }

    /// The pending emission, if any.
    ///
    /// The bound round normally matches the voting view; it transiently
    /// matches the committing view while the state machine sits in a
    /// commit-wait.
    pub fn output(
        &self,
        committing: &VersionedRoundView,
        voting: &VersionedRoundView,
    ) -> Option<VersionedRoundView> {
        if let Some(forced) = &self.forced {
            return Some(forced.clone());
        }

        let vrv = if voting.height == self.height && voting.round == self.round {
            voting
        } else if committing.height == self.height && committing.round == self.round {
            committing
        } else {
            return None;
        };

        (vrv.version > self.last_sent_version).then(|| vrv.clone())
    }

    /// Acknowledge a completed send of the given version.
    pub fn mark_sent(&mut self, version: u32) {
        self.forced = None;
        self.last_sent_version = version;
    }

    /// Height the state machine is bound to.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Round the state machine is bound to.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// The state machine's signing key, if it is a validator.
    pub fn pub_key(&self) -> Option<PublicKey> {
        self.pub_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vrv(height: u64, round: u32, version: u32) -> VersionedRoundView {
        let mut vrv = VersionedRoundView::default();
        vrv.round_view.height = height;
        vrv.round_view.round = round;
        vrv.version = version;
        vrv
    }

    #[test]
    fn test_unbound_emits_nothing() {
        let smv = StateMachineView::new();
        assert!(smv.output(&vrv(2, 0, 5), &vrv(3, 0, 5)).is_none());
    }

    #[test]
    fn test_version_gate() {
        let mut smv = StateMachineView::new();
        smv.reset(3, 0, None);
        smv.mark_first_sent_version(2);

        // Not newer than what was acknowledged.
        assert!(smv.output(&vrv(2, 0, 9), &vrv(3, 0, 2)).is_none());

        // Strictly newer: emit, then acknowledge, then suppress.
        let out = smv.output(&vrv(2, 0, 9), &vrv(3, 0, 3)).unwrap();
        assert_eq!(out.version, 3);
        smv.mark_sent(3);
        assert!(smv.output(&vrv(2, 0, 9), &vrv(3, 0, 3)).is_none());
    }

    #[test]
    fn test_commit_wait_blip_matches_committing() {
        let mut smv = StateMachineView::new();
        smv.reset(2, 0, None);

        // Voting has moved on to height 3; the state machine still sits at
        // (2, 0), which now matches the committing view.
        let out = smv.output(&vrv(2, 0, 4), &vrv(3, 0, 1)).unwrap();
        assert_eq!(out.height, 2);
        assert_eq!(out.version, 4);
    }

    #[test]
    fn test_force_send_bypasses_version_gate() {
        let mut smv = StateMachineView::new();
        smv.reset(3, 1, None);
        smv.mark_first_sent_version(7);

        smv.force_send(vrv(3, 1, 7));
        let out = smv.output(&vrv(2, 0, 1), &vrv(3, 2, 1)).unwrap();
        assert_eq!(out.version, 7);

        smv.mark_sent(7);
        assert!(smv.output(&vrv(2, 0, 1), &vrv(3, 2, 1)).is_none());
    }

    #[test]
    fn test_reset_clears_pending_force() {
        let mut smv = StateMachineView::new();
        smv.reset(3, 0, None);
        smv.force_send(vrv(3, 0, 1));
        smv.reset(3, 1, None);
        assert!(smv.output(&vrv(2, 0, 1), &vrv(4, 0, 1)).is_none());
    }
}
