//! Round handoff between the kernel and the local state machine.

use argus_types::{CommittedBlock, Hash, ProposedBlock, PublicKey, Signature, VersionedRoundView};
use tokio::sync::{mpsc, oneshot};

/// The state machine's declaration that it is entering a round.
///
/// Rebinds the kernel's state-machine conduit: subsequent view emissions
/// target `(height, round)` and actions arrive on the new channel until the
/// next action set replaces it.
#[derive(Debug)]
pub struct StateMachineRoundActionSet {
    /// Height the state machine is entering.
    pub height: u64,
    /// Round the state machine is entering.
    pub round: u32,

    /// The state machine's signing key, used to attribute its votes. `None`
    /// for a non-validating observer.
    pub pub_key: Option<PublicKey>,

    /// Channel the state machine will send this round's actions on.
    pub actions: mpsc::Receiver<StateMachineRoundAction>,

    /// Answered immediately with the matching view, or with the stored
    /// committed block when the round is already below committing.
    pub state_response: oneshot::Sender<StateUpdate>,
}

/// The kernel's immediate answer to a round action set.
#[derive(Debug, Default)]
pub struct StateUpdate {
    /// The tracked view matching the state machine's round, when there is
    /// one.
    pub vrv: Option<VersionedRoundView>,

    /// The committed block at the state machine's height, when that height
    /// is already below the committing view.
    pub committed_block: Option<CommittedBlock>,

    /// Hash of the block preceding the state machine's round, for proposal
    /// construction. `None` at the initial height.
    pub prev_block_hash: Option<Hash>,
}

/// A single action taken by the state machine within its bound round.
#[derive(Debug)]
pub enum StateMachineRoundAction {
    /// The state machine proposed a block.
    Proposal(ProposedBlock),
    /// The state machine prevoted.
    Prevote(SignedVote),
    /// The state machine precommitted.
    Precommit(SignedVote),
}

/// A vote signed by the state machine's key.
#[derive(Debug)]
pub struct SignedVote {
    /// The block voted for, or `None` for the nil vote.
    pub target_hash: Option<Hash>,
    /// The canonical sign bytes the signature covers, used to seed a fresh
    /// proof when this is the first vote for the hash.
    pub sign_content: Vec<u8>,
    /// The signature.
    pub signature: Signature,
}
