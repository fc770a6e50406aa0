//! View lookup and proposed-block admission checks.

use crate::RvFieldFlags;
use argus_types::{ProposedBlock, PublicKey, RoundView, VersionedRoundView};
use std::fmt;
use tokio::sync::oneshot;

/// Which of the kernel's tracked views a lookup matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewId {
    /// The round whose block is committed locally but still being published.
    Committing,
    /// The round currently accepting votes.
    Voting,
    /// The round immediately after the voting round.
    NextRound,
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewId::Committing => write!(f, "committing"),
            ViewId::Voting => write!(f, "voting"),
            ViewId::NextRound => write!(f, "next_round"),
        }
    }
}

/// How a `(height, round)` pair relates to the kernel's tracked views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewLookupStatus {
    /// The pair matched a tracked view.
    Found,
    /// The height is below the committing height.
    BeforeCommitting,
    /// The height matches the committing height but the round does not.
    WrongCommit,
    /// The height matches the voting height but the round has already been
    /// advanced past.
    Orphaned,
    /// The pair is beyond what the kernel tracks.
    FutureNotYetTracked,
}

impl fmt::Display for ViewLookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewLookupStatus::Found => write!(f, "found"),
            ViewLookupStatus::BeforeCommitting => write!(f, "before_committing"),
            ViewLookupStatus::WrongCommit => write!(f, "wrong_commit"),
            ViewLookupStatus::Orphaned => write!(f, "orphaned"),
            ViewLookupStatus::FutureNotYetTracked => write!(f, "future_not_yet_tracked"),
        }
    }
}

/// Request to locate a `(height, round)` pair among the tracked views.
#[derive(Debug)]
pub struct ViewLookupRequest {
    /// Height to look up.
    pub height: u64,
    /// Round to look up.
    pub round: u32,

    /// Which fields to copy into the response view on a match.
    pub fields: RvFieldFlags,

    /// Destination buffer, filled on a match and returned either way.
    pub vrv: VersionedRoundView,

    /// Why the caller is asking. Debug aid carried into kernel logs; must
    /// not be empty.
    pub reason: &'static str,

    /// Where the response goes.
    pub response: oneshot::Sender<ViewLookupResponse>,
}

/// Response to a [`ViewLookupRequest`].
#[derive(Debug)]
pub struct ViewLookupResponse {
    /// The matched view, when `status` is [`ViewLookupStatus::Found`].
    pub id: Option<ViewId>,
    /// How the pair relates to the tracked views.
    pub status: ViewLookupStatus,
    /// The caller's buffer, populated on a match.
    pub vrv: VersionedRoundView,
}

/// Request to classify a proposed block against the tracked views before
/// admitting it.
#[derive(Debug)]
pub struct PbCheckRequest {
    /// The proposed block under consideration.
    pub pb: ProposedBlock,
    /// Where the response goes.
    pub response: oneshot::Sender<PbCheckResponse>,
}

/// Classification of a proposed block relative to current heights/rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbCheckStatus {
    /// The block may be added; the response carries the resolved proposer
    /// key.
    Acceptable,
    /// The proposer's key is not in the target round's validator set.
    SignerUnrecognized,
    /// A proposed block with this signature is already tracked.
    AlreadyHaveSignature,
    /// The round is at or below rounds the kernel no longer accepts blocks
    /// for.
    RoundTooOld,
    /// The round is beyond what the kernel tracks.
    RoundTooFarInFuture,
    /// The block is for the height after the voting height.
    NextHeight,
}

impl fmt::Display for PbCheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PbCheckStatus::Acceptable => write!(f, "acceptable"),
            PbCheckStatus::SignerUnrecognized => write!(f, "signer_unrecognized"),
            PbCheckStatus::AlreadyHaveSignature => write!(f, "already_have_signature"),
            PbCheckStatus::RoundTooOld => write!(f, "round_too_old"),
            PbCheckStatus::RoundTooFarInFuture => write!(f, "round_too_far_in_future"),
            PbCheckStatus::NextHeight => write!(f, "next_height"),
        }
    }
}

/// Response to a [`PbCheckRequest`].
#[derive(Debug)]
pub struct PbCheckResponse {
    /// The classification.
    pub status: PbCheckStatus,

    /// The proposer's key resolved from the target round's validator set,
    /// set when `status` is [`PbCheckStatus::Acceptable`].
    pub proposer_pub_key: Option<PublicKey>,

    /// A clone of the current voting round view, set when `status` is
    /// [`PbCheckStatus::NextHeight`] so the caller can validate the block's
    /// prev-commit proofs.
    pub voting_round_view: Option<RoundView>,
}
