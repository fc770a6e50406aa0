//! Vote ingestion requests.

use argus_types::{CommonSignatureProof, Hash};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// One proof update within an [`AddVoteRequest`].
///
/// The caller merged new signatures into a clone of a proof it snapshotted
/// at `prev_version`; the kernel installs `proof` only if the per-hash
/// version is still `prev_version`.
#[derive(Debug)]
pub struct VoteUpdate {
    /// The replacement proof for this block hash.
    pub proof: Box<dyn CommonSignatureProof>,
    /// The per-hash version the caller computed `proof` against. Zero means
    /// the caller saw no proof for this hash.
    pub prev_version: u32,
}

/// Request to merge prevotes or precommits into a round's view.
///
/// The same shape serves both vote kinds; the channel it arrives on selects
/// the kind.
#[derive(Debug)]
pub struct AddVoteRequest {
    /// Height of the target round.
    pub height: u64,
    /// Round number of the target round.
    pub round: u32,

    /// Proof updates per voted block hash (`None` = nil vote).
    pub updates: HashMap<Option<Hash>, VoteUpdate>,

    /// Where to report the result. `None` when the caller does not care
    /// (e.g. votes re-entering from the local state machine).
    pub response: Option<oneshot::Sender<AddVoteResult>>,
}

/// Outcome of an [`AddVoteRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddVoteResult {
    /// Every update installed.
    Accepted,
    /// At least one update carried a stale `prev_version`; the caller should
    /// re-snapshot and retry. Updates with current versions were installed.
    Conflict,
    /// The addressed round is no longer (or not yet) tracked.
    OutOfDate,
}
