//! Channel message types for the argus mirror kernel.
//!
//! Everything crossing the kernel boundary travels through typed channels;
//! this crate defines the payloads:
//!
//! - [`AddVoteRequest`]: vote ingestion with optimistic-concurrency tokens
//! - [`SnapshotRequest`] / [`ViewLookupRequest`] / [`PbCheckRequest`]:
//!   read-only queries answered on caller-provided one-shot channels
//! - [`StateMachineRoundActionSet`] / [`StateMachineRoundAction`]: the local
//!   state machine's round handoff and its proposals and signed votes
//! - [`ProposedBlockFetchRequest`] / [`ProposedBlockFetcher`]: missing-block
//!   fetch orchestration
//! - [`NetworkViewUpdate`]: the aggregate gossip emission
//!
//! Messages are **passive data** — they describe a request or an
//! observation; only the kernel acts on them.

mod fetch;
mod gossip;
mod lookup;
mod requests;
mod snapshot;
mod state_machine;

pub use fetch::{ProposedBlockFetchRequest, ProposedBlockFetcher};
pub use gossip::NetworkViewUpdate;
pub use lookup::{
    PbCheckRequest, PbCheckResponse, PbCheckStatus, ViewId, ViewLookupRequest, ViewLookupResponse,
    ViewLookupStatus,
};
pub use requests::{AddVoteRequest, AddVoteResult, VoteUpdate};
pub use snapshot::{RvFieldFlags, Snapshot, SnapshotRequest};
pub use state_machine::{
    SignedVote, StateMachineRoundAction, StateMachineRoundActionSet, StateUpdate,
};
