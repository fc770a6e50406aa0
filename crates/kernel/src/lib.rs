//! The argus mirror kernel.
//!
//! The kernel is the single-writer serialization point of the mirror: it
//! ingests network observations (proposed blocks, prevotes, precommits —
//! out of order, duplicated, possibly conflicting) and maintains a
//! consistent, versioned picture of the network's progress through heights
//! and rounds.
//!
//! # Architecture
//!
//! One spawned task owns all mutable state and is its only writer. Every
//! boundary crossing is a typed channel:
//!
//! ```text
//! peer handlers ──┐
//! fetch layer   ──┼──▶ [ kernel task ] ──▶ view subscribers
//! state machine ──┘         │        └──▶ gossip aggregate
//!                           ▼
//!                    durable stores
//! ```
//!
//! The kernel tracks three live views — Committing, Voting and NextRound —
//! plus a state-machine-facing conduit. Outputs are offered only while a
//! view has unsent changes, so a slow or absent consumer can never block
//! ingestion.

mod kernel;
mod state;
mod state_machine_view;
mod vote_distribution;

pub use kernel::{Kernel, KernelConfig, KernelError, KernelHandle};
