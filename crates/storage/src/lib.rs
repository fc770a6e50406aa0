//! Storage traits for the argus consensus mirror.
//!
//! The mirror kernel persists through four narrow store contracts, injected
//! at construction:
//!
//! - [`MirrorStore`]: the network height/round pointer
//! - [`BlockStore`]: committed blocks
//! - [`RoundStore`]: proposed blocks and vote proofs per round
//! - [`ValidatorStore`]: content-addressed validator key and power lists
//!
//! # Design
//!
//! All methods take `&self` — implementations use interior mutability and
//! must be safe for concurrent calls from the kernel's loop plus the block
//! finalizer. Calls are synchronous and expected to be fast (in-memory or
//! local disk); a blocking store blocks the kernel, which is accepted for
//! simplicity.
//!
//! Failure contract: errors during kernel construction abort startup;
//! errors while persisting incremental updates are logged by the kernel and
//! tolerated, with restart recovery reconstructing state from whatever was
//! last written.

mod stores;

pub use stores::{
    BlockStore, MirrorStore, RoundState, RoundStore, StoreError, ValidatorStore,
};
