//! In-memory store implementations.
//!
//! Implements every argus store trait over `Mutex<HashMap>` state, for
//! deterministic tests and simulation. Proof maps are cloned on the way in
//! and out, so a stored round can never alias the kernel's live state.

mod storage;

pub use storage::{
    MemoryBlockStore, MemoryMirrorStore, MemoryRoundStore, MemoryValidatorStore,
};
