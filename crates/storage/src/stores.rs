//! The four store traits and their shared error type.

use argus_types::{
    CommittedBlock, Hash, NetworkHeightRound, ProofMap, ProposedBlock, PublicKey,
};
use thiserror::Error;

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("record not found")]
    NotFound,

    /// A stored record could not be interpreted.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The backend failed.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Persists the mirror's network height/round pointer.
pub trait MirrorStore: Send + Sync {
    /// The stored pointer, or `None` when the store has never been written.
    ///
    /// Any `Err` here aborts kernel startup.
    fn network_height_round(&self) -> Result<Option<NetworkHeightRound>, StoreError>;

    /// Overwrite the stored pointer.
    fn set_network_height_round(&self, nhr: NetworkHeightRound) -> Result<(), StoreError>;
}

/// Persists committed blocks with their commit evidence.
pub trait BlockStore: Send + Sync {
    /// Store a committed block at its height.
    fn save_block(&self, block: &CommittedBlock) -> Result<(), StoreError>;

    /// Load the committed block at a height.
    ///
    /// Returns [`StoreError::NotFound`] when no block was committed there.
    fn load_block(&self, height: u64) -> Result<CommittedBlock, StoreError>;
}

/// Everything the round store knows about one `(height, round)`.
#[derive(Debug, Default)]
pub struct RoundState {
    /// Proposed blocks in arrival order.
    pub proposed_blocks: Vec<ProposedBlock>,
    /// Prevote proofs per voted block hash.
    pub prevote_proofs: ProofMap,
    /// Precommit proofs per voted block hash.
    pub precommit_proofs: ProofMap,
}

/// Persists per-round proposed blocks and vote proofs.
///
/// Proof maps are overwritten wholesale: the kernel owns the authoritative
/// copy and the store only mirrors the latest state for restart recovery.
pub trait RoundStore: Send + Sync {
    /// Append a proposed block to its round.
    fn save_proposed_block(&self, pb: &ProposedBlock) -> Result<(), StoreError>;

    /// Replace the stored prevote proofs for a round.
    fn overwrite_prevote_proofs(
        &self,
        height: u64,
        round: u32,
        proofs: &ProofMap,
    ) -> Result<(), StoreError>;

    /// Replace the stored precommit proofs for a round.
    fn overwrite_precommit_proofs(
        &self,
        height: u64,
        round: u32,
        proofs: &ProofMap,
    ) -> Result<(), StoreError>;

    /// Load everything stored for a round.
    ///
    /// Returns `Ok(None)` for a round that was never visited; that is not
    /// an error.
    fn load_round_state(&self, height: u64, round: u32) -> Result<Option<RoundState>, StoreError>;
}

/// Content-addressed registry of validator key and power lists.
///
/// Saving an already-stored list is not an error; the returned hash is the
/// list's identity either way.
pub trait ValidatorStore: Send + Sync {
    /// Store an ordered public key list, returning its content hash.
    fn save_pub_keys(&self, pub_keys: &[PublicKey]) -> Result<Hash, StoreError>;

    /// Store an ordered vote power list, returning its content hash.
    fn save_vote_powers(&self, powers: &[u64]) -> Result<Hash, StoreError>;

    /// Load a public key list by its content hash.
    fn load_pub_keys(&self, hash: Hash) -> Result<Vec<PublicKey>, StoreError>;

    /// Load a vote power list by its content hash.
    fn load_vote_powers(&self, hash: Hash) -> Result<Vec<u64>, StoreError>;
}
