//! `Mutex<HashMap>`-backed implementations of the store traits.

use argus_storage::{
    BlockStore, MirrorStore, RoundState, RoundStore, StoreError, ValidatorStore,
};
use argus_types::{
    CommittedBlock, Hash, HashScheme, NetworkHeightRound, ProofMap, ProposedBlock, PublicKey,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory [`MirrorStore`].
#[derive(Debug, Default)]
pub struct MemoryMirrorStore {
    nhr: Mutex<Option<NetworkHeightRound>>,
}

impl MemoryMirrorStore {
    /// Create an uninitialized store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MirrorStore for MemoryMirrorStore {
    fn network_height_round(&self) -> Result<Option<NetworkHeightRound>, StoreError> {
        Ok(*self.nhr.lock().unwrap())
    }

    fn set_network_height_round(&self, nhr: NetworkHeightRound) -> Result<(), StoreError> {
        *self.nhr.lock().unwrap() = Some(nhr);
        Ok(())
    }
}

/// In-memory [`BlockStore`].
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: Mutex<HashMap<u64, CommittedBlock>>,
}

impl MemoryBlockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed blocks held.
    pub fn len(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    /// Whether no blocks have been committed.
    pub fn is_empty(&self) -> bool {
        self.blocks.lock().unwrap().is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn save_block(&self, block: &CommittedBlock) -> Result<(), StoreError> {
        self.blocks
            .lock()
            .unwrap()
            .insert(block.block.height, block.clone());
        Ok(())
    }

    fn load_block(&self, height: u64) -> Result<CommittedBlock, StoreError> {
        self.blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[derive(Default)]
struct StoredRound {
    proposed_blocks: Vec<ProposedBlock>,
    prevote_proofs: ProofMap,
    precommit_proofs: ProofMap,
}

/// In-memory [`RoundStore`].
#[derive(Default)]
pub struct MemoryRoundStore {
    rounds: Mutex<HashMap<(u64, u32), StoredRound>>,
}

impl MemoryRoundStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoundStore for MemoryRoundStore {
    fn save_proposed_block(&self, pb: &ProposedBlock) -> Result<(), StoreError> {
        let mut rounds = self.rounds.lock().unwrap();
        let round = rounds.entry((pb.block.height, pb.round)).or_default();
        round.proposed_blocks.push(pb.clone());
        Ok(())
    }

    fn overwrite_prevote_proofs(
        &self,
        height: u64,
        round: u32,
        proofs: &ProofMap,
    ) -> Result<(), StoreError> {
        let mut rounds = self.rounds.lock().unwrap();
        rounds.entry((height, round)).or_default().prevote_proofs = proofs.clone();
        Ok(())
    }

    fn overwrite_precommit_proofs(
        &self,
        height: u64,
        round: u32,
        proofs: &ProofMap,
    ) -> Result<(), StoreError> {
        let mut rounds = self.rounds.lock().unwrap();
        rounds.entry((height, round)).or_default().precommit_proofs = proofs.clone();
        Ok(())
    }

    fn load_round_state(&self, height: u64, round: u32) -> Result<Option<RoundState>, StoreError> {
        let rounds = self.rounds.lock().unwrap();
        Ok(rounds.get(&(height, round)).map(|stored| RoundState {
            proposed_blocks: stored.proposed_blocks.clone(),
            prevote_proofs: stored.prevote_proofs.clone(),
            precommit_proofs: stored.precommit_proofs.clone(),
        }))
    }
}

/// In-memory [`ValidatorStore`], hashing lists with the injected scheme.
pub struct MemoryValidatorStore {
    hash_scheme: Arc<dyn HashScheme>,
    pub_keys: Mutex<HashMap<Hash, Vec<PublicKey>>>,
    powers: Mutex<HashMap<Hash, Vec<u64>>>,
}

impl MemoryValidatorStore {
    /// Create an empty store over the given hash scheme.
    pub fn new(hash_scheme: Arc<dyn HashScheme>) -> Self {
        Self {
            hash_scheme,
            pub_keys: Mutex::new(HashMap::new()),
            powers: Mutex::new(HashMap::new()),
        }
    }
}

impl ValidatorStore for MemoryValidatorStore {
    fn save_pub_keys(&self, pub_keys: &[PublicKey]) -> Result<Hash, StoreError> {
        let hash = self.hash_scheme.pub_keys(pub_keys);
        self.pub_keys
            .lock()
            .unwrap()
            .entry(hash)
            .or_insert_with(|| pub_keys.to_vec());
        Ok(hash)
    }

    fn save_vote_powers(&self, powers: &[u64]) -> Result<Hash, StoreError> {
        let hash = self.hash_scheme.vote_powers(powers);
        self.powers
            .lock()
            .unwrap()
            .entry(hash)
            .or_insert_with(|| powers.to_vec());
        Ok(hash)
    }

    fn load_pub_keys(&self, hash: Hash) -> Result<Vec<PublicKey>, StoreError> {
        self.pub_keys
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn load_vote_powers(&self, hash: Hash) -> Result<Vec<u64>, StoreError> {
        self.powers
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}
