//! The mirror kernel task: construction, event loop and all state
//! transitions.

use crate::state::{KernelState, View};
use crate::vote_distribution::VoteDistribution;
use argus_core::{
    AddVoteRequest, AddVoteResult, NetworkViewUpdate, PbCheckRequest, PbCheckResponse,
    PbCheckStatus, ProposedBlockFetchRequest, ProposedBlockFetcher, RvFieldFlags, SignedVote,
    SnapshotRequest, StateMachineRoundAction, StateMachineRoundActionSet, StateUpdate, ViewId,
    ViewLookupRequest, ViewLookupResponse, ViewLookupStatus, VoteUpdate,
};
use argus_storage::{BlockStore, MirrorStore, RoundStore, StoreError, ValidatorStore};
use argus_types::{
    byzantine_majority, byzantine_minority, pub_keys, vote_powers, CommitProof, CommittedBlock,
    CommonSignatureProof, Hash, HashScheme, NetworkHeightRound, ProposedBlock, PublicKey,
    SignatureProofScheme, SignatureScheme, SparseSignatureProof, Validator, VersionedRoundView,
    VoteKind, VoteTarget,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Errors aborting kernel construction.
///
/// Once the kernel task is running it never propagates errors out; runtime
/// store failures are logged and tolerated.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The configured initial height is invalid.
    #[error("initial height must be at least 1")]
    InvalidInitialHeight,

    /// Reading the stored network height/round failed.
    #[error("failed to retrieve stored network height/round")]
    LoadNetworkHeightRound(#[source] StoreError),

    /// Seeding the initial network height/round failed.
    #[error("failed to set initial height/round on store")]
    SeedNetworkHeightRound(#[source] StoreError),

    /// Loading a round's stored state failed.
    #[error("failed to load round state for height {height} round {round}")]
    LoadRoundState {
        /// Height of the failing round.
        height: u64,
        /// Round number of the failing round.
        round: u32,
        /// The underlying store failure.
        #[source]
        source: StoreError,
    },

    /// Registering validator identities failed.
    #[error("failed to register validators with the validator store")]
    SaveValidators(#[source] StoreError),

    /// Loading a committed block needed for startup failed.
    #[error("failed to load committed block at height {height}")]
    LoadCommittedBlock {
        /// Height of the missing block.
        height: u64,
        /// The underlying store failure.
        #[source]
        source: StoreError,
    },

    /// The stored committing round does not determine a committing block.
    #[error("cannot determine committing block at height {height} round {round}")]
    MissingCommittingBlock {
        /// Height of the committing round.
        height: u64,
        /// Round number of the committing round.
        round: u32,
    },

    /// No validator set is available for the voting height.
    #[error("no validators available for height {height}")]
    NoValidators {
        /// The uncovered height.
        height: u64,
    },
}

/// Everything the kernel needs at construction.
pub struct KernelConfig {
    /// The mirror's height/round pointer store.
    pub store: Arc<dyn MirrorStore>,
    /// Committed block store.
    pub block_store: Arc<dyn BlockStore>,
    /// Per-round proposed block and proof store.
    pub round_store: Arc<dyn RoundStore>,
    /// Content-addressed validator registry.
    pub validator_store: Arc<dyn ValidatorStore>,

    /// Scheme hashing validator key and power lists.
    pub hash_scheme: Arc<dyn HashScheme>,
    /// Scheme producing canonical vote sign bytes.
    pub signature_scheme: Arc<dyn SignatureScheme>,
    /// Scheme creating empty aggregate signature proofs.
    pub proof_scheme: Arc<dyn SignatureProofScheme>,

    /// First height of the chain, usually 1.
    pub initial_height: u64,
    /// Validator set of the initial height.
    pub initial_validators: Vec<Validator>,

    /// The fetch layer's channel pair.
    pub fetcher: ProposedBlockFetcher,

    /// Per-view publications.
    pub voting_view_out: mpsc::Sender<VersionedRoundView>,
    /// Committing view publications.
    pub committing_view_out: mpsc::Sender<VersionedRoundView>,
    /// Next-round view publications.
    pub next_round_view_out: mpsc::Sender<VersionedRoundView>,

    /// Aggregate updates for the gossip strategy.
    pub gossip_out: mpsc::Sender<NetworkViewUpdate>,

    /// Round action sets from the local state machine.
    pub state_machine_in: mpsc::Receiver<StateMachineRoundActionSet>,
    /// View emissions to the local state machine. Usually mirrors the
    /// voting view, blipping to the committing view during a commit-wait.
    pub state_machine_view_out: mpsc::Sender<VersionedRoundView>,

    /// Network height/round queries.
    pub nhr_requests: mpsc::Receiver<oneshot::Sender<NetworkHeightRound>>,
    /// Snapshot queries.
    pub snapshot_requests: mpsc::Receiver<SnapshotRequest>,
    /// View lookup queries.
    pub view_lookup_requests: mpsc::Receiver<ViewLookupRequest>,
    /// Proposed-block admission checks.
    pub pb_check_requests: mpsc::Receiver<PbCheckRequest>,

    /// Proposed blocks to ingest.
    pub add_pb_requests: mpsc::Receiver<ProposedBlock>,
    /// Prevote updates to ingest.
    pub add_prevote_requests: mpsc::Receiver<AddVoteRequest>,
    /// Precommit updates to ingest.
    pub add_precommit_requests: mpsc::Receiver<AddVoteRequest>,
}

/// Handle to a running kernel task.
pub struct KernelHandle {
    join: JoinHandle<()>,
}

impl KernelHandle {
    /// Wait for the kernel task to finish. It terminates when its
    /// cancellation token fires.
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

/// Input channel ends owned by the kernel task.
struct KernelInputs {
    nhr_requests: mpsc::Receiver<oneshot::Sender<NetworkHeightRound>>,
    snapshot_requests: mpsc::Receiver<SnapshotRequest>,
    view_lookup_requests: mpsc::Receiver<ViewLookupRequest>,
    pb_check_requests: mpsc::Receiver<PbCheckRequest>,
    add_pb_requests: mpsc::Receiver<ProposedBlock>,
    add_prevote_requests: mpsc::Receiver<AddVoteRequest>,
    add_precommit_requests: mpsc::Receiver<AddVoteRequest>,
    fetched_blocks: mpsc::Receiver<ProposedBlock>,
    state_machine_in: mpsc::Receiver<StateMachineRoundActionSet>,
}

/// The mirror kernel.
///
/// Holds the injected collaborators and output channel ends; all mutable
/// state lives in [`KernelState`], owned by the spawned task.
pub struct Kernel {
    store: Arc<dyn MirrorStore>,
    block_store: Arc<dyn BlockStore>,
    round_store: Arc<dyn RoundStore>,
    validator_store: Arc<dyn ValidatorStore>,

    hash_scheme: Arc<dyn HashScheme>,
    signature_scheme: Arc<dyn SignatureScheme>,
    proof_scheme: Arc<dyn SignatureProofScheme>,

    initial_height: u64,
    initial_validators: Vec<Validator>,

    cancel: CancellationToken,

    fetch_requests: mpsc::Sender<ProposedBlockFetchRequest>,

    voting_view_out: mpsc::Sender<VersionedRoundView>,
    committing_view_out: mpsc::Sender<VersionedRoundView>,
    next_round_view_out: mpsc::Sender<VersionedRoundView>,
    gossip_out: mpsc::Sender<NetworkViewUpdate>,
    state_machine_view_out: mpsc::Sender<VersionedRoundView>,
}

impl Kernel {
    /// Construct the kernel and spawn its task.
    ///
    /// Loads the stored network height/round (seeding it at the initial
    /// height on first start), restores the committing and voting views
    /// from the round store, then starts the event loop. The task runs
    /// until `cancel` fires.
    pub fn spawn(
        cancel: CancellationToken,
        config: KernelConfig,
    ) -> Result<KernelHandle, KernelError> {
        if config.initial_height == 0 {
            return Err(KernelError::InvalidInitialHeight);
        }

        let nhr = match config
            .store
            .network_height_round()
            .map_err(KernelError::LoadNetworkHeightRound)?
        {
            Some(nhr) => nhr,
            None => {
                // First start: the voting height is the initial height and
                // the committing height stays zero until the first block
                // reaches commit.
                let nhr = NetworkHeightRound {
                    voting_height: config.initial_height,
                    ..Default::default()
                };
                config
                    .store
                    .set_network_height_round(nhr)
                    .map_err(KernelError::SeedNetworkHeightRound)?;
                nhr
            }
        };

        let KernelConfig {
            store,
            block_store,
            round_store,
            validator_store,
            hash_scheme,
            signature_scheme,
            proof_scheme,
            initial_height,
            initial_validators,
            fetcher,
            voting_view_out,
            committing_view_out,
            next_round_view_out,
            gossip_out,
            state_machine_in,
            state_machine_view_out,
            nhr_requests,
            snapshot_requests,
            view_lookup_requests,
            pb_check_requests,
            add_pb_requests,
            add_prevote_requests,
            add_precommit_requests,
        } = config;

        let ProposedBlockFetcher {
            fetch_requests,
            fetched_blocks,
        } = fetcher;

        let kernel = Kernel {
            store,
            block_store,
            round_store,
            validator_store,
            hash_scheme,
            signature_scheme,
            proof_scheme,
            initial_height,
            initial_validators,
            cancel,
            fetch_requests,
            voting_view_out,
            committing_view_out,
            next_round_view_out,
            gossip_out,
            state_machine_view_out,
        };

        let inputs = KernelInputs {
            nhr_requests,
            snapshot_requests,
            view_lookup_requests,
            pb_check_requests,
            add_pb_requests,
            add_prevote_requests,
            add_precommit_requests,
            fetched_blocks,
            state_machine_in,
        };

        let mut state = KernelState::new(nhr);

        // The committing view loads first: the voting view's validators can
        // depend on the block being committed.
        if nhr.committing_height >= kernel.initial_height {
            kernel.load_initial_committing_view(&mut state)?;
        }
        kernel.load_initial_voting_view(&mut state)?;

        let join = tokio::spawn(kernel.main_loop(inputs, state));

        Ok(KernelHandle { join })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event loop
    // ═══════════════════════════════════════════════════════════════════════

    async fn main_loop(self, mut inputs: KernelInputs, mut state: KernelState) {
        let mut sm_actions: Option<mpsc::Receiver<StateMachineRoundAction>> = None;

        loop {
            // Recompute candidate outputs; a view that has already sent its
            // latest state produces no value and its branch stays disabled,
            // so a slow consumer never blocks input handling.
            let vo_voting =
                (!state.voting.has_been_sent()).then(|| state.voting.outgoing.vrv.clone());
            let vo_committing =
                (!state.committing.has_been_sent()).then(|| state.committing.outgoing.vrv.clone());
            let vo_next_round = (!state.next_round.has_been_sent())
                .then(|| state.next_round.outgoing.vrv.clone());
            let gossip_update = self.gossip_output(&state);
            let sm_output = state.state_machine_output();

            let voting_ready = vo_voting.is_some();
            let committing_ready = vo_committing.is_some();
            let next_round_ready = vo_next_round.is_some();
            let gossip_ready = gossip_update.is_some();
            let sm_ready = sm_output.is_some();

            let gossip_included = gossip_update.as_ref().map(|update| {
                (
                    update.voting.is_some(),
                    update.committing.is_some(),
                    update.next_round.is_some(),
                )
            });
            let sm_version = sm_output.as_ref().map(|vrv| vrv.version);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(
                        committing_height = state.committing.vrv.height,
                        committing_hash = ?state.committing_block.as_ref().map(|b| b.hash),
                        voting_height = state.voting.vrv.height,
                        voting_round = state.voting.vrv.round,
                        state_machine_height = state.state_machine_view.height(),
                        state_machine_round = state.state_machine_view.round(),
                        "Mirror kernel stopping",
                    );
                    for (_, fetch_cancel) in state.in_flight_fetch_pbs.drain() {
                        fetch_cancel.cancel();
                    }
                    return;
                }

                Some(reply) = inputs.nhr_requests.recv() => {
                    let _ = reply.send(NetworkHeightRound {
                        voting_height: state.voting.vrv.height,
                        voting_round: state.voting.vrv.round,
                        committing_height: state.committing.vrv.height,
                        committing_round: state.committing.vrv.round,
                    });
                }

                Some(req) = inputs.snapshot_requests.recv() => {
                    self.send_snapshot_response(&state, req);
                }

                Some(req) = inputs.view_lookup_requests.recv() => {
                    self.send_view_lookup_response(&state, req);
                }

                Some(req) = inputs.pb_check_requests.recv() => {
                    self.send_pb_check_response(&state, req);
                }

                Some(pb) = inputs.add_pb_requests.recv() => {
                    self.add_proposed_block(&mut state, pb);
                }

                Some(req) = inputs.add_prevote_requests.recv() => {
                    self.add_vote(&mut state, VoteKind::Prevote, req);
                }

                Some(req) = inputs.add_precommit_requests.recv() => {
                    self.add_vote(&mut state, VoteKind::Precommit, req);
                }

                res = async {
                    self.voting_view_out.send(vo_voting.expect("branch gated on is_some")).await
                }, if voting_ready => {
                    if res.is_err() {
                        debug!(view = "voting", "View output receiver dropped; marking sent");
                    }
                    state.voting.mark_sent();
                }

                res = async {
                    self.committing_view_out.send(vo_committing.expect("branch gated on is_some")).await
                }, if committing_ready => {
                    if res.is_err() {
                        debug!(view = "committing", "View output receiver dropped; marking sent");
                    }
                    state.committing.mark_sent();
                }

                res = async {
                    self.next_round_view_out.send(vo_next_round.expect("branch gated on is_some")).await
                }, if next_round_ready => {
                    if res.is_err() {
                        debug!(view = "next_round", "View output receiver dropped; marking sent");
                    }
                    state.next_round.mark_sent();
                }

                res = async {
                    self.gossip_out.send(gossip_update.expect("branch gated on is_some")).await
                }, if gossip_ready => {
                    if res.is_err() {
                        debug!("Gossip output receiver dropped; marking views sent");
                    }
                    let (voting, committing, next_round) =
                        gossip_included.expect("branch gated on is_some");
                    if voting {
                        state.voting.mark_sent();
                    }
                    if committing {
                        state.committing.mark_sent();
                    }
                    if next_round {
                        state.next_round.mark_sent();
                    }
                    // A nil-voted round is delivered at most once.
                    state.nil_voted_round = None;
                }

                res = async {
                    self.state_machine_view_out.send(sm_output.expect("branch gated on is_some")).await
                }, if sm_ready => {
                    if res.is_err() {
                        debug!("State machine view receiver dropped; marking sent");
                    }
                    state
                        .state_machine_view
                        .mark_sent(sm_version.expect("branch gated on is_some"));
                }

                Some(pb) = inputs.fetched_blocks.recv() => {
                    // Fetched blocks take the same path as direct adds.
                    self.add_proposed_block(&mut state, pb);
                }

                Some(action_set) = inputs.state_machine_in.recv() => {
                    sm_actions =
                        Some(self.handle_state_machine_round_update(&mut state, action_set));
                }

                action = recv_action(&mut sm_actions), if sm_actions.is_some() => {
                    match action {
                        Some(action) => self.handle_state_machine_action(&mut state, action),
                        // The state machine closed this round's action
                        // channel; a new one arrives with its next round.
                        None => sm_actions = None,
                    }
                }
            }
        }
    }

    fn gossip_output(&self, state: &KernelState) -> Option<NetworkViewUpdate> {
        let mut update = NetworkViewUpdate::default();

        if !state.voting.has_been_sent() {
            let mut vrv = state.voting.outgoing.vrv.clone();
            strip_empty_nil_votes(&mut vrv);
            update.voting = Some(vrv);
        }
        if !state.committing.has_been_sent() {
            let mut vrv = state.committing.outgoing.vrv.clone();
            strip_empty_nil_votes(&mut vrv);
            update.committing = Some(vrv);
        }
        if !state.next_round.has_been_sent() {
            let mut vrv = state.next_round.outgoing.vrv.clone();
            strip_empty_nil_votes(&mut vrv);
            update.next_round = Some(vrv);
        }

        // No version handling for a nil-voted round: whatever was stashed
        // when the round advanced is what goes out.
        if let Some(nil_voted_round) = &state.nil_voted_round {
            update.nil_voted_round = Some(nil_voted_round.clone());
        }

        (!update.is_empty()).then_some(update)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposed block ingest
    // ═══════════════════════════════════════════════════════════════════════

    /// Add a proposed block to the view tracking its round.
    ///
    /// Serves both direct add requests and out-of-band fetched blocks.
    fn add_proposed_block(&self, state: &mut KernelState, pb: ProposedBlock) {
        // Before any other work, cancel an outstanding fetch for this block.
        if let Some(fetch_cancel) = state.in_flight_fetch_pbs.remove(&pb.block.hash) {
            fetch_cancel.cancel();
        }

        let (view_id, _) = state.find_view(pb.block.height, pb.round);
        let Some(view_id) = view_id else {
            info!(
                pb_height = pb.block.height,
                pb_round = pb.round,
                voting_height = state.voting.vrv.height,
                voting_round = state.voting.vrv.round,
                "Dropping proposed block that did not match a view (may have been received immediately before a view shift)",
            );
            return;
        };

        // Concurrent handlers may have observed the same pre-ingest view
        // and both requested this block; the adds are serialized here, so
        // dedup by signature. Two distinct blocks cannot share one.
        if state
            .view(view_id)
            .vrv
            .proposed_blocks
            .iter()
            .any(|have| have.signature == pb.signature)
        {
            return;
        }

        if let Err(e) = self.round_store.save_proposed_block(&pb) {
            warn!(
                height = pb.block.height,
                round = pb.round,
                error = %e,
                "Failed to save proposed block to round store; this may cause issues upon restart",
            );
        }

        let pb_height = pb.block.height;
        let pb_hash = pb.block.hash;
        let prev_commit_proof = pb.block.prev_commit_proof.clone();

        let view = state.view_mut(view_id);
        view.vrv.proposed_blocks.push(pb);
        view.update_outgoing();

        if view_id != ViewId::Voting && view_id != ViewId::NextRound {
            // The rest of this method assumes the block merged into the
            // current height.
            return;
        }

        // The block may carry commit evidence for the previous height.
        self.backfill_commit_proof(state, pb_height, &prev_commit_proof);

        // If precommits for this block arrived before the block itself, the
        // voting round may already be decided; re-check now that the block
        // is present. Next-round votes were already handled when they
        // crossed the minority threshold.
        if view_id == ViewId::Voting
            && state.voting.vrv.precommit_proofs.contains_key(&Some(pb_hash))
        {
            if let Err(e) = self.check_voting_precommit_view_shift(state) {
                warn!(
                    error = %e,
                    "Error while checking view shift after proposed block arrival; kernel may be in bad state",
                );
            }
        }
    }

    /// Merge a later block's prev-commit evidence into the committing view.
    fn backfill_commit_proof(
        &self,
        state: &mut KernelState,
        pb_height: u64,
        commit_proof: &CommitProof,
    ) {
        if commit_proof.proofs.is_empty() || pb_height == 0 {
            return;
        }

        let mut merged_any = false;
        for (block_hash, signatures) in &commit_proof.proofs {
            let Some(target) = state.committing.vrv.precommit_proofs.get_mut(block_hash) else {
                // A proposer claiming commit signatures for a block the
                // committing view never saw is violating the protocol; its
                // evidence for that hash is unusable.
                warn!(
                    height = pb_height - 1,
                    block_hash = ?block_hash,
                    "Dropping backfill precommits for a block unknown to the committing view",
                );
                continue;
            };

            let sparse = SparseSignatureProof {
                pub_key_hash: commit_proof.pub_key_hash,
                signatures: signatures.clone(),
            };
            let merge = target.merge_sparse(&sparse);
            merged_any = merged_any || merge.increased_signatures;
        }

        if !merged_any {
            return;
        }

        if let Err(e) = self.round_store.overwrite_precommit_proofs(
            pb_height - 1,
            commit_proof.round,
            &state.committing.vrv.precommit_proofs,
        ) {
            warn!(
                height = pb_height - 1,
                round = commit_proof.round,
                error = %e,
                "Failed to save backfilled commit info to round store; this may cause issues upon restart",
            );
        }

        state
            .committing
            .vrv
            .round_view
            .recompute_vote_powers(VoteKind::Precommit);
        state.committing.update_outgoing();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vote ingest
    // ═══════════════════════════════════════════════════════════════════════

    /// Merge prevotes or precommits into the view tracking their round.
    ///
    /// Callers computed each update against a snapshotted per-hash version;
    /// an update installs only if its version is still current. The two
    /// vote kinds share this path deliberately — only the post-ingest view
    /// shift checks differ.
    fn add_vote(&self, state: &mut KernelState, kind: VoteKind, req: AddVoteRequest) {
        let AddVoteRequest {
            height,
            round,
            updates,
            response,
        } = req;

        let (view_id, status) = state.find_view(height, round);
        let Some(view_id) = view_id else {
            match status {
                ViewLookupStatus::BeforeCommitting | ViewLookupStatus::Orphaned => {}
                ViewLookupStatus::WrongCommit => {
                    debug!(
                        height,
                        round,
                        kind = kind.as_str(),
                        "Dropping votes for the committing height on a non-committing round",
                    );
                }
                ViewLookupStatus::FutureNotYetTracked => {
                    debug!(
                        height,
                        round,
                        kind = kind.as_str(),
                        "Dropping votes for a round beyond the tracked views",
                    );
                }
                ViewLookupStatus::Found => {
                    unreachable!("find_view returned Found without a view id")
                }
            }
            respond(response, AddVoteResult::OutOfDate);
            return;
        };

        let (all_accepted, any_added) = {
            let view = state.view_mut(view_id);
            let mut all_accepted = true;
            let mut any_added = false;

            for (block_hash, update) in updates {
                if update.prev_version == view.vrv.block_version(kind, &block_hash) {
                    view.vrv.proofs_mut(kind).insert(block_hash, update.proof);
                    view.vrv.bump_block_version(kind, block_hash);
                    any_added = true;
                } else {
                    all_accepted = false;
                }
            }

            if any_added {
                view.vrv.round_view.recompute_vote_powers(kind);
                view.vrv.bump_vote_version(kind);
                view.update_outgoing();
            }

            (all_accepted, any_added)
        };

        if any_added {
            let proofs = state.view(view_id).vrv.proofs(kind);
            let persisted = match kind {
                VoteKind::Prevote => self
                    .round_store
                    .overwrite_prevote_proofs(height, round, proofs),
                VoteKind::Precommit => self
                    .round_store
                    .overwrite_precommit_proofs(height, round, proofs),
            };
            if let Err(e) = persisted {
                warn!(
                    height,
                    round,
                    kind = kind.as_str(),
                    error = %e,
                    "Failed to save votes to round store; this may cause issues upon restart",
                );
            }
        }

        let result = if all_accepted {
            AddVoteResult::Accepted
        } else {
            AddVoteResult::Conflict
        };
        respond(response, result);

        // The updated proofs may reveal a block worth fetching.
        self.check_missing_pbs(state, view_id, kind);

        if result != AddVoteResult::Accepted {
            return;
        }

        match kind {
            VoteKind::Prevote => {
                if view_id == ViewId::NextRound {
                    self.check_next_round_prevote_view_shift(state);
                }
            }
            VoteKind::Precommit => match view_id {
                ViewId::Voting => {
                    if let Err(e) = self.check_voting_precommit_view_shift(state) {
                        warn!(
                            error = %e,
                            "Error while checking view shift for precommit in voting round; kernel may be in bad state",
                        );
                    }
                }
                ViewId::NextRound => {
                    if let Err(e) = self.check_next_round_precommit_view_shift(state) {
                        warn!(
                            error = %e,
                            "Error while checking view shift for precommit in next round; kernel may be in bad state",
                        );
                    }
                }
                // No view shift can originate from the committing view.
                ViewId::Committing => {}
            },
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // View shifts
    // ═══════════════════════════════════════════════════════════════════════

    /// Check whether the voting round's precommits decide the round, and
    /// apply the resulting shift.
    fn check_voting_precommit_view_shift(
        &self,
        state: &mut KernelState,
    ) -> Result<(), StoreError> {
        let (old_height, old_round, available, total_precommit, most_voted, highest_power) = {
            let vrv = &state.voting.vrv;
            let vs = &vrv.vote_summary;
            (
                vrv.height,
                vrv.round,
                vs.available_power,
                vs.total_precommit_power,
                vs.most_voted_precommit_hash,
                vs.most_voted_power(VoteKind::Precommit),
            )
        };

        let maj = byzantine_majority(available);
        if highest_power < maj {
            // No block reached majority power. But with 100% of votes
            // present the round can never decide, so advance anyway.
            if total_precommit == available {
                self.advance_voting_round(state);
                info!(
                    height = old_height,
                    old_round,
                    new_round = old_round + 1,
                    "Shifted voting round due to 100% of votes received without consensus",
                );
            }
            return Ok(());
        }

        let Some(committing_hash) = most_voted else {
            // Nil reached majority: only the round advances.
            self.advance_voting_round(state);
            info!(
                height = old_height,
                old_round,
                new_round = old_round + 1,
                "Shifted voting round due to nil precommit",
            );
            return Ok(());
        };

        if !state.voting.vrv.has_proposed_block(committing_hash) {
            // Decided, but the block itself is missing. Make sure a fetch
            // is running and stay in this round; the ingest path re-checks
            // the shift when the block arrives.
            self.check_missing_pbs(state, ViewId::Voting, VoteKind::Precommit);
            warn!(
                height = old_height,
                round = old_round,
                block_hash = %committing_hash,
                fetch_in_progress = state.in_flight_fetch_pbs.contains_key(&committing_hash),
                "Ready to commit block, but block is not yet available; stuck in this voting round until the block is fetched",
            );
            return Ok(());
        }

        // Commit: the voting view becomes the committing view and a fresh
        // voting view opens at the next height.
        let finalizing_block = state.committing_block.take();
        state.committing = std::mem::take(&mut state.voting);
        state.committing.update_outgoing();

        // Fetches still outstanding were for other blocks of the height
        // that just decided; they can never land in a live view now.
        for (_, fetch_cancel) in state.in_flight_fetch_pbs.drain() {
            fetch_cancel.cancel();
        }

        let committing_block = state
            .committing
            .vrv
            .proposed_blocks
            .iter()
            .find(|pb| pb.block.hash == committing_hash)
            .map(|pb| pb.block.clone())
            .expect("BUG: proposed block vanished between presence check and commit");
        state.committing_block = Some(committing_block);

        let new_height = state.committing.vrv.height + 1;
        let voting_validators = state
            .committing_block
            .as_ref()
            .expect("committing block was just set")
            .next_validators
            .clone();

        let validator_keys = pub_keys(&voting_validators);
        let pub_key_hash = self.hash_scheme.pub_keys(&validator_keys);
        let power_hash = self.hash_scheme.vote_powers(&vote_powers(&voting_validators));
        if let Err(e) = self.validator_store.save_pub_keys(&validator_keys) {
            warn!(error = %e, "Failed to register next height's validator public keys");
        }
        if let Err(e) = self
            .validator_store
            .save_vote_powers(&vote_powers(&voting_validators))
        {
            warn!(error = %e, "Failed to register next height's validator vote powers");
        }

        let mut voting_vrv = VersionedRoundView::default();
        voting_vrv.round_view.height = new_height;
        voting_vrv.round_view.round = 0;
        voting_vrv.round_view.validators = voting_validators.clone();
        voting_vrv.round_view.validator_pub_key_hash = pub_key_hash;
        voting_vrv.round_view.validator_vote_power_hash = power_hash;
        voting_vrv
            .round_view
            .vote_summary
            .set_available_power(&voting_validators);
        voting_vrv.prevote_version = 1;
        voting_vrv.precommit_version = 1;

        let (nil_prevote, nil_precommit) =
            self.initial_nil_proofs(new_height, 0, &validator_keys, pub_key_hash);
        voting_vrv.round_view.prevote_proofs.insert(None, nil_prevote);
        voting_vrv
            .round_view
            .precommit_proofs
            .insert(None, nil_precommit);

        state.voting = View::default();
        state.voting.vrv = voting_vrv;
        state.voting.update_outgoing();

        // Reset the next round in place to reuse its allocations.
        state.next_round.vrv.reset();
        state.next_round.vrv.round_view.height = new_height;
        state.next_round.vrv.round_view.round = 1;
        state.next_round.vrv.round_view.validators = voting_validators;
        state.next_round.vrv.round_view.validator_pub_key_hash = pub_key_hash;
        state.next_round.vrv.round_view.validator_vote_power_hash = power_hash;
        state.next_round.vrv.prevote_version = 1;
        state.next_round.vrv.precommit_version = 1;
        state.next_round.vrv.round_view.vote_summary.available_power =
            state.voting.vrv.vote_summary.available_power;

        let (nil_prevote, nil_precommit) =
            self.initial_nil_proofs(new_height, 1, &validator_keys, pub_key_hash);
        state
            .next_round
            .vrv
            .round_view
            .prevote_proofs
            .insert(None, nil_prevote);
        state
            .next_round
            .vrv
            .round_view
            .precommit_proofs
            .insert(None, nil_precommit);
        state.next_round.update_outgoing();

        if state.voting.vrv.height <= self.initial_height + 1 {
            // There is no block before the initial height to finalize.
            self.persist_network_height_round(state);
            return Ok(());
        }

        let committed = CommittedBlock {
            block: finalizing_block
                .expect("BUG: commit beyond bootstrap without a previous committing block"),
            proof: state
                .committing_block
                .as_ref()
                .expect("committing block was just set")
                .prev_commit_proof
                .clone(),
        };
        self.block_store.save_block(&committed)?;

        info!(
            height = committed.block.height,
            hash = %committed.block.hash,
            next_committing_height = state.committing.vrv.height,
            next_committing_hash = %committing_hash,
            "Committed block",
        );

        self.persist_network_height_round(state);
        Ok(())
    }

    /// Advance voting when a Byzantine minority has precommitted in the
    /// next round.
    fn check_next_round_precommit_view_shift(
        &self,
        state: &mut KernelState,
    ) -> Result<(), StoreError> {
        let vote_summary = state.next_round.vrv.vote_summary.clone();
        let min = byzantine_minority(vote_summary.available_power);
        if vote_summary.total_precommit_power < min {
            return Ok(());
        }

        // At least a minority of the network is precommitting on the next
        // round, so voting moves there.
        let old_height = state.next_round.vrv.height;
        self.advance_voting_round(state);
        info!(
            height = old_height,
            new_round = state.voting.vrv.round,
            "Shifted voting round due to minority precommit",
        );

        let maj = byzantine_majority(vote_summary.available_power);
        let max_power = vote_summary
            .precommit_block_power
            .get(&vote_summary.most_voted_precommit_hash)
            .copied()
            .unwrap_or(0);
        if max_power >= maj {
            // The round voting just advanced into already holds a majority
            // precommit, so run the normal decision check immediately:
            // commit if the block is present, or get a fetch in flight.
            self.check_voting_precommit_view_shift(state)?;
        } else if max_power >= min {
            self.check_missing_pbs(state, ViewId::Voting, VoteKind::Precommit);
        }

        Ok(())
    }

    /// Advance voting when a Byzantine minority has prevoted in the next
    /// round.
    fn check_next_round_prevote_view_shift(&self, state: &mut KernelState) {
        let vote_summary = state.next_round.vrv.vote_summary.clone();
        let min = byzantine_minority(vote_summary.available_power);
        if vote_summary.total_prevote_power < min {
            return;
        }

        let old_height = state.next_round.vrv.height;
        self.advance_voting_round(state);
        info!(
            height = old_height,
            new_round = state.voting.vrv.round,
            "Shifted voting round due to minority prevote",
        );

        // A single block crossing the threshold may be worth fetching.
        let max_power = vote_summary
            .prevote_block_power
            .get(&vote_summary.most_voted_prevote_hash)
            .copied()
            .unwrap_or(0);
        if max_power >= min {
            self.check_missing_pbs(state, ViewId::Voting, VoteKind::Prevote);
        }
    }

    /// Move voting forward by one round, making the next round the voting
    /// round.
    fn advance_voting_round(&self, state: &mut KernelState) {
        // If the state machine still points at the advancing round, it must
        // receive the closing snapshot for its commit-wait handling even
        // though the version gate would suppress it.
        if state.state_machine_view.height() == state.voting.vrv.height
            && state.state_machine_view.round() == state.voting.vrv.round
        {
            state.state_machine_view.force_send(state.voting.vrv.clone());
        }

        // Always stash the closing snapshot: nobody else can be assumed to
        // have enough information to know this round concluded. A previous
        // unsent stash would be out of date, so overwrite unconditionally.
        state.nil_voted_round = Some(state.voting.vrv.clone());

        // Whatever accrued in the next round becomes the voting state;
        // swapping the versioned views keeps both allocations alive.
        {
            let voting = &mut state.voting;
            let next_round = &mut state.next_round;
            std::mem::swap(&mut voting.vrv, &mut next_round.vrv);
        }

        state.voting.vrv.version = 0;
        state.voting.update_outgoing();

        state.next_round.vrv.reset_for_same_height();
        state.next_round.vrv.round_view.round = state.voting.vrv.round + 1;

        let height = state.next_round.vrv.height;
        let round = state.next_round.vrv.round;
        let validator_keys = pub_keys(&state.next_round.vrv.validators);
        let pub_key_hash = state.next_round.vrv.validator_pub_key_hash;
        let (nil_prevote, nil_precommit) =
            self.initial_nil_proofs(height, round, &validator_keys, pub_key_hash);
        state
            .next_round
            .vrv
            .round_view
            .prevote_proofs
            .insert(None, nil_prevote);
        state
            .next_round
            .vrv
            .round_view
            .precommit_proofs
            .insert(None, nil_precommit);
        state.next_round.update_outgoing();

        self.persist_network_height_round(state);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Fetch orchestration
    // ═══════════════════════════════════════════════════════════════════════

    /// Issue fetch requests for blocks that have more than minority vote
    /// power but are not present in the voting view and have no fetch in
    /// flight.
    fn check_missing_pbs(&self, state: &mut KernelState, proofs_view: ViewId, kind: VoteKind) {
        let (missing, height, round) = {
            let voting_vrv = &state.voting.vrv;
            let proofs = state.view(proofs_view).vrv.proofs(kind);
            let missing: Vec<Hash> = proofs
                .keys()
                .filter_map(|block_hash| *block_hash)
                .filter(|block_hash| !voting_vrv.has_proposed_block(*block_hash))
                .filter(|block_hash| !state.in_flight_fetch_pbs.contains_key(block_hash))
                .collect();
            (missing, voting_vrv.height, voting_vrv.round)
        };

        if missing.is_empty() {
            return;
        }

        // Fetch only above the Byzantine minority threshold: if every
        // Byzantine validator voted for a nonexistent block, their votes
        // alone must not be able to trigger network traffic.
        let distribution = VoteDistribution::new(
            state.view(proofs_view).vrv.proofs(kind),
            &state.voting.vrv.validators,
        );
        let min = byzantine_minority(distribution.available_vote_power);

        for block_hash in missing {
            if distribution.power_for(Some(block_hash)) < min {
                continue;
            }

            let fetch_cancel = self.cancel.child_token();
            let request = ProposedBlockFetchRequest {
                cancel: fetch_cancel.clone(),
                height,
                block_hash,
            };
            match self.fetch_requests.try_send(request) {
                Ok(()) => {
                    state.in_flight_fetch_pbs.insert(block_hash, fetch_cancel);
                }
                Err(_) => {
                    // The fetch channel ought to be buffered generously
                    // enough to avoid this; every subsequent vote retriggers
                    // the attempt anyway.
                    warn!(
                        height,
                        round,
                        block_hash = %block_hash,
                        "Blocked sending fetch request; kernel may deadlock if this block reaches consensus",
                    );
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Read responders
    // ═══════════════════════════════════════════════════════════════════════

    fn send_snapshot_response(&self, state: &KernelState, req: SnapshotRequest) {
        let SnapshotRequest {
            mut snapshot,
            fields,
            ready,
        } = req;

        if let Some(voting) = snapshot.voting.as_mut() {
            copy_snapshot_view(&state.voting.vrv, voting, fields);
        }
        if let Some(committing) = snapshot.committing.as_mut() {
            copy_snapshot_view(&state.committing.vrv, committing, fields);
        }

        let _ = ready.send(snapshot);
    }

    fn send_view_lookup_response(&self, state: &KernelState, req: ViewLookupRequest) {
        let ViewLookupRequest {
            height,
            round,
            fields,
            mut vrv,
            reason,
            response,
        } = req;

        assert!(!reason.is_empty(), "BUG: view lookup reason must not be empty");

        let (id, status) = state.find_view(height, round);
        if let Some(id) = id {
            copy_snapshot_view(&state.view(id).vrv, &mut vrv, fields);
        }
        trace!(height, round, reason, status = %status, "Answered view lookup");

        let _ = response.send(ViewLookupResponse { id, status, vrv });
    }

    fn send_pb_check_response(&self, state: &KernelState, req: PbCheckRequest) {
        let PbCheckRequest { pb, response } = req;

        let pb_height = pb.block.height;
        let pb_round = pb.round;
        let voting_height = state.voting.vrv.height;
        let voting_round = state.voting.vrv.round;
        let committing_height = state.committing.vrv.height;
        let committing_round = state.committing.vrv.round;

        let mut resp = PbCheckResponse {
            status: PbCheckStatus::RoundTooOld,
            proposer_pub_key: None,
            voting_round_view: None,
        };

        resp.status = if pb_height > voting_height + 1 {
            PbCheckStatus::RoundTooFarInFuture
        } else if pb_height == voting_height + 1 {
            // The caller needs the current voting view to validate the
            // block's prev-commit proofs against this height's votes.
            resp.voting_round_view = Some(state.voting.vrv.round_view.clone());
            PbCheckStatus::NextHeight
        } else if pb_height == voting_height {
            if pb_round == voting_round {
                resolve_pb_check(&pb, &state.voting.vrv, &mut resp)
            } else if pb_round == voting_round + 1 {
                resolve_pb_check(&pb, &state.next_round.vrv, &mut resp)
            } else if pb_round < voting_round {
                PbCheckStatus::RoundTooOld
            } else {
                PbCheckStatus::RoundTooFarInFuture
            }
        } else if state.committing_block.is_some() && pb_height == committing_height {
            if pb_round == committing_round {
                resolve_pb_check(&pb, &state.committing.vrv, &mut resp)
            } else {
                // The height is already decided; proposals for any other
                // round of it can never matter again.
                PbCheckStatus::RoundTooOld
            }
        } else {
            PbCheckStatus::RoundTooOld
        };

        let _ = response.send(resp);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // State machine coordination
    // ═══════════════════════════════════════════════════════════════════════

    /// Rebind the state-machine conduit to a new round and answer with the
    /// matching state.
    ///
    /// Returns the action channel the state machine will use for the round.
    fn handle_state_machine_round_update(
        &self,
        state: &mut KernelState,
        action_set: StateMachineRoundActionSet,
    ) -> mpsc::Receiver<StateMachineRoundAction> {
        let StateMachineRoundActionSet {
            height,
            round,
            pub_key,
            actions,
            state_response,
        } = action_set;

        state.state_machine_view.reset(height, round, pub_key);

        let (view_id, status) = state.find_view(height, round);
        let Some(view_id) = view_id else {
            if status == ViewLookupStatus::BeforeCommitting {
                // The state machine is catching up on an already-committed
                // height; it replays from the block store.
                match self.block_store.load_block(height) {
                    Ok(committed_block) => {
                        let _ = state_response.send(StateUpdate {
                            committed_block: Some(committed_block),
                            ..Default::default()
                        });
                    }
                    Err(e) => {
                        error!(
                            height,
                            error = %e,
                            "Failed to load block for state machine catch-up; dropping the round handoff",
                        );
                    }
                }
                return actions;
            }

            error!(
                height,
                round,
                status = %status,
                voting_height = state.voting.vrv.height,
                voting_round = state.voting.vrv.round,
                "State machine announced a round the kernel does not track; dropping the round handoff",
            );
            return actions;
        };

        let prev_block_hash = match view_id {
            ViewId::Voting => state.committing_block.as_ref().map(|b| b.hash),
            ViewId::Committing => state
                .committing_block
                .as_ref()
                .and_then(|b| b.prev_block_hash),
            ViewId::NextRound => {
                error!(
                    height,
                    round,
                    "State machine announced the next round before the kernel advanced; dropping the round handoff",
                );
                return actions;
            }
        };

        let update = StateUpdate {
            vrv: Some(state.view(view_id).vrv.clone()),
            committed_block: None,
            prev_block_hash,
        };
        let first_version = update.vrv.as_ref().map(|vrv| vrv.version).unwrap_or(0);
        let _ = state_response.send(update);
        state.state_machine_view.mark_first_sent_version(first_version);

        actions
    }

    /// Apply one state machine action: a proposal re-enters the proposed
    /// block path, votes merge into the bound round's proofs.
    fn handle_state_machine_action(
        &self,
        state: &mut KernelState,
        action: StateMachineRoundAction,
    ) {
        match action {
            StateMachineRoundAction::Proposal(pb) => {
                // Works directly on the proposed block with no feedback to
                // the state machine.
                self.add_proposed_block(state, pb);
            }
            StateMachineRoundAction::Prevote(vote) => {
                self.merge_state_machine_vote(state, VoteKind::Prevote, vote);
            }
            StateMachineRoundAction::Precommit(vote) => {
                self.merge_state_machine_vote(state, VoteKind::Precommit, vote);
            }
        }
    }

    fn merge_state_machine_vote(&self, state: &mut KernelState, kind: VoteKind, vote: SignedVote) {
        let height = state.state_machine_view.height();
        let round = state.state_machine_view.round();
        let Some(pub_key) = state.state_machine_view.pub_key() else {
            info!(
                kind = kind.as_str(),
                "Dropping state machine vote without a bound signing key",
            );
            return;
        };

        let (view_id, _) = state.find_view(height, round);
        let view_id = match view_id {
            Some(id @ (ViewId::Voting | ViewId::Committing)) => id,
            _ => {
                info!(
                    req_height = height,
                    req_round = round,
                    voting_height = state.voting.vrv.height,
                    voting_round = state.voting.vrv.round,
                    committing_height = state.committing.vrv.height,
                    committing_round = state.committing.vrv.round,
                    "Dropping state machine vote due to not matching voting or committing view",
                );
                return;
            }
        };

        // Merge into a clone of the existing proof so a failure leaves the
        // view untouched; first votes for a hash seed a fresh proof.
        let (mut proof, prev_version) = {
            let vrv = &state.view(view_id).vrv;
            let proof = match vrv.proofs(kind).get(&vote.target_hash) {
                Some(existing) => existing.clone(),
                None => self.proof_scheme.new_proof(
                    vote.sign_content.clone(),
                    &pub_keys(&vrv.validators),
                    vrv.validator_pub_key_hash,
                ),
            };
            (proof, vrv.block_version(kind, &vote.target_hash))
        };

        if let Err(e) = proof.add_signature(vote.signature, &pub_key) {
            error!(
                height,
                round,
                kind = kind.as_str(),
                error = %e,
                "Failed to add vote signature from state machine",
            );
            return;
        }

        let mut updates = HashMap::with_capacity(1);
        updates.insert(vote.target_hash, VoteUpdate { proof, prev_version });

        // No response channel: the kernel is both caller and handler here.
        self.add_vote(
            state,
            kind,
            AddVoteRequest {
                height,
                round,
                updates,
                response: None,
            },
        );
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Construction helpers
    // ═══════════════════════════════════════════════════════════════════════

    fn initial_nil_proofs(
        &self,
        height: u64,
        round: u32,
        validator_keys: &[PublicKey],
        pub_key_hash: Hash,
    ) -> (
        Box<dyn CommonSignatureProof>,
        Box<dyn CommonSignatureProof>,
    ) {
        let target = VoteTarget {
            height,
            round,
            block_hash: None,
        };
        let prevote = self.proof_scheme.new_proof(
            self.signature_scheme.prevote_sign_bytes(&target),
            validator_keys,
            pub_key_hash,
        );
        let precommit = self.proof_scheme.new_proof(
            self.signature_scheme.precommit_sign_bytes(&target),
            validator_keys,
            pub_key_hash,
        );
        (prevote, precommit)
    }

    /// Load one view's stored round state, registering the validator set
    /// and ensuring nil proofs exist.
    fn load_initial_view(
        &self,
        height: u64,
        round: u32,
        validators: Vec<Validator>,
    ) -> Result<VersionedRoundView, KernelError> {
        let round_state = self
            .round_store
            .load_round_state(height, round)
            .map_err(|source| KernelError::LoadRoundState {
                height,
                round,
                source,
            })?
            .unwrap_or_default();

        let validator_keys = pub_keys(&validators);
        let pub_key_hash = self
            .validator_store
            .save_pub_keys(&validator_keys)
            .map_err(KernelError::SaveValidators)?;
        let power_hash = self
            .validator_store
            .save_vote_powers(&vote_powers(&validators))
            .map_err(KernelError::SaveValidators)?;

        let mut vrv = VersionedRoundView::default();
        vrv.round_view.height = height;
        vrv.round_view.round = round;
        vrv.round_view.validators = validators;
        vrv.round_view.validator_pub_key_hash = pub_key_hash;
        vrv.round_view.validator_vote_power_hash = power_hash;
        vrv.round_view.proposed_blocks = round_state.proposed_blocks;
        vrv.round_view.prevote_proofs = round_state.prevote_proofs;
        vrv.round_view.precommit_proofs = round_state.precommit_proofs;

        // Restored proofs restart their optimistic-concurrency tokens at 1.
        for block_hash in vrv.round_view.prevote_proofs.keys() {
            vrv.prevote_block_versions.insert(*block_hash, 1);
        }
        for block_hash in vrv.round_view.precommit_proofs.keys() {
            vrv.precommit_block_versions.insert(*block_hash, 1);
        }

        if !vrv.prevote_proofs.contains_key(&None) {
            let target = VoteTarget {
                height,
                round,
                block_hash: None,
            };
            let proof = self.proof_scheme.new_proof(
                self.signature_scheme.prevote_sign_bytes(&target),
                &validator_keys,
                pub_key_hash,
            );
            vrv.round_view.prevote_proofs.insert(None, proof);
        }
        if !vrv.precommit_proofs.contains_key(&None) {
            let target = VoteTarget {
                height,
                round,
                block_hash: None,
            };
            let proof = self.proof_scheme.new_proof(
                self.signature_scheme.precommit_sign_bytes(&target),
                &validator_keys,
                pub_key_hash,
            );
            vrv.round_view.precommit_proofs.insert(None, proof);
        }

        let available = &vrv.round_view.validators;
        vrv.round_view.vote_summary.available_power = available.iter().map(|v| v.power).sum();
        vrv.round_view.recompute_vote_powers(VoteKind::Prevote);
        vrv.round_view.recompute_vote_powers(VoteKind::Precommit);

        vrv.prevote_version = 1;
        vrv.precommit_version = 1;

        Ok(vrv)
    }

    fn load_initial_committing_view(&self, state: &mut KernelState) -> Result<(), KernelError> {
        let height = state.committing.vrv.height;
        let round = state.committing.vrv.round;

        let validators = if height <= self.initial_height + 1 {
            self.initial_validators.clone()
        } else {
            // The block before the committing height was finalized when the
            // committing height reached commit, so it is in the block store
            // and names this height's validators.
            self.block_store
                .load_block(height - 1)
                .map_err(|source| KernelError::LoadCommittedBlock {
                    height: height - 1,
                    source,
                })?
                .block
                .next_validators
        };

        let vrv = self.load_initial_view(height, round, validators)?;
        state.committing.vrv = vrv;
        state.committing.update_outgoing();

        // The committing block must be derivable: it is the block with the
        // most precommit power in the stored round.
        let distribution = VoteDistribution::new(
            &state.committing.vrv.precommit_proofs,
            &state.committing.vrv.validators,
        );
        let committing_hash = distribution
            .block_vote_power
            .iter()
            .filter_map(|(block_hash, power)| block_hash.map(|h| (h, *power)))
            .filter(|(_, power)| *power > 0)
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(block_hash, _)| block_hash)
            .ok_or(KernelError::MissingCommittingBlock { height, round })?;

        let committing_block = state
            .committing
            .vrv
            .proposed_blocks
            .iter()
            .find(|pb| pb.block.hash == committing_hash)
            .map(|pb| pb.block.clone())
            .ok_or(KernelError::MissingCommittingBlock { height, round })?;
        state.committing_block = Some(committing_block);

        Ok(())
    }

    /// Load the voting view and prepopulate the next round.
    fn load_initial_voting_view(&self, state: &mut KernelState) -> Result<(), KernelError> {
        let height = state.voting.vrv.height;
        let round = state.voting.vrv.round;

        let validators = if height <= self.initial_height + 1 {
            self.initial_validators.clone()
        } else {
            state
                .committing_block
                .as_ref()
                .map(|block| block.next_validators.clone())
                .ok_or(KernelError::NoValidators { height })?
        };
        if validators.is_empty() {
            return Err(KernelError::NoValidators { height });
        }

        let vrv = self.load_initial_view(height, round, validators.clone())?;
        state.voting.vrv = vrv;
        state.voting.update_outgoing();

        let next_round_vrv = self.load_initial_view(height, round + 1, validators)?;
        state.next_round.vrv = next_round_vrv;
        state.next_round.update_outgoing();

        Ok(())
    }

    fn persist_network_height_round(&self, state: &KernelState) {
        let nhr = NetworkHeightRound {
            voting_height: state.voting.vrv.height,
            voting_round: state.voting.vrv.round,
            committing_height: state.committing.vrv.height,
            committing_round: state.committing.vrv.round,
        };
        if let Err(e) = self.store.set_network_height_round(nhr) {
            warn!(
                voting_height = nhr.voting_height,
                voting_round = nhr.voting_round,
                committing_height = nhr.committing_height,
                error = %e,
                "Failed to persist network height/round; this may cause issues upon restart",
            );
        }
    }
}

/// Receive from the state machine's current action channel, or park when no
/// round is bound.
async fn recv_action(
    actions: &mut Option<mpsc::Receiver<StateMachineRoundAction>>,
) -> Option<StateMachineRoundAction> {
    match actions.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn respond(response: Option<oneshot::Sender<AddVoteResult>>, result: AddVoteResult) {
    if let Some(tx) = response {
        // The receiver may have given up; a dropped response is fine.
        let _ = tx.send(result);
    }
}

/// Remove nil-vote proof entries that carry no signatures.
///
/// The nil entries always exist for bookkeeping, but consumers should not
/// have to filter them out of gossip payloads.
fn strip_empty_nil_votes(vrv: &mut VersionedRoundView) {
    if vrv
        .prevote_proofs
        .get(&None)
        .is_some_and(|proof| proof.signature_bitfield().none())
    {
        vrv.round_view.prevote_proofs.remove(&None);
    }
    if vrv
        .precommit_proofs
        .get(&None)
        .is_some_and(|proof| proof.signature_bitfield().none())
    {
        vrv.round_view.precommit_proofs.remove(&None);
    }
}

fn resolve_pb_check(
    pb: &ProposedBlock,
    vrv: &VersionedRoundView,
    resp: &mut PbCheckResponse,
) -> PbCheckStatus {
    if vrv
        .proposed_blocks
        .iter()
        .any(|have| have.signature == pb.signature)
    {
        return PbCheckStatus::AlreadyHaveSignature;
    }

    match vrv
        .validators
        .iter()
        .find(|validator| validator.pub_key == pb.proposer_pub_key)
    {
        Some(validator) => {
            resp.proposer_pub_key = Some(validator.pub_key);
            PbCheckStatus::Acceptable
        }
        None => PbCheckStatus::SignerUnrecognized,
    }
}

/// Copy the requested fields of `src` into `dst`, reusing `dst`'s allocated
/// capacity.
///
/// Heights, rounds and the overall version always copy; everything else is
/// gated by `fields`, and unrequested fields are cleared so a reused buffer
/// never leaks stale state.
fn copy_snapshot_view(src: &VersionedRoundView, dst: &mut VersionedRoundView, fields: RvFieldFlags) {
    dst.round_view.height = src.height;
    dst.round_view.round = src.round;
    dst.version = src.version;

    dst.round_view.validators.clear();
    if fields.contains(RvFieldFlags::VALIDATORS) {
        dst.round_view.validators.extend_from_slice(&src.validators);
        dst.round_view.validator_pub_key_hash = src.validator_pub_key_hash;
        dst.round_view.validator_vote_power_hash = src.validator_vote_power_hash;
    } else {
        dst.round_view.validator_pub_key_hash = Hash::ZERO;
        dst.round_view.validator_vote_power_hash = Hash::ZERO;
    }

    dst.round_view.proposed_blocks.clear();
    if fields.contains(RvFieldFlags::PROPOSED_BLOCKS) {
        dst.round_view
            .proposed_blocks
            .extend(src.proposed_blocks.iter().cloned());
    }

    dst.round_view.prevote_proofs.clear();
    dst.prevote_block_versions.clear();
    dst.prevote_version = 0;
    if fields.contains(RvFieldFlags::PREVOTES) {
        dst.prevote_version = src.prevote_version;
        for (block_hash, proof) in &src.prevote_proofs {
            dst.round_view
                .prevote_proofs
                .insert(*block_hash, proof.clone());
        }
        dst.prevote_block_versions
            .extend(src.prevote_block_versions.iter());
    }

    dst.round_view.precommit_proofs.clear();
    dst.precommit_block_versions.clear();
    dst.precommit_version = 0;
    if fields.contains(RvFieldFlags::PRECOMMITS) {
        dst.precommit_version = src.precommit_version;
        for (block_hash, proof) in &src.precommit_proofs {
            dst.round_view
                .precommit_proofs
                .insert(*block_hash, proof.clone());
        }
        dst.precommit_block_versions
            .extend(src.precommit_block_versions.iter());
    }

    dst.round_view.vote_summary.reset();
    if fields.contains(RvFieldFlags::VOTE_SUMMARY) {
        let summary = &mut dst.round_view.vote_summary;
        summary.available_power = src.vote_summary.available_power;
        summary.total_prevote_power = src.vote_summary.total_prevote_power;
        summary.total_precommit_power = src.vote_summary.total_precommit_power;
        summary
            .prevote_block_power
            .extend(src.vote_summary.prevote_block_power.iter());
        summary
            .precommit_block_power
            .extend(src.vote_summary.precommit_block_power.iter());
        summary.most_voted_prevote_hash = src.vote_summary.most_voted_prevote_hash;
        summary.most_voted_precommit_hash = src.vote_summary.most_voted_precommit_hash;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_types::{Signature, SimpleProofScheme, Validator};

    fn committee(n: usize) -> Vec<Validator> {
        (0..n)
            .map(|i| Validator {
                pub_key: PublicKey::from_bytes([i as u8; 32]),
                power: 10,
            })
            .collect()
    }

    fn vrv_with_nil_proofs(signers: &[usize]) -> VersionedRoundView {
        let validators = committee(4);
        let keys = pub_keys(&validators);
        let key_hash = Hash::from_bytes(b"kh");

        let mut vrv = VersionedRoundView::default();
        vrv.round_view.validators = validators;
        vrv.round_view.validator_pub_key_hash = key_hash;

        let mut nil_prevote = SimpleProofScheme.new_proof(b"pv".to_vec(), &keys, key_hash);
        for signer in signers {
            nil_prevote
                .add_signature(Signature::from_bytes(vec![*signer as u8]), &keys[*signer])
                .unwrap();
        }
        vrv.round_view.prevote_proofs.insert(None, nil_prevote);
        vrv.round_view
            .precommit_proofs
            .insert(None, SimpleProofScheme.new_proof(b"pc".to_vec(), &keys, key_hash));
        vrv
    }

    #[test]
    fn test_strip_empty_nil_votes() {
        // Empty nil entries are stripped, signed ones survive.
        let mut vrv = vrv_with_nil_proofs(&[0]);
        strip_empty_nil_votes(&mut vrv);
        assert!(vrv.prevote_proofs.contains_key(&None));
        assert!(!vrv.precommit_proofs.contains_key(&None));

        let mut vrv = vrv_with_nil_proofs(&[]);
        strip_empty_nil_votes(&mut vrv);
        assert!(vrv.prevote_proofs.is_empty());
        assert!(vrv.precommit_proofs.is_empty());
    }

    #[test]
    fn test_copy_snapshot_view_field_gating() {
        let mut src = vrv_with_nil_proofs(&[0, 1]);
        src.round_view.height = 7;
        src.round_view.round = 2;
        src.version = 9;
        src.prevote_version = 4;
        src.round_view.recompute_vote_powers(VoteKind::Prevote);
        src.prevote_block_versions.insert(None, 3);

        let mut dst = VersionedRoundView::default();
        copy_snapshot_view(&src, &mut dst, RvFieldFlags::PREVOTES);

        assert_eq!(dst.height, 7);
        assert_eq!(dst.round, 2);
        assert_eq!(dst.version, 9);
        assert_eq!(dst.prevote_version, 4);
        assert_eq!(dst.prevote_block_versions[&None], 3);
        assert_eq!(dst.prevote_proofs[&None].signature_bitfield().count(), 2);

        // Unrequested fields stay empty.
        assert!(dst.validators.is_empty());
        assert!(dst.precommit_proofs.is_empty());
        assert_eq!(dst.vote_summary.available_power, 0);
    }

    #[test]
    fn test_copy_snapshot_view_clears_stale_buffer() {
        let src = vrv_with_nil_proofs(&[0]);

        // A previously used buffer with leftover state.
        let mut dst = vrv_with_nil_proofs(&[0, 1, 2]);
        dst.round_view.recompute_vote_powers(VoteKind::Prevote);
        dst.prevote_block_versions.insert(None, 9);

        copy_snapshot_view(&src, &mut dst, RvFieldFlags::NONE);
        assert!(dst.prevote_proofs.is_empty());
        assert!(dst.prevote_block_versions.is_empty());
        assert!(dst.validators.is_empty());
        assert_eq!(dst.vote_summary.total_prevote_power, 0);
    }

    #[test]
    fn test_resolve_pb_check_statuses() {
        let validators = committee(4);
        let vrv = {
            let mut vrv = VersionedRoundView::default();
            vrv.round_view.validators = validators.clone();
            vrv
        };

        let pb = ProposedBlock {
            block: argus_types::Block {
                hash: Hash::from_bytes(b"b"),
                prev_block_hash: None,
                height: 1,
                prev_commit_proof: CommitProof::default(),
                validators: validators.clone(),
                next_validators: validators.clone(),
                data_id: Hash::ZERO,
            },
            round: 0,
            proposer_pub_key: validators[1].pub_key,
            signature: Signature::from_bytes(vec![1, 2, 3]),
        };

        let mut resp = PbCheckResponse {
            status: PbCheckStatus::RoundTooOld,
            proposer_pub_key: None,
            voting_round_view: None,
        };
        assert_eq!(
            resolve_pb_check(&pb, &vrv, &mut resp),
            PbCheckStatus::Acceptable
        );
        assert_eq!(resp.proposer_pub_key, Some(validators[1].pub_key));

        let mut unknown_signer = pb.clone();
        unknown_signer.proposer_pub_key = PublicKey::from_bytes([99u8; 32]);
        assert_eq!(
            resolve_pb_check(&unknown_signer, &vrv, &mut resp),
            PbCheckStatus::SignerUnrecognized
        );

        let mut vrv_with_pb = vrv.clone();
        vrv_with_pb.round_view.proposed_blocks.push(pb.clone());
        assert_eq!(
            resolve_pb_check(&pb, &vrv_with_pb, &mut resp),
            PbCheckStatus::AlreadyHaveSignature
        );
    }
}
