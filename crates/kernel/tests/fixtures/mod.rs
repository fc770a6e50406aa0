//! Channel harness around a spawned kernel.
//!
//! Output observation goes through a [`ViewLog`]: every message pumped off
//! any output channel is recorded, so one helper consuming a gossip update
//! can never lose information another assertion needs. Await helpers scan
//! the log first and pump until their predicate matches.

use argus_core::{
    AddVoteRequest, AddVoteResult, NetworkViewUpdate, PbCheckRequest, PbCheckResponse,
    ProposedBlockFetchRequest, ProposedBlockFetcher, RvFieldFlags, Snapshot, SnapshotRequest,
    StateMachineRoundActionSet, ViewLookupRequest, ViewLookupResponse, VoteUpdate,
};
use argus_kernel::{Kernel, KernelConfig, KernelHandle};
use argus_storage_memory::{
    MemoryBlockStore, MemoryMirrorStore, MemoryRoundStore, MemoryValidatorStore,
};
use argus_test_helpers::TestCommittee;
use argus_types::{
    Blake3HashScheme, Hash, NetworkHeightRound, ProposedBlock, SimpleProofScheme,
    StandardSignatureScheme, VersionedRoundView, VoteKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// How long harness helpers wait before declaring the kernel stuck.
pub const RECV_DEADLINE: Duration = Duration::from_secs(2);

/// Everything observed on the kernel's output channels, in arrival order
/// per view.
#[derive(Default)]
pub struct ViewLog {
    pub voting: Vec<VersionedRoundView>,
    pub committing: Vec<VersionedRoundView>,
    pub next_round: Vec<VersionedRoundView>,
    pub gossip: Vec<NetworkViewUpdate>,
}

/// A spawned kernel with every channel end the tests need.
pub struct KernelFixture {
    pub committee: TestCommittee,

    pub mirror_store: Arc<MemoryMirrorStore>,
    pub block_store: Arc<MemoryBlockStore>,
    pub round_store: Arc<MemoryRoundStore>,
    pub validator_store: Arc<MemoryValidatorStore>,

    pub cancel: CancellationToken,

    pub add_pb_tx: mpsc::Sender<ProposedBlock>,
    pub add_prevote_tx: mpsc::Sender<AddVoteRequest>,
    pub add_precommit_tx: mpsc::Sender<AddVoteRequest>,
    pub nhr_tx: mpsc::Sender<oneshot::Sender<NetworkHeightRound>>,
    pub snapshot_tx: mpsc::Sender<SnapshotRequest>,
    pub view_lookup_tx: mpsc::Sender<ViewLookupRequest>,
    pub pb_check_tx: mpsc::Sender<PbCheckRequest>,
    pub state_machine_tx: mpsc::Sender<StateMachineRoundActionSet>,
    pub fetched_tx: mpsc::Sender<ProposedBlock>,

    pub sm_view_rx: mpsc::Receiver<VersionedRoundView>,
    pub fetch_requests_rx: mpsc::Receiver<ProposedBlockFetchRequest>,

    pub log: ViewLog,

    voting_rx: mpsc::Receiver<VersionedRoundView>,
    committing_rx: mpsc::Receiver<VersionedRoundView>,
    next_round_rx: mpsc::Receiver<VersionedRoundView>,
    gossip_rx: mpsc::Receiver<NetworkViewUpdate>,
}

impl KernelFixture {
    /// Spawn a kernel over fresh in-memory stores.
    pub fn spawn(committee_size: usize, initial_height: u64) -> (Self, KernelHandle) {
        Self::spawn_with_stores(
            committee_size,
            initial_height,
            Arc::new(MemoryMirrorStore::new()),
            Arc::new(MemoryBlockStore::new()),
            Arc::new(MemoryRoundStore::new()),
            Arc::new(MemoryValidatorStore::new(Arc::new(Blake3HashScheme))),
        )
    }

    /// Spawn a kernel over existing stores, e.g. to exercise restart
    /// recovery.
    pub fn spawn_with_stores(
        committee_size: usize,
        initial_height: u64,
        mirror_store: Arc<MemoryMirrorStore>,
        block_store: Arc<MemoryBlockStore>,
        round_store: Arc<MemoryRoundStore>,
        validator_store: Arc<MemoryValidatorStore>,
    ) -> (Self, KernelHandle) {
        let committee = TestCommittee::new(committee_size);

        let (add_pb_tx, add_pb_rx) = mpsc::channel(16);
        let (add_prevote_tx, add_prevote_rx) = mpsc::channel(16);
        let (add_precommit_tx, add_precommit_rx) = mpsc::channel(16);
        let (nhr_tx, nhr_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = mpsc::channel(16);
        let (view_lookup_tx, view_lookup_rx) = mpsc::channel(16);
        let (pb_check_tx, pb_check_rx) = mpsc::channel(16);
        let (state_machine_tx, state_machine_rx) = mpsc::channel(16);

        let (fetch_requests_tx, fetch_requests_rx) = mpsc::channel(16);
        let (fetched_tx, fetched_rx) = mpsc::channel(16);

        let (voting_tx, voting_rx) = mpsc::channel(8);
        let (committing_tx, committing_rx) = mpsc::channel(8);
        let (next_round_tx, next_round_rx) = mpsc::channel(8);
        let (gossip_tx, gossip_rx) = mpsc::channel(8);
        let (sm_view_tx, sm_view_rx) = mpsc::channel(8);

        let cancel = CancellationToken::new();

        let config = KernelConfig {
            store: mirror_store.clone(),
            block_store: block_store.clone(),
            round_store: round_store.clone(),
            validator_store: validator_store.clone(),
            hash_scheme: Arc::new(Blake3HashScheme),
            signature_scheme: Arc::new(StandardSignatureScheme),
            proof_scheme: Arc::new(SimpleProofScheme),
            initial_height,
            initial_validators: committee.validators().to_vec(),
            fetcher: ProposedBlockFetcher {
                fetch_requests: fetch_requests_tx,
                fetched_blocks: fetched_rx,
            },
            voting_view_out: voting_tx,
            committing_view_out: committing_tx,
            next_round_view_out: next_round_tx,
            gossip_out: gossip_tx,
            state_machine_in: state_machine_rx,
            state_machine_view_out: sm_view_tx,
            nhr_requests: nhr_rx,
            snapshot_requests: snapshot_rx,
            view_lookup_requests: view_lookup_rx,
            pb_check_requests: pb_check_rx,
            add_pb_requests: add_pb_rx,
            add_prevote_requests: add_prevote_rx,
            add_precommit_requests: add_precommit_rx,
        };

        let handle = Kernel::spawn(cancel.clone(), config).expect("kernel must start");

        (
            Self {
                committee,
                mirror_store,
                block_store,
                round_store,
                validator_store,
                cancel,
                add_pb_tx,
                add_prevote_tx,
                add_precommit_tx,
                nhr_tx,
                snapshot_tx,
                view_lookup_tx,
                pb_check_tx,
                state_machine_tx,
                fetched_tx,
                sm_view_rx,
                fetch_requests_rx,
                log: ViewLog::default(),
                voting_rx,
                committing_rx,
                next_round_rx,
                gossip_rx,
            },
            handle,
        )
    }

    /// Pull one message off any output channel into the log.
    async fn pump_one(&mut self) {
        tokio::select! {
            Some(vrv) = self.voting_rx.recv() => self.log.voting.push(vrv),
            Some(vrv) = self.committing_rx.recv() => self.log.committing.push(vrv),
            Some(vrv) = self.next_round_rx.recv() => self.log.next_round.push(vrv),
            Some(update) = self.gossip_rx.recv() => {
                if let Some(vrv) = &update.voting {
                    self.log.voting.push(vrv.clone());
                }
                if let Some(vrv) = &update.committing {
                    self.log.committing.push(vrv.clone());
                }
                if let Some(vrv) = &update.next_round {
                    self.log.next_round.push(vrv.clone());
                }
                self.log.gossip.push(update);
            }
            else => panic!("kernel output channels closed"),
        }
    }

    /// Wait until some observed voting view satisfies `pred`.
    pub async fn await_voting_view(
        &mut self,
        pred: impl Fn(&VersionedRoundView) -> bool,
    ) -> VersionedRoundView {
        timeout(RECV_DEADLINE, async {
            loop {
                if let Some(vrv) = self.log.voting.iter().find(|vrv| pred(vrv)) {
                    return vrv.clone();
                }
                self.pump_one().await;
            }
        })
        .await
        .expect("timed out waiting for voting view")
    }

    /// Wait until some observed committing view satisfies `pred`.
    pub async fn await_committing_view(
        &mut self,
        pred: impl Fn(&VersionedRoundView) -> bool,
    ) -> VersionedRoundView {
        timeout(RECV_DEADLINE, async {
            loop {
                if let Some(vrv) = self.log.committing.iter().find(|vrv| pred(vrv)) {
                    return vrv.clone();
                }
                self.pump_one().await;
            }
        })
        .await
        .expect("timed out waiting for committing view")
    }

    /// Wait until some observed next-round view satisfies `pred`.
    pub async fn await_next_round_view(
        &mut self,
        pred: impl Fn(&VersionedRoundView) -> bool,
    ) -> VersionedRoundView {
        timeout(RECV_DEADLINE, async {
            loop {
                if let Some(vrv) = self.log.next_round.iter().find(|vrv| pred(vrv)) {
                    return vrv.clone();
                }
                self.pump_one().await;
            }
        })
        .await
        .expect("timed out waiting for next round view")
    }

    /// Wait until some observed gossip update satisfies `pred`, returning
    /// its index in the log.
    pub async fn await_gossip(
        &mut self,
        pred: impl Fn(&NetworkViewUpdate) -> bool,
    ) -> usize {
        timeout(RECV_DEADLINE, async {
            loop {
                if let Some(index) = self.log.gossip.iter().position(&pred) {
                    return index;
                }
                self.pump_one().await;
            }
        })
        .await
        .expect("timed out waiting for gossip update")
    }

    /// Build a vote request with a response channel.
    pub fn vote_request(
        &self,
        kind: VoteKind,
        height: u64,
        round: u32,
        block_hash: Option<Hash>,
        signers: &[usize],
        prev_version: u32,
    ) -> (AddVoteRequest, oneshot::Receiver<AddVoteResult>) {
        let proof = self
            .committee
            .vote_proof(kind, height, round, block_hash, signers);
        let mut updates = HashMap::new();
        updates.insert(
            block_hash,
            VoteUpdate {
                proof,
                prev_version,
            },
        );
        let (response_tx, response_rx) = oneshot::channel();
        (
            AddVoteRequest {
                height,
                round,
                updates,
                response: Some(response_tx),
            },
            response_rx,
        )
    }

    /// Submit precommits and assert the kernel's verdict.
    pub async fn send_precommits(
        &mut self,
        height: u64,
        round: u32,
        block_hash: Option<Hash>,
        signers: &[usize],
        prev_version: u32,
        expect: AddVoteResult,
    ) {
        let (req, resp) = self.vote_request(
            VoteKind::Precommit,
            height,
            round,
            block_hash,
            signers,
            prev_version,
        );
        self.add_precommit_tx.send(req).await.expect("kernel gone");
        let result = timeout(RECV_DEADLINE, resp)
            .await
            .expect("timed out waiting for precommit result")
            .expect("kernel dropped the response");
        assert_eq!(result, expect);
    }

    /// Submit prevotes and assert the kernel's verdict.
    pub async fn send_prevotes(
        &mut self,
        height: u64,
        round: u32,
        block_hash: Option<Hash>,
        signers: &[usize],
        prev_version: u32,
        expect: AddVoteResult,
    ) {
        let (req, resp) = self.vote_request(
            VoteKind::Prevote,
            height,
            round,
            block_hash,
            signers,
            prev_version,
        );
        self.add_prevote_tx.send(req).await.expect("kernel gone");
        let result = timeout(RECV_DEADLINE, resp)
            .await
            .expect("timed out waiting for prevote result")
            .expect("kernel dropped the response");
        assert_eq!(result, expect);
    }

    /// Receive the next fetch request.
    pub async fn recv_fetch_request(&mut self) -> ProposedBlockFetchRequest {
        timeout(RECV_DEADLINE, self.fetch_requests_rx.recv())
            .await
            .expect("timed out waiting for fetch request")
            .expect("fetch channel closed")
    }

    /// Wait for a state-machine view emission satisfying `pred`.
    pub async fn await_sm_view(
        &mut self,
        pred: impl Fn(&VersionedRoundView) -> bool,
    ) -> VersionedRoundView {
        timeout(RECV_DEADLINE, async {
            loop {
                let vrv = self
                    .sm_view_rx
                    .recv()
                    .await
                    .expect("state machine view channel closed");
                if pred(&vrv) {
                    return vrv;
                }
            }
        })
        .await
        .expect("timed out waiting for state machine view")
    }

    /// Query the kernel's current network height/round.
    pub async fn network_height_round(&mut self) -> NetworkHeightRound {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.nhr_tx.send(reply_tx).await.expect("kernel gone");
        timeout(RECV_DEADLINE, reply_rx)
            .await
            .expect("timed out waiting for network height/round")
            .expect("kernel dropped the reply")
    }

    /// Take a full snapshot of the voting view.
    pub async fn snapshot_voting(&mut self, fields: RvFieldFlags) -> VersionedRoundView {
        let (ready_tx, ready_rx) = oneshot::channel();
        self.snapshot_tx
            .send(SnapshotRequest {
                snapshot: Snapshot {
                    voting: Some(VersionedRoundView::default()),
                    committing: None,
                },
                fields,
                ready: ready_tx,
            })
            .await
            .expect("kernel gone");
        timeout(RECV_DEADLINE, ready_rx)
            .await
            .expect("timed out waiting for snapshot")
            .expect("kernel dropped the snapshot")
            .voting
            .expect("requested voting view")
    }

    /// Run a view lookup.
    pub async fn lookup_view(
        &mut self,
        height: u64,
        round: u32,
        fields: RvFieldFlags,
    ) -> ViewLookupResponse {
        let (response_tx, response_rx) = oneshot::channel();
        self.view_lookup_tx
            .send(ViewLookupRequest {
                height,
                round,
                fields,
                vrv: VersionedRoundView::default(),
                reason: "test lookup",
                response: response_tx,
            })
            .await
            .expect("kernel gone");
        timeout(RECV_DEADLINE, response_rx)
            .await
            .expect("timed out waiting for view lookup")
            .expect("kernel dropped the lookup response")
    }

    /// Run a proposed-block check.
    pub async fn check_pb(&mut self, pb: ProposedBlock) -> PbCheckResponse {
        let (response_tx, response_rx) = oneshot::channel();
        self.pb_check_tx
            .send(PbCheckRequest {
                pb,
                response: response_tx,
            })
            .await
            .expect("kernel gone");
        timeout(RECV_DEADLINE, response_rx)
            .await
            .expect("timed out waiting for pb check")
            .expect("kernel dropped the pb check response")
    }
}
