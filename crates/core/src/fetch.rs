//! Missing proposed-block fetch plumbing.

use argus_types::{Hash, ProposedBlock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Request to fetch a proposed block the kernel has vote evidence for but
/// has not seen.
#[derive(Debug)]
pub struct ProposedBlockFetchRequest {
    /// Cancelled by the kernel when the block arrives by other means or its
    /// view is abandoned. The fetch layer must stop work promptly.
    pub cancel: CancellationToken,

    /// Height the block is expected at.
    pub height: u64,

    /// Hash of the wanted block.
    pub block_hash: Hash,
}

/// The fetch layer's channel pair, as seen by the kernel.
///
/// The kernel pushes requests (non-blocking; the channel should be buffered
/// generously) and receives fetched blocks, which re-enter through the
/// normal proposed-block ingest path.
#[derive(Debug)]
pub struct ProposedBlockFetcher {
    /// Outbound fetch requests.
    pub fetch_requests: mpsc::Sender<ProposedBlockFetchRequest>,

    /// Inbound fetched blocks.
    pub fetched_blocks: mpsc::Receiver<ProposedBlock>,
}
