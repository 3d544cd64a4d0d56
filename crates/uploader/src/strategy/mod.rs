//! Transfer strategies.
//!
//! Both variants take a job's planned parts and report per-chunk events on
//! a channel owned by the job runner. Neither touches job state.

pub mod delegated;
pub mod direct;

use std::path::PathBuf;

use fieldlift_transfer::Chunk;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::control::BoxFuture;
use crate::error::UploadError;
use crate::types::{StrategyKind, TransportHandle};

pub use delegated::{
    BackgroundTransport, DelegatedStrategy, PartSource, SubmitRequest, TransportEvent,
    TransportEventKind, TransportRouter,
};
pub use direct::DirectStrategy;

/// A chunk bound to its presigned destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPart {
    pub chunk: Chunk,
    pub url: String,
}

/// Chunk-level event reported to the job runner.
#[derive(Debug)]
pub enum ChunkEvent {
    /// The part was handed to a background transport.
    Submitted { index: u32, handle: TransportHandle },
    /// Bytes-sent progress. Values of 100 are held at 99 until the chunk
    /// completes.
    Progress { index: u32, pct: u8 },
    Completed {
        index: u32,
        status: u16,
        etag: Option<String>,
    },
    /// Terminal failure of one chunk. `fatal` failures end the job at once.
    Failed {
        index: u32,
        error: UploadError,
        fatal: bool,
    },
}

/// Everything a strategy needs for one job attempt.
pub struct TransferContext {
    pub job_id: String,
    pub source: PathBuf,
    pub parts: Vec<PlannedPart>,
    pub events: mpsc::Sender<ChunkEvent>,
    pub cancel: CancellationToken,
}

/// Moves a job's chunks to their destinations.
pub trait TransferStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Drives the transfer.
    ///
    /// Direct transfers resolve once every chunk has settled. Delegated
    /// transfers resolve once every chunk is submitted; completions keep
    /// arriving on `ctx.events` afterwards. An `Err` aborts the job.
    fn transfer(&self, ctx: TransferContext) -> BoxFuture<'_, Result<(), UploadError>>;

    /// Best-effort release of anything still outstanding for `job_id`.
    fn release<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, ()>;
}
