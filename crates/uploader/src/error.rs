//! Upload error types.

use std::time::Duration;

use fieldlift_protocol::JobStatus;
use fieldlift_transfer::TransferError;

/// Errors produced while coordinating an upload.
///
/// The `Display` text is what a failed job stores as its error.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("source file is empty, nothing to upload")]
    EmptySource,

    #[error("presign failed after {attempts} attempts: {last}")]
    PresignExhausted { attempts: u32, last: String },

    #[error("{failed} chunk(s) failed after exhausting retries")]
    ChunkUploadExhausted { failed: usize },

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("HTTP error {0}")]
    HttpError(u16),

    #[error("too many chunk failures ({failed} chunks permanently failed)")]
    TooManyChunkFailures { failed: usize },

    #[error("offline for more than {}s", .0.as_secs())]
    OfflineTimeout(Duration),

    #[error("finalize failed: {0}")]
    FinalizeFailure(String),

    #[error("transfer ended with {done} of {total} chunks complete")]
    TransferIncomplete { done: usize, total: usize },

    #[error("cancelled")]
    Cancelled,

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job store error: {0}")]
    Store(String),

    #[error("transfer error: {0}")]
    Transfer(TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::EmptySource => UploadError::EmptySource,
            other => UploadError::Transfer(other),
        }
    }
}
