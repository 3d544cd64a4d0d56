//! Chunk planning, ranged source reads and progress aggregation for
//! multipart uploads.

mod plan;
mod progress;
mod reader;
mod validation;

pub use plan::{Chunk, plan_chunks};
pub use progress::ProgressAggregator;
pub use reader::{ChunkReader, read_range};
pub use validation::{source_file_name, validate_source};

/// Default part size: 5 MiB.
///
/// Object stores reject multipart parts smaller than this, except the last.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source file is empty, nothing to upload")]
    EmptySource,

    #[error("invalid source path: {0}")]
    InvalidPath(String),

    #[error("byte range {offset}..{end} exceeds source size {size}")]
    RangeOutOfBounds { offset: u64, end: u64, size: u64 },
}
