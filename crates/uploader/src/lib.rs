//! Chunked, resumable upload coordinator.
//!
//! [`UploadManager`] owns the job queue. Each started job is driven by its
//! own runner, which plans chunks, presigns them, hands them to a
//! [`TransferStrategy`] and finalizes the upload once every chunk is done.

pub mod config;
pub mod connectivity;
pub mod control;
pub mod error;
pub mod finalize;
pub mod manager;
pub mod notify;
pub mod presign;
pub mod retry;
pub mod runner;
pub mod state;
pub mod store;
pub mod strategy;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::UploaderConfig;
pub use control::{BoxFuture, ControlPlane, PartTransport, Reachability};
pub use error::UploadError;
pub use fieldlift_protocol::JobStatus;
pub use manager::{BackgroundServices, UploadManager, UploadServices};
pub use notify::{NotificationSink, TracingNotifier};
pub use retry::RetryPolicy;
pub use runner::JobOutcome;
pub use store::{FileJobStore, JobStore, MemoryJobStore};
pub use strategy::{
    BackgroundTransport, PartSource, SubmitRequest, TransferStrategy, TransportEvent,
    TransportEventKind, TransportRouter,
};
pub use types::{Lifecycle, SourceFile, StrategyKind, TransportHandle, UploadEvent, UploadJob};
