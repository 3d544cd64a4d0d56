use std::time::Duration;

use fieldlift_protocol::constants::DEFAULT_MIME_TYPE;
use fieldlift_transfer::DEFAULT_CHUNK_SIZE;

use crate::retry::RetryPolicy;

/// Tunables for the upload coordinator.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub chunk_size: u64,
    /// In-flight PUTs per job for the direct strategy.
    pub concurrency: usize,
    pub mime_type: String,
    /// Applies to presign and finalize.
    pub control_retry: RetryPolicy,
    pub chunk_retry: RetryPolicy,
    pub offline_poll_interval: Duration,
    pub offline_timeout: Duration,
    /// A job aborts once more chunks than this have permanently failed.
    pub chunk_failure_threshold: usize,
    pub max_active_jobs: usize,
    pub queue_poll_interval: Duration,
    /// Paused jobs are picked up by the queue processor like pending ones.
    pub auto_resume_paused: bool,
    pub event_capacity: usize,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 4,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            control_retry: RetryPolicy::control_plane(),
            chunk_retry: RetryPolicy::chunk(),
            offline_poll_interval: Duration::from_secs(5),
            offline_timeout: Duration::from_secs(120),
            chunk_failure_threshold: 10,
            max_active_jobs: 1,
            queue_poll_interval: Duration::from_secs(10),
            auto_resume_paused: false,
            event_capacity: 256,
        }
    }
}
