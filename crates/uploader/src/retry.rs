use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

/// Linear backoff policy for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Added once per prior retry.
    pub step: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration, step: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            step,
        }
    }

    /// Policy for control-plane calls (presign and finalize).
    pub const fn control_plane() -> Self {
        Self::new(5, Duration::from_millis(5000), Duration::from_millis(2000))
    }

    /// Policy for a single chunk PUT.
    pub const fn chunk() -> Self {
        Self::new(5, Duration::from_millis(1000), Duration::from_millis(1000))
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay + self.step * attempt
    }

    /// Total calls including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), UploadError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
