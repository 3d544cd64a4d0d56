use std::sync::Arc;

use fieldlift_protocol::PresignRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::control::ControlPlane;
use crate::error::UploadError;
use crate::retry::{RetryPolicy, sleep_or_cancel};

/// Obtains one presigned URL per chunk, retrying on failure.
pub struct PresignClient {
    control: Arc<dyn ControlPlane>,
    policy: RetryPolicy,
}

impl PresignClient {
    pub fn new(control: Arc<dyn ControlPlane>, policy: RetryPolicy) -> Self {
        Self { control, policy }
    }

    /// Requests `chunk_count` URLs for `job_id`.
    ///
    /// Transport errors, a non-success body status and a URL count other
    /// than `chunk_count` are all retried. Once the retry budget is spent
    /// the call fails with [`UploadError::PresignExhausted`].
    pub async fn request(
        &self,
        job_id: &str,
        filename: &str,
        mime_type: &str,
        chunk_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, UploadError> {
        let req = PresignRequest {
            id: job_id.to_string(),
            filename: filename.to_string(),
            filetype: mime_type.to_string(),
            total_parts: chunk_count as u32,
        };

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let last = match self.control.presign(&req).await {
                Ok(urls) if urls.len() == chunk_count => {
                    debug!(job = %job_id, parts = chunk_count, "presign ok");
                    return Ok(urls);
                }
                Ok(urls) => format!("expected {chunk_count} URLs, got {}", urls.len()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.policy.max_retries {
                return Err(UploadError::PresignExhausted {
                    attempts: self.policy.max_attempts(),
                    last,
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(job = %job_id, attempt, error = %last, ?delay, "presign failed, retrying");
            sleep_or_cancel(delay, cancel).await?;
            attempt += 1;
        }
    }
}
