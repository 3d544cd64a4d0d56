use std::sync::Arc;

use fieldlift_protocol::{FinalizeRequest, RecordNotifyRequest};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::control::ControlPlane;
use crate::error::UploadError;
use crate::retry::{RetryPolicy, sleep_or_cancel};
use crate::types::UploadJob;

/// Commits a fully uploaded job and notifies the system of record.
pub struct Finalizer {
    control: Arc<dyn ControlPlane>,
    policy: RetryPolicy,
}

impl Finalizer {
    pub fn new(control: Arc<dyn ControlPlane>, policy: RetryPolicy) -> Self {
        Self { control, policy }
    }

    /// Finalizes `job` with `total_chunks` parts.
    ///
    /// Exhausted retries yield [`UploadError::FinalizeFailure`]. A failed
    /// record notification is logged and does not fail the job.
    pub async fn finalize(
        &self,
        job: &UploadJob,
        total_chunks: usize,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let req = FinalizeRequest {
            id: job.id.clone(),
            filename: job.file_name.clone(),
            expected_size: total_chunks as u32,
        };

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let err = match self.control.finalize(&req).await {
                Ok(()) => break,
                Err(e) => e,
            };

            if attempt >= self.policy.max_retries {
                return Err(UploadError::FinalizeFailure(err.to_string()));
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(job = %job.id, attempt, error = %err, ?delay, "finalize failed, retrying");
            sleep_or_cancel(delay, cancel).await?;
            attempt += 1;
        }

        info!(job = %job.id, parts = total_chunks, "upload finalized");

        let notify = RecordNotifyRequest {
            job_id: job.id.clone(),
            destination: job.destination.clone(),
            filename: job.file_name.clone(),
        };
        if let Err(e) = self.control.notify_record(&notify).await {
            warn!(job = %job.id, error = %e, "record notification failed");
        }

        Ok(())
    }
}
