//! Job state machine.
//!
//! ```text
//! pending ──▶ uploading ──▶ completed
//!    ▲          │  ▲  └────▶ failed ──(retry)──┐
//!    │          ▼  │                           │
//!    │         paused                          │
//!    └─────────────────────────────────────────┘
//! ```
//!
//! Every attempt re-uploads all chunks, so entering `uploading` and
//! retrying both reset progress to 0.

use std::collections::BTreeMap;

use fieldlift_protocol::JobStatus;

use crate::error::UploadError;
use crate::types::{JobPatch, UploadJob};

/// Builds the patch that moves `job` to `next`.
///
/// Use [`failure`] to enter `failed`, since that state needs an error.
pub fn transition(job: &UploadJob, next: JobStatus) -> Result<JobPatch, UploadError> {
    check(job.status, next)?;

    let patch = match next {
        JobStatus::Uploading | JobStatus::Pending => JobPatch {
            status: Some(next),
            progress: Some(0),
            error: Some(None),
            transport_handles: Some(BTreeMap::new()),
        },
        JobStatus::Paused => JobPatch {
            status: Some(next),
            transport_handles: Some(BTreeMap::new()),
            ..Default::default()
        },
        JobStatus::Completed => JobPatch {
            status: Some(next),
            progress: Some(100),
            error: Some(None),
            transport_handles: Some(BTreeMap::new()),
        },
        JobStatus::Failed => {
            return Err(UploadError::InvalidTransition {
                from: job.status,
                to: next,
            });
        }
    };
    Ok(patch)
}

/// Builds the patch that moves `job` to `failed` with `error` attached.
pub fn failure(job: &UploadJob, error: &UploadError) -> Result<JobPatch, UploadError> {
    check(job.status, JobStatus::Failed)?;
    Ok(JobPatch {
        status: Some(JobStatus::Failed),
        error: Some(Some(error.to_string())),
        transport_handles: Some(BTreeMap::new()),
        ..Default::default()
    })
}

fn check(from: JobStatus, to: JobStatus) -> Result<(), UploadError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(UploadError::InvalidTransition { from, to })
    }
}
