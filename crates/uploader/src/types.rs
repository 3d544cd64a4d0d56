use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldlift_protocol::JobStatus;

/// File the job uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub locator: PathBuf,
    /// Size recorded at enqueue time. Re-read from disk on every attempt.
    pub size: u64,
}

/// Handle assigned by a background transport to one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportHandle(pub String);

impl TransportHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one chunk of one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub job_id: String,
    pub index: u32,
}

/// Unit of work persisted in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub id: String,
    pub source: SourceFile,
    /// Upload-target id known to the control plane.
    pub destination: String,
    pub file_name: String,
    pub mime_type: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub transport_handles: BTreeMap<u32, TransportHandle>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadJob {
    /// Creates a pending job.
    pub fn new(
        id: impl Into<String>,
        source: SourceFile,
        destination: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source,
            destination: destination.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            transport_handles: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to a stored job. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub error: Option<Option<String>>,
    pub transport_handles: Option<BTreeMap<u32, TransportHandle>>,
}

impl JobPatch {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn handles(handles: BTreeMap<u32, TransportHandle>) -> Self {
        Self {
            transport_handles: Some(handles),
            ..Default::default()
        }
    }

    /// True when the patch touches nothing but progress.
    pub fn is_progress_only(&self) -> bool {
        self.progress.is_some()
            && self.status.is_none()
            && self.error.is_none()
            && self.transport_handles.is_none()
    }

    pub fn apply(&self, job: &mut UploadJob) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress;
        }
        if let Some(error) = &self.error {
            job.error = error.clone();
        }
        if let Some(handles) = &self.transport_handles {
            job.transport_handles = handles.clone();
        }
        job.updated_at = Utc::now();
    }
}

/// How chunk bytes reach their destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// The process performs the PUTs itself.
    Direct,
    /// Parts are handed to a background transfer primitive.
    Delegated,
}

/// Process lifecycle, used to pick a strategy when a job starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Foreground,
    Background,
}

/// Events emitted by the upload manager for UI layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UploadEvent {
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        job_id: String,
        status: JobStatus,
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Progress { job_id: String, progress: u8 },
    #[serde(rename_all = "camelCase")]
    Removed { job_id: String },
}
