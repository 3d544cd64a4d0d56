use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Uploading,
    Paused,
    Failed,
    Completed,
}

impl JobStatus {
    /// Returns `true` for states with no further automatic transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Completed)
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    ///
    /// `Pending → Uploading`, `Uploading → {Completed, Failed, Paused}`,
    /// `Paused → Uploading` (resume) and `Failed → Pending` (retry).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Uploading, Completed)
                | (Uploading, Failed)
                | (Uploading, Paused)
                | (Paused, Uploading)
                | (Failed, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Uploading => "uploading",
            JobStatus::Paused => "paused",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
