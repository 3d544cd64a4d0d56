use serde::{Deserialize, Serialize};

use crate::constants::is_success_status;

// ---------------------------------------------------------------------------
// Presign
// ---------------------------------------------------------------------------

/// Asks the control plane for one destination URL per part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignRequest {
    pub id: String,
    pub filename: String,
    pub filetype: String,
    pub total_parts: u32,
}

/// Presign response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignResponse {
    pub status: String,
    #[serde(default)]
    pub result: Option<PresignResult>,
}

/// Payload of a successful presign response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresignResult {
    #[serde(default)]
    pub presign_urls: Vec<String>,
}

impl PresignResponse {
    /// Returns `true` if the body-level status denotes success.
    pub fn is_success(&self) -> bool {
        is_success_status(&self.status)
    }

    /// Consumes the response and returns its URLs (empty if absent).
    pub fn into_urls(self) -> Vec<String> {
        self.result.map(|r| r.presign_urls).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Finalize
// ---------------------------------------------------------------------------

/// Commits an upload once every part has been written.
///
/// `expected_size` carries the number of parts the control plane should
/// assemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub id: String,
    pub filename: String,
    pub expected_size: u32,
}

/// Finalize response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub status: String,
}

impl FinalizeResponse {
    /// Returns `true` if the body-level status denotes success.
    pub fn is_success(&self) -> bool {
        is_success_status(&self.status)
    }
}

// ---------------------------------------------------------------------------
// System-of-record notification
// ---------------------------------------------------------------------------

/// Tells the downstream system of record that an upload was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordNotifyRequest {
    pub job_id: String,
    pub destination: String,
    pub filename: String,
}
