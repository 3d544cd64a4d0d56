//! User-facing notifications.

use tracing::info;

/// Fire-and-forget sink for user notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(target: "fieldlift::notify", title, body, "notification");
    }
}

pub(crate) const TITLE_STARTED: &str = "Upload Started";
pub(crate) const TITLE_PROGRESS: &str = "Uploading...";
pub(crate) const TITLE_COMPLETE: &str = "Upload Complete";
pub(crate) const TITLE_FAILED: &str = "Upload Failed";
