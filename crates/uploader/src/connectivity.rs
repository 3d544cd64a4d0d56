use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::control::Reachability;
use crate::error::UploadError;
use crate::retry::sleep_or_cancel;

/// Stalls a job's transfers while the network is unreachable.
///
/// One gate is shared by all chunk tasks of a job. While any task is
/// waiting for connectivity it holds the gate, so [`checkpoint`] blocks
/// the batcher from starting new chunks. Once the outage outlasts the
/// timeout the gate trips and every caller gets
/// [`UploadError::OfflineTimeout`].
///
/// [`checkpoint`]: ConnectivityGate::checkpoint
pub struct ConnectivityGate {
    probe: Arc<dyn Reachability>,
    poll_interval: Duration,
    timeout: Duration,
    waiting: Mutex<()>,
    tripped: AtomicBool,
}

impl ConnectivityGate {
    pub fn new(probe: Arc<dyn Reachability>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            probe,
            poll_interval,
            timeout,
            waiting: Mutex::new(()),
            tripped: AtomicBool::new(false),
        }
    }

    /// Waits for any in-progress offline wait to finish.
    pub async fn checkpoint(&self) -> Result<(), UploadError> {
        let _guard = self.waiting.lock().await;
        self.check_tripped()
    }

    /// Probes reachability, waiting out an outage if there is one.
    pub async fn ensure_online(&self, cancel: &CancellationToken) -> Result<(), UploadError> {
        let _guard = self.waiting.lock().await;
        self.check_tripped()?;

        if self.probe.is_reachable().await {
            return Ok(());
        }

        warn!(timeout = ?self.timeout, "network unreachable, pausing transfers");
        let offline_since = Instant::now();
        loop {
            sleep_or_cancel(self.poll_interval, cancel).await?;

            if self.probe.is_reachable().await {
                info!(offline_for = ?offline_since.elapsed(), "network reachable again");
                return Ok(());
            }
            if offline_since.elapsed() >= self.timeout {
                self.tripped.store(true, Ordering::SeqCst);
                return Err(UploadError::OfflineTimeout(self.timeout));
            }
        }
    }

    fn check_tripped(&self) -> Result<(), UploadError> {
        if self.tripped.load(Ordering::SeqCst) {
            Err(UploadError::OfflineTimeout(self.timeout))
        } else {
            Ok(())
        }
    }
}
