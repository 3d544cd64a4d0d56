//! Per-job actor.
//!
//! A runner owns one job attempt from `uploading` to a terminal or paused
//! state. It is the only writer of that job's status, progress, error and
//! transport handles while it runs; chunk events from the strategy are
//! folded in one at a time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fieldlift_protocol::JobStatus;
use fieldlift_transfer::{ProgressAggregator, plan_chunks, validate_source};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::finalize::Finalizer;
use crate::notify::{
    NotificationSink, TITLE_COMPLETE, TITLE_FAILED, TITLE_PROGRESS, TITLE_STARTED,
};
use crate::presign::PresignClient;
use crate::state;
use crate::store::JobStore;
use crate::strategy::{ChunkEvent, PlannedPart, TransferContext, TransferStrategy};
use crate::types::{JobPatch, TransportHandle, UploadEvent, UploadJob};

/// How a job run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Paused,
    Removed,
}

/// Service objects shared by every runner.
pub(crate) struct Services {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) presigner: PresignClient,
    pub(crate) finalizer: Finalizer,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) config: UploaderConfig,
    pub(crate) events: mpsc::Sender<UploadEvent>,
}

impl Services {
    /// Publishes an event without waiting. Drops it if the channel is full.
    pub(crate) fn emit(&self, event: UploadEvent) {
        if let Err(mpsc::error::TrySendError::Full(ev)) = self.events.try_send(event) {
            warn!(event = ?ev, "upload event channel full, dropping event");
        }
    }

    /// Writes `patch` and publishes the resulting status, if it changed one.
    pub(crate) fn apply(&self, job_id: &str, patch: &JobPatch) -> Result<UploadJob, UploadError> {
        let job = self.store.update(job_id, patch)?;
        if patch.status.is_some() {
            self.emit(UploadEvent::StatusChanged {
                job_id: job.id.clone(),
                status: job.status,
                error: job.error.clone(),
            });
        }
        Ok(job)
    }
}

/// Drives a single job attempt.
pub(crate) struct JobRunner<'a> {
    services: &'a Services,
    strategy: &'a dyn TransferStrategy,
    cancel: CancellationToken,
    discard: &'a AtomicBool,
}

/// Mutable per-attempt bookkeeping.
struct Attempt {
    progress: ProgressAggregator,
    reported: u8,
    handles: BTreeMap<u32, TransportHandle>,
}

impl<'a> JobRunner<'a> {
    /// `discard` is read when the run is cancelled: set means the job is
    /// being removed, unset means it is being paused.
    pub(crate) fn new(
        services: &'a Services,
        strategy: &'a dyn TransferStrategy,
        cancel: CancellationToken,
        discard: &'a AtomicBool,
    ) -> Self {
        Self {
            services,
            strategy,
            cancel,
            discard,
        }
    }

    pub(crate) async fn run(&self, job_id: &str) -> Result<JobOutcome, UploadError> {
        let job = self.load(job_id)?;
        let job = self
            .services
            .apply(job_id, &state::transition(&job, JobStatus::Uploading)?)?;
        info!(job = %job.id, strategy = ?self.strategy.kind(), file = %job.file_name, "upload started");
        self.notify(TITLE_STARTED, &format!("Uploading {}", job.file_name));

        let result = self.attempt(&job).await;
        self.strategy.release(&job.id).await;

        let current = self.load(job_id)?;
        match result {
            Ok(()) => {
                self.services
                    .apply(job_id, &state::transition(&current, JobStatus::Completed)?)?;
                info!(job = %job_id, "upload completed");
                self.notify(TITLE_COMPLETE, &format!("{} uploaded", current.file_name));
                Ok(JobOutcome::Completed)
            }
            Err(UploadError::Cancelled) if self.discard.load(Ordering::SeqCst) => {
                self.services.store.remove(job_id)?;
                self.services.emit(UploadEvent::Removed {
                    job_id: job_id.to_string(),
                });
                info!(job = %job_id, "upload cancelled and removed");
                Ok(JobOutcome::Removed)
            }
            Err(UploadError::Cancelled) => {
                self.services
                    .apply(job_id, &state::transition(&current, JobStatus::Paused)?)?;
                info!(job = %job_id, progress = current.progress, "upload paused");
                Ok(JobOutcome::Paused)
            }
            Err(e) => {
                error!(job = %job_id, error = %e, "upload failed");
                self.services
                    .apply(job_id, &state::failure(&current, &e)?)?;
                let message = e.to_string();
                self.notify(TITLE_FAILED, &message);
                Ok(JobOutcome::Failed(message))
            }
        }
    }

    /// Plans, presigns, transfers and finalizes. Always starts from chunk 0.
    async fn attempt(&self, job: &UploadJob) -> Result<(), UploadError> {
        let config = &self.services.config;

        let size = validate_source(&job.source.locator).await?;
        let chunks = plan_chunks(size, config.chunk_size)?;
        let total = chunks.len();
        debug!(job = %job.id, size, parts = total, "chunks planned");

        let urls = self
            .services
            .presigner
            .request(&job.id, &job.file_name, &job.mime_type, total, &self.cancel)
            .await?;
        let parts = chunks
            .into_iter()
            .zip(urls)
            .map(|(chunk, url)| PlannedPart { chunk, url })
            .collect();

        let (tx, mut rx) = mpsc::channel(config.event_capacity.max(1));
        let mut transfer = self.strategy.transfer(TransferContext {
            job_id: job.id.clone(),
            source: job.source.locator.clone(),
            parts,
            events: tx,
            cancel: self.cancel.clone(),
        });
        let mut transfer_done = false;
        let mut events_open = true;

        let mut attempt = Attempt {
            progress: ProgressAggregator::new(total),
            reported: 0,
            handles: BTreeMap::new(),
        };

        while !attempt.progress.all_done() {
            if transfer_done && !events_open {
                let done = (0..total)
                    .filter(|&i| attempt.progress.chunk(i) == Some(100))
                    .count();
                return Err(UploadError::TransferIncomplete { done, total });
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                res = &mut transfer, if !transfer_done => {
                    transfer_done = true;
                    res?;
                }
                ev = rx.recv(), if events_open => match ev {
                    Some(ev) => self.on_chunk_event(&job.id, ev, &mut attempt)?,
                    None => events_open = false,
                },
            }
        }

        self.services
            .finalizer
            .finalize(job, total, &self.cancel)
            .await
    }

    fn on_chunk_event(
        &self,
        job_id: &str,
        event: ChunkEvent,
        attempt: &mut Attempt,
    ) -> Result<(), UploadError> {
        match event {
            ChunkEvent::Submitted { index, handle } => {
                if attempt.progress.chunk(index as usize) == Some(100) {
                    return Ok(());
                }
                trace!(job = %job_id, chunk = index, handle = %handle, "handle recorded");
                attempt.handles.insert(index, handle);
                self.services
                    .store
                    .update(job_id, &JobPatch::handles(attempt.handles.clone()))?;
            }
            ChunkEvent::Progress { index, pct } => {
                trace!(job = %job_id, chunk = index, pct, "chunk progress");
                // Only a successful completion moves a chunk to 100.
                let pct = attempt.progress.update(index as usize, pct.min(99));
                self.report_progress(job_id, pct, attempt)?;
            }
            ChunkEvent::Completed {
                index,
                status,
                etag,
            } => {
                debug!(job = %job_id, chunk = index, status, etag = ?etag, "chunk completed");
                if attempt.handles.remove(&index).is_some() {
                    self.services
                        .store
                        .update(job_id, &JobPatch::handles(attempt.handles.clone()))?;
                }
                let pct = attempt.progress.complete(index as usize);
                self.report_progress(job_id, pct, attempt)?;
            }
            ChunkEvent::Failed {
                index,
                error,
                fatal,
            } => {
                if fatal {
                    return Err(error);
                }
                warn!(job = %job_id, chunk = index, error = %error, "chunk failed");
            }
        }
        Ok(())
    }

    /// Persists and publishes job progress when it moves forward.
    fn report_progress(
        &self,
        job_id: &str,
        pct: u8,
        attempt: &mut Attempt,
    ) -> Result<(), UploadError> {
        if pct <= attempt.reported {
            return Ok(());
        }
        attempt.reported = pct;
        self.services.store.update(job_id, &JobPatch::progress(pct))?;
        self.services.emit(UploadEvent::Progress {
            job_id: job_id.to_string(),
            progress: pct,
        });
        self.notify(TITLE_PROGRESS, &format!("{pct}% complete"));
        Ok(())
    }

    fn load(&self, job_id: &str) -> Result<UploadJob, UploadError> {
        self.services
            .store
            .get(job_id)?
            .ok_or_else(|| UploadError::JobNotFound(job_id.to_string()))
    }

    fn notify(&self, title: &str, body: &str) {
        self.services.notifier.notify(title, body);
    }
}
