//! Upload manager: job control, strategy selection and the queue processor.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use fieldlift_protocol::JobStatus;
use fieldlift_transfer::{source_file_name, validate_source};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::UploaderConfig;
use crate::control::{ControlPlane, PartTransport, Reachability};
use crate::error::UploadError;
use crate::finalize::Finalizer;
use crate::notify::NotificationSink;
use crate::presign::PresignClient;
use crate::runner::{JobRunner, Services};
use crate::state;
use crate::store::JobStore;
use crate::strategy::{
    BackgroundTransport, DelegatedStrategy, DirectStrategy, TransferStrategy, TransportRouter,
};
use crate::types::{Lifecycle, SourceFile, UploadEvent, UploadJob};

/// Background transfer primitive plus the router draining its callbacks.
#[derive(Clone)]
pub struct BackgroundServices {
    pub transport: Arc<dyn BackgroundTransport>,
    pub router: Arc<TransportRouter>,
}

/// External collaborators of the manager.
pub struct UploadServices {
    pub store: Arc<dyn JobStore>,
    pub control: Arc<dyn ControlPlane>,
    pub parts: Arc<dyn PartTransport>,
    pub reachability: Arc<dyn Reachability>,
    /// Without it every job uses the direct strategy.
    pub background: Option<BackgroundServices>,
    pub notifier: Arc<dyn NotificationSink>,
}

struct ActiveJob {
    run_id: u64,
    cancel: CancellationToken,
    discard: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

struct Inner {
    services: Services,
    direct: Arc<dyn TransferStrategy>,
    delegated: Option<Arc<dyn TransferStrategy>>,
    background: Option<BackgroundServices>,
    lifecycle: RwLock<Lifecycle>,
    active: Mutex<HashMap<String, ActiveJob>>,
    next_run: AtomicU64,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Inner {
    fn strategy(&self, lifecycle: Lifecycle) -> Arc<dyn TransferStrategy> {
        match (lifecycle, &self.delegated) {
            (Lifecycle::Background, Some(delegated)) => Arc::clone(delegated),
            _ => Arc::clone(&self.direct),
        }
    }

    /// Drops the active entry for `job_id` if it still belongs to `run_id`.
    fn finish(&self, job_id: &str, run_id: u64) {
        let mut active = self.active.lock().unwrap();
        if active.get(job_id).is_some_and(|a| a.run_id == run_id) {
            active.remove(job_id);
        }
        drop(active);
        self.wake.notify_one();
    }

    fn load(&self, job_id: &str) -> Result<UploadJob, UploadError> {
        self.services
            .store
            .get(job_id)?
            .ok_or_else(|| UploadError::JobNotFound(job_id.to_string()))
    }
}

/// Owns the job queue and every running job.
///
/// Each started job gets its own runner task. The manager never writes a
/// running job's state itself; it only signals the runner.
pub struct UploadManager {
    inner: Arc<Inner>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl UploadManager {
    pub fn new(services: UploadServices, config: UploaderConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));

        let wake = Arc::new(Notify::new());
        let hook_wake = Arc::clone(&wake);
        services.store.on_insert(Box::new(move |job| {
            if job.status == JobStatus::Pending {
                hook_wake.notify_one();
            }
        }));

        let direct: Arc<dyn TransferStrategy> = Arc::new(DirectStrategy::new(
            services.parts,
            services.reachability,
            &config,
        ));
        let delegated = services.background.as_ref().map(|bg| {
            Arc::new(DelegatedStrategy::new(
                Arc::clone(&bg.transport),
                Arc::clone(&bg.router),
            )) as Arc<dyn TransferStrategy>
        });

        let inner = Inner {
            services: Services {
                store: services.store,
                presigner: PresignClient::new(Arc::clone(&services.control), config.control_retry),
                finalizer: Finalizer::new(services.control, config.control_retry),
                notifier: services.notifier,
                config,
                events: events_tx,
            },
            direct,
            delegated,
            background: services.background,
            lifecycle: RwLock::new(Lifecycle::default()),
            active: Mutex::new(HashMap::new()),
            next_run: AtomicU64::new(0),
            wake,
            shutdown: CancellationToken::new(),
        };

        Self {
            inner: Arc::new(inner),
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.services.store
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle.read().unwrap()
    }

    /// Switches the lifecycle used for jobs started from now on.
    pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
        let mut current = self.inner.lifecycle.write().unwrap();
        if *current != lifecycle {
            info!(from = ?*current, to = ?lifecycle, "lifecycle changed");
            *current = lifecycle;
        }
    }

    /// Ids of jobs with a live runner.
    pub fn active_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.active.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, job_id: &str) -> Result<Option<UploadJob>, UploadError> {
        self.inner.services.store.get(job_id)
    }

    pub fn list(&self) -> Result<Vec<UploadJob>, UploadError> {
        self.inner.services.store.list()
    }

    /// Validates `source` and adds a pending job for it.
    pub async fn enqueue(
        &self,
        id: impl Into<String>,
        source: &Path,
        destination: &str,
    ) -> Result<UploadJob, UploadError> {
        let size = validate_source(source).await?;
        let file_name = source_file_name(source)?;
        let job = UploadJob::new(
            id,
            SourceFile {
                locator: source.to_path_buf(),
                size,
            },
            destination,
            file_name,
            self.inner.services.config.mime_type.clone(),
        );
        self.inner.services.store.insert(job.clone())?;
        info!(job = %job.id, file = %job.file_name, size, destination, "upload enqueued");
        Ok(job)
    }

    /// Starts a pending or paused job with the strategy for the current
    /// lifecycle. Starting a job that is already running is a no-op.
    pub fn start(&self, job_id: &str) -> Result<(), UploadError> {
        let mut active = self.inner.active.lock().unwrap();
        if active.contains_key(job_id) {
            debug!(job = %job_id, "job already running");
            return Ok(());
        }

        let job = self.inner.load(job_id)?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Paused) {
            return Err(UploadError::InvalidTransition {
                from: job.status,
                to: JobStatus::Uploading,
            });
        }
        self.spawn_runner(&mut active, job_id);
        Ok(())
    }

    /// Pauses a running job and waits for its runner to stop.
    pub async fn pause(&self, job_id: &str) -> Result<(), UploadError> {
        let Some(run) = self.take_active(job_id) else {
            let job = self.inner.load(job_id)?;
            return match job.status {
                JobStatus::Paused => Ok(()),
                from => Err(UploadError::InvalidTransition {
                    from,
                    to: JobStatus::Paused,
                }),
            };
        };
        run.cancel.cancel();
        self.join(job_id, run.task).await;
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Restarts a paused job from chunk 0.
    pub fn resume(&self, job_id: &str) -> Result<(), UploadError> {
        let job = self.inner.load(job_id)?;
        if job.status != JobStatus::Paused {
            return Err(UploadError::InvalidTransition {
                from: job.status,
                to: JobStatus::Uploading,
            });
        }
        self.start(job_id)
    }

    /// Moves a failed job back to `pending` for the queue processor.
    pub fn retry(&self, job_id: &str) -> Result<UploadJob, UploadError> {
        let job = self.inner.load(job_id)?;
        let job = self
            .inner
            .services
            .apply(job_id, &state::transition(&job, JobStatus::Pending)?)?;
        info!(job = %job_id, "upload queued for retry");
        self.inner.wake.notify_one();
        Ok(job)
    }

    /// Stops the job if it is running and removes it from the store.
    ///
    /// Outstanding background transfers are cancelled best-effort.
    pub async fn cancel(&self, job_id: &str) -> Result<(), UploadError> {
        let was_running = match self.take_active(job_id) {
            Some(run) => {
                run.discard.store(true, Ordering::SeqCst);
                run.cancel.cancel();
                self.join(job_id, run.task).await;
                self.inner.wake.notify_one();
                true
            }
            None => false,
        };

        // A discarded runner removes the job itself.
        let Some(job) = self.inner.services.store.remove(job_id)? else {
            return if was_running {
                Ok(())
            } else {
                Err(UploadError::JobNotFound(job_id.to_string()))
            };
        };

        if let Some(bg) = &self.inner.background {
            for handle in job.transport_handles.values() {
                if let Err(e) = bg.transport.cancel(handle).await {
                    warn!(job = %job_id, handle = %handle, error = %e, "transport cancel failed");
                }
            }
        }
        self.inner.services.emit(UploadEvent::Removed {
            job_id: job_id.to_string(),
        });
        info!(job = %job_id, "upload removed");
        Ok(())
    }

    /// Starts eligible jobs, oldest first, up to the active-job limit.
    /// Returns how many were started.
    pub fn process_queue(&self) -> Result<usize, UploadError> {
        let config = &self.inner.services.config;
        let mut active = self.inner.active.lock().unwrap();
        let capacity = config.max_active_jobs.max(1).saturating_sub(active.len());
        if capacity == 0 {
            return Ok(0);
        }

        let mut started = 0;
        for job in self.inner.services.store.list()? {
            if started == capacity {
                break;
            }
            let eligible = job.status == JobStatus::Pending
                || (config.auto_resume_paused && job.status == JobStatus::Paused);
            if eligible && !active.contains_key(&job.id) {
                self.spawn_runner(&mut active, &job.id);
                started += 1;
            }
        }
        if started > 0 {
            debug!(started, "queue processed");
        }
        Ok(started)
    }

    /// Runs the queue processor until `shutdown` fires, then pauses every
    /// running job.
    pub async fn run(&self, shutdown: CancellationToken) {
        let poll = self.inner.services.config.queue_poll_interval;
        info!(?poll, "queue processor started");
        loop {
            if let Err(e) = self.process_queue() {
                warn!(error = %e, "queue scan failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.inner.wake.notified() => trace!("queue woken"),
                _ = tokio::time::sleep(poll) => {}
            }
        }
        self.shutdown().await;
        info!("queue processor stopped");
    }

    /// Pauses every running job and waits for the runners to exit.
    pub async fn shutdown(&self) {
        let runs: Vec<(String, ActiveJob)> =
            self.inner.active.lock().unwrap().drain().collect();
        for (_, run) in &runs {
            run.cancel.cancel();
        }
        for (job_id, run) in runs {
            self.join(&job_id, run.task).await;
        }
    }

    fn spawn_runner(&self, active: &mut HashMap<String, ActiveJob>, job_id: &str) {
        let run_id = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.shutdown.child_token();
        let discard = Arc::new(AtomicBool::new(false));
        let strategy = self.inner.strategy(self.lifecycle());

        let inner = Arc::clone(&self.inner);
        let id = job_id.to_string();
        let token = cancel.clone();
        let flag = Arc::clone(&discard);
        let task = tokio::spawn(async move {
            let runner = JobRunner::new(&inner.services, strategy.as_ref(), token, &flag);
            match runner.run(&id).await {
                Ok(outcome) => debug!(job = %id, ?outcome, "runner finished"),
                Err(e) => error!(job = %id, error = %e, "runner aborted"),
            }
            inner.finish(&id, run_id);
        });

        active.insert(
            job_id.to_string(),
            ActiveJob {
                run_id,
                cancel,
                discard,
                task,
            },
        );
    }

    fn take_active(&self, job_id: &str) -> Option<ActiveJob> {
        self.inner.active.lock().unwrap().remove(job_id)
    }

    async fn join(&self, job_id: &str, task: JoinHandle<()>) {
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                error!(job = %job_id, error = %e, "runner task panicked");
            }
        }
    }
}

impl Drop for UploadManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}
