//! Job store: in-memory and JSON-file backed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use fieldlift_protocol::JobStatus;
use tracing::{debug, info, trace};

use crate::error::UploadError;
use crate::types::{JobPatch, UploadJob};

/// Callback fired synchronously after a job is inserted.
pub type InsertHook = Box<dyn Fn(&UploadJob) + Send + Sync>;

/// Persistent queue of upload jobs.
pub trait JobStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<UploadJob>, UploadError>;

    /// All jobs, oldest first.
    fn list(&self) -> Result<Vec<UploadJob>, UploadError>;

    /// Adds a new job and fires the insert hooks. Fails if the id exists.
    fn insert(&self, job: UploadJob) -> Result<(), UploadError>;

    /// Applies `patch` to an existing job and returns the result.
    fn update(&self, id: &str, patch: &JobPatch) -> Result<UploadJob, UploadError>;

    fn remove(&self, id: &str) -> Result<Option<UploadJob>, UploadError>;

    fn on_insert(&self, hook: InsertHook);
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

/// Job store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, UploadJob>>,
    hooks: RwLock<Vec<InsertHook>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_jobs(jobs: Vec<UploadJob>) -> Self {
        Self {
            jobs: RwLock::new(jobs.into_iter().map(|j| (j.id.clone(), j)).collect()),
            hooks: RwLock::new(Vec::new()),
        }
    }

    fn snapshot(&self) -> Vec<UploadJob> {
        let mut jobs: Vec<UploadJob> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    fn fire_hooks(&self, job: &UploadJob) {
        for hook in self.hooks.read().unwrap().iter() {
            hook(job);
        }
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, id: &str) -> Result<Option<UploadJob>, UploadError> {
        Ok(self.jobs.read().unwrap().get(id).cloned())
    }

    fn list(&self) -> Result<Vec<UploadJob>, UploadError> {
        Ok(self.snapshot())
    }

    fn insert(&self, job: UploadJob) -> Result<(), UploadError> {
        {
            let mut jobs = self.jobs.write().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(UploadError::Store(format!("job already exists: {}", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
        }
        self.fire_hooks(&job);
        Ok(())
    }

    fn update(&self, id: &str, patch: &JobPatch) -> Result<UploadJob, UploadError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| UploadError::JobNotFound(id.to_string()))?;
        patch.apply(job);
        Ok(job.clone())
    }

    fn remove(&self, id: &str) -> Result<Option<UploadJob>, UploadError> {
        Ok(self.jobs.write().unwrap().remove(id))
    }

    fn on_insert(&self, hook: InsertHook) {
        self.hooks.write().unwrap().push(hook);
    }
}

// ---------------------------------------------------------------------------
// FileJobStore
// ---------------------------------------------------------------------------

/// Minimum gap between disk writes caused only by progress updates.
const PROGRESS_PERSIST_INTERVAL: Duration = Duration::from_secs(2);

/// Job store persisted to a JSON array on disk.
///
/// Status, error and handle changes are written immediately. Progress-only
/// updates are written at most once per [`PROGRESS_PERSIST_INTERVAL`]; the
/// next immediate write carries any progress held back.
pub struct FileJobStore {
    path: PathBuf,
    inner: MemoryJobStore,
    /// Time of the last disk write. Held across mutate + persist so disk
    /// writes land in mutation order.
    write_lock: Mutex<Option<Instant>>,
}

impl FileJobStore {
    /// Opens the store at `path`, loading existing jobs.
    ///
    /// Jobs left `uploading` by a previous process are demoted to `paused`.
    pub fn open(path: PathBuf) -> Result<Self, UploadError> {
        let mut jobs = load_jobs(&path)?;
        let mut demoted = 0;
        for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Uploading) {
            JobPatch {
                status: Some(JobStatus::Paused),
                transport_handles: Some(Default::default()),
                ..Default::default()
            }
            .apply(job);
            demoted += 1;
        }
        if demoted > 0 {
            info!(count = demoted, "demoted interrupted uploads to paused");
        }

        let store = Self {
            path,
            inner: MemoryJobStore::with_jobs(jobs),
            write_lock: Mutex::new(None),
        };
        if demoted > 0 {
            store.persist()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current jobs to disk.
    fn persist(&self) -> Result<(), UploadError> {
        let jobs = self.inner.snapshot();
        let json = serde_json::to_string_pretty(&jobs)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("persisted {} job(s) to {:?}", jobs.len(), self.path);
        Ok(())
    }
}

impl JobStore for FileJobStore {
    fn get(&self, id: &str) -> Result<Option<UploadJob>, UploadError> {
        self.inner.get(id)
    }

    fn list(&self) -> Result<Vec<UploadJob>, UploadError> {
        self.inner.list()
    }

    fn insert(&self, job: UploadJob) -> Result<(), UploadError> {
        {
            let mut last = self.write_lock.lock().unwrap();
            {
                let mut jobs = self.inner.jobs.write().unwrap();
                if jobs.contains_key(&job.id) {
                    return Err(UploadError::Store(format!("job already exists: {}", job.id)));
                }
                jobs.insert(job.id.clone(), job.clone());
            }
            self.persist()?;
            *last = Some(Instant::now());
        }
        self.inner.fire_hooks(&job);
        Ok(())
    }

    fn update(&self, id: &str, patch: &JobPatch) -> Result<UploadJob, UploadError> {
        let mut last = self.write_lock.lock().unwrap();
        let job = self.inner.update(id, patch)?;
        let due = last.is_none_or(|at| at.elapsed() >= PROGRESS_PERSIST_INTERVAL);
        if patch.is_progress_only() && !due {
            trace!(job = %id, progress = job.progress, "progress write deferred");
            return Ok(job);
        }
        self.persist()?;
        *last = Some(Instant::now());
        Ok(job)
    }

    fn remove(&self, id: &str) -> Result<Option<UploadJob>, UploadError> {
        let mut last = self.write_lock.lock().unwrap();
        let removed = self.inner.remove(id)?;
        if removed.is_some() {
            self.persist()?;
            *last = Some(Instant::now());
        }
        Ok(removed)
    }

    fn on_insert(&self, hook: InsertHook) {
        self.inner.on_insert(hook);
    }
}

/// Loads jobs from a JSON file on disk.
fn load_jobs(path: &Path) -> Result<Vec<UploadJob>, UploadError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    let jobs: Vec<UploadJob> = serde_json::from_str(&data)?;
    debug!("loaded {} job(s) from {:?}", jobs.len(), path);
    Ok(jobs)
}
