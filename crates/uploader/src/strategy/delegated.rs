//! Hand-off to an external background transfer primitive.
//!
//! Parts are submitted fire-and-forget. The primitive reports progress,
//! completion and errors per handle on its own channel; the
//! [`TransportRouter`] maps each handle back to its job and chunk and
//! forwards the event to that job's runner.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use fieldlift_protocol::constants::OCTET_STREAM;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::control::BoxFuture;
use crate::error::UploadError;
use crate::strategy::{ChunkEvent, TransferContext, TransferStrategy};
use crate::types::{ChunkKey, StrategyKind, TransportHandle};

/// Bytes handed to the background transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSource {
    Bytes(Bytes),
    /// A byte range the transport reads itself.
    FileRange {
        path: PathBuf,
        offset: u64,
        len: u64,
    },
}

/// One fire-and-forget upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub source: PartSource,
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
}

/// Callback from the background transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub handle: TransportHandle,
    pub kind: TransportEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Progress(u8),
    /// Final HTTP status of the upload.
    Completed(u16),
    Error(String),
}

/// OS-level (or otherwise detached) upload primitive.
///
/// Implementations report [`TransportEvent`]s on a channel whose receiver
/// is given to [`TransportRouter::spawn`].
pub trait BackgroundTransport: Send + Sync {
    fn submit(&self, req: SubmitRequest) -> BoxFuture<'_, Result<TransportHandle, UploadError>>;

    fn cancel<'a>(&'a self, handle: &'a TransportHandle) -> BoxFuture<'a, Result<(), UploadError>>;
}

struct Route {
    key: ChunkKey,
    events: mpsc::Sender<ChunkEvent>,
}

/// Correlates transport handles with job chunks.
#[derive(Default)]
pub struct TransportRouter {
    routes: Mutex<HashMap<TransportHandle, Route>>,
}

impl TransportRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the task that drains transport callbacks into job runners.
    pub fn spawn(self: &Arc<Self>, mut callbacks: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = callbacks.recv().await {
                router.dispatch(event).await;
            }
            debug!("transport callback channel closed");
        })
    }

    /// Submits `req` and records its route.
    ///
    /// The route table stays locked across the submission so a callback
    /// that races the returned handle still finds its route.
    pub async fn submit(
        &self,
        transport: &dyn BackgroundTransport,
        req: SubmitRequest,
        key: ChunkKey,
        events: mpsc::Sender<ChunkEvent>,
    ) -> Result<TransportHandle, UploadError> {
        let mut routes = self.routes.lock().await;
        let handle = transport.submit(req).await?;
        trace!(job = %key.job_id, chunk = key.index, handle = %handle, "route registered");
        routes.insert(handle.clone(), Route { key, events });
        Ok(handle)
    }

    /// Routes one callback. Unknown handles are ignored.
    pub async fn dispatch(&self, event: TransportEvent) {
        let TransportEvent { handle, kind } = event;

        let route = {
            let mut routes = self.routes.lock().await;
            match kind {
                TransportEventKind::Progress(_) => routes
                    .get(&handle)
                    .map(|r| (r.key.clone(), r.events.clone())),
                _ => routes.remove(&handle).map(|r| (r.key, r.events)),
            }
        };
        let Some((key, events)) = route else {
            trace!(handle = %handle, ?kind, "no route for transport event, ignoring");
            return;
        };

        let index = key.index;
        let event = match kind {
            TransportEventKind::Progress(pct) => {
                if events.try_send(ChunkEvent::Progress { index, pct }).is_err() {
                    trace!(job = %key.job_id, chunk = index, "progress event dropped");
                }
                return;
            }
            TransportEventKind::Completed(status) if (200..300).contains(&status) => {
                ChunkEvent::Completed {
                    index,
                    status,
                    etag: None,
                }
            }
            TransportEventKind::Completed(status) => ChunkEvent::Failed {
                index,
                error: UploadError::HttpError(status),
                fatal: true,
            },
            TransportEventKind::Error(message) => ChunkEvent::Failed {
                index,
                error: UploadError::TransportError(message),
                fatal: true,
            },
        };

        if events.send(event).await.is_err() {
            debug!(job = %key.job_id, chunk = index, "job runner gone, dropping event");
        }
    }

    /// Drops every route for `job_id` and returns their handles.
    pub async fn release_job(&self, job_id: &str) -> Vec<TransportHandle> {
        let mut routes = self.routes.lock().await;
        let handles: Vec<TransportHandle> = routes
            .iter()
            .filter(|(_, r)| r.key.job_id == job_id)
            .map(|(h, _)| h.clone())
            .collect();
        for h in &handles {
            routes.remove(h);
        }
        handles
    }

    /// Number of routes still open for `job_id`.
    pub async fn outstanding(&self, job_id: &str) -> usize {
        self.routes
            .lock()
            .await
            .values()
            .filter(|r| r.key.job_id == job_id)
            .count()
    }
}

/// Submits every chunk to a [`BackgroundTransport`] in index order.
///
/// There is no per-chunk retry: a single chunk error fails the job.
pub struct DelegatedStrategy {
    transport: Arc<dyn BackgroundTransport>,
    router: Arc<TransportRouter>,
}

impl DelegatedStrategy {
    pub fn new(transport: Arc<dyn BackgroundTransport>, router: Arc<TransportRouter>) -> Self {
        Self { transport, router }
    }

    async fn run(&self, ctx: TransferContext) -> Result<(), UploadError> {
        let TransferContext {
            job_id,
            source,
            parts,
            events,
            cancel,
        } = ctx;

        for part in parts {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            let index = part.chunk.index;
            let req = SubmitRequest {
                source: PartSource::FileRange {
                    path: source.clone(),
                    offset: part.chunk.offset,
                    len: part.chunk.len,
                },
                url: part.url,
                method: "PUT".into(),
                headers: vec![("Content-Type".into(), OCTET_STREAM.into())],
            };
            let key = ChunkKey {
                job_id: job_id.clone(),
                index,
            };

            let handle = self
                .router
                .submit(self.transport.as_ref(), req, key, events.clone())
                .await?;
            debug!(job = %job_id, chunk = index, handle = %handle, "chunk submitted");
            let _ = events.send(ChunkEvent::Submitted { index, handle }).await;
        }
        Ok(())
    }

    async fn release_handles(&self, job_id: &str) {
        for handle in self.router.release_job(job_id).await {
            if let Err(e) = self.transport.cancel(&handle).await {
                warn!(job = %job_id, handle = %handle, error = %e, "transport cancel failed");
            }
        }
    }
}

impl TransferStrategy for DelegatedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Delegated
    }

    fn transfer(&self, ctx: TransferContext) -> BoxFuture<'_, Result<(), UploadError>> {
        Box::pin(self.run(ctx))
    }

    fn release<'a>(&'a self, job_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(self.release_handles(job_id))
    }
}
