//! In-process stand-in for an OS background-transfer service.
//!
//! Each submission runs as a detached task that performs the PUT and
//! reports progress, completion or error on the callback channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use fieldlift_transfer::read_range;
use fieldlift_uploader::{
    BackgroundTransport, BoxFuture, PartSource, SubmitRequest, TransportEvent,
    TransportEventKind, TransportHandle, UploadError,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Body slice size between progress reports.
const PIECE_SIZE: usize = 256 * 1024;

pub struct TaskTransport {
    http: reqwest::Client,
    callbacks: mpsc::Sender<TransportEvent>,
    tasks: Arc<Mutex<HashMap<TransportHandle, AbortHandle>>>,
}

impl TaskTransport {
    pub fn new(http: reqwest::Client, callbacks: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            http,
            callbacks,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Uploads still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl BackgroundTransport for TaskTransport {
    fn submit(&self, req: SubmitRequest) -> BoxFuture<'_, Result<TransportHandle, UploadError>> {
        Box::pin(async move {
            let handle = TransportHandle::new(uuid::Uuid::new_v4().to_string());

            // Registered before the task can finish and deregister itself.
            let mut tasks = self.tasks.lock().unwrap();
            let task = tokio::spawn(run_upload(
                self.http.clone(),
                req,
                handle.clone(),
                self.callbacks.clone(),
                Arc::clone(&self.tasks),
            ));
            tasks.insert(handle.clone(), task.abort_handle());
            tracing::trace!(handle = %handle, "background upload started");
            Ok(handle)
        })
    }

    fn cancel<'a>(&'a self, handle: &'a TransportHandle) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            if let Some(task) = self.tasks.lock().unwrap().remove(handle) {
                task.abort();
                tracing::debug!(handle = %handle, "background upload cancelled");
            }
            Ok(())
        })
    }
}

async fn run_upload(
    http: reqwest::Client,
    req: SubmitRequest,
    handle: TransportHandle,
    callbacks: mpsc::Sender<TransportEvent>,
    tasks: Arc<Mutex<HashMap<TransportHandle, AbortHandle>>>,
) {
    let kind = match put(&http, req, &handle, &callbacks).await {
        Ok(status) => TransportEventKind::Completed(status),
        Err(e) => TransportEventKind::Error(e.to_string()),
    };
    tasks.lock().unwrap().remove(&handle);
    let _ = callbacks.send(TransportEvent { handle, kind }).await;
}

async fn put(
    http: &reqwest::Client,
    req: SubmitRequest,
    handle: &TransportHandle,
    callbacks: &mpsc::Sender<TransportEvent>,
) -> anyhow::Result<u16> {
    let body = match req.source {
        PartSource::Bytes(bytes) => bytes,
        PartSource::FileRange { path, offset, len } => read_range(&path, offset, len).await?,
    };
    let total = body.len();

    let progress = callbacks.clone();
    let progress_handle = handle.clone();
    let mut sent = 0usize;
    let stream = futures_util::stream::iter(pieces(body)).map(move |piece| {
        sent += piece.len();
        // 100 is reserved for the final status.
        let pct = (sent * 100 / total.max(1)).min(99) as u8;
        let _ = progress.try_send(TransportEvent {
            handle: progress_handle.clone(),
            kind: TransportEventKind::Progress(pct),
        });
        Ok::<_, std::io::Error>(piece)
    });

    let method = reqwest::Method::from_bytes(req.method.as_bytes())?;
    let mut request = http
        .request(method, &req.url)
        .header(reqwest::header::CONTENT_LENGTH, total)
        .body(reqwest::Body::wrap_stream(stream));
    for (name, value) in &req.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let resp = request.send().await?;
    Ok(resp.status().as_u16())
}

fn pieces(body: Bytes) -> Vec<Bytes> {
    (0..body.len())
        .step_by(PIECE_SIZE)
        .map(|start| body.slice(start..(start + PIECE_SIZE).min(body.len())))
        .collect()
}
