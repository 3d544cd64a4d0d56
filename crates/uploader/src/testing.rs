//! Scripted collaborators shared by unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use fieldlift_control_plane::{Error as ControlPlaneError, PutOutcome};
use fieldlift_protocol::{FinalizeRequest, PresignRequest, RecordNotifyRequest};
use tokio::sync::mpsc;

use crate::control::{BoxFuture, ControlPlane, PartTransport, Reachability};
use crate::error::UploadError;
use crate::notify::NotificationSink;
use crate::strategy::{
    BackgroundTransport, PartSource, SubmitRequest, TransportEvent, TransportEventKind,
};
use crate::types::{SourceFile, TransportHandle, UploadJob};

pub(crate) fn part_url(job_id: &str, index: u32) -> String {
    format!("http://store.test/{job_id}/part-{index}")
}

pub(crate) fn sample_job(id: &str, path: &str) -> UploadJob {
    let locator = PathBuf::from(path);
    let file_name = locator
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    UploadJob::new(
        id,
        SourceFile { locator, size: 0 },
        "insp-1",
        file_name,
        "video/mp4",
    )
}

/// Writes a file of `len` patterned bytes.
pub(crate) fn write_source(dir: &Path, name: &str, len: u64) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MockControlPlane {
    presign_script: Mutex<Vec<Result<Vec<String>, ControlPlaneError>>>,
    finalize_script: Mutex<Vec<Result<(), ControlPlaneError>>>,
    notify_fails: AtomicBool,
    presign_calls: Mutex<Vec<PresignRequest>>,
    finalize_calls: Mutex<Vec<FinalizeRequest>>,
    notify_calls: Mutex<Vec<RecordNotifyRequest>>,
}

impl MockControlPlane {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues presign responses. Once empty, presign succeeds.
    pub(crate) fn script_presign(&self, responses: Vec<Result<Vec<String>, ControlPlaneError>>) {
        self.presign_script.lock().unwrap().extend(responses);
    }

    /// Queues finalize responses. Once empty, finalize succeeds.
    pub(crate) fn script_finalize(&self, responses: Vec<Result<(), ControlPlaneError>>) {
        self.finalize_script.lock().unwrap().extend(responses);
    }

    pub(crate) fn fail_notify(&self) {
        self.notify_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn presign_calls(&self) -> Vec<PresignRequest> {
        self.presign_calls.lock().unwrap().clone()
    }

    pub(crate) fn finalize_calls(&self) -> Vec<FinalizeRequest> {
        self.finalize_calls.lock().unwrap().clone()
    }

    pub(crate) fn notify_calls(&self) -> Vec<RecordNotifyRequest> {
        self.notify_calls.lock().unwrap().clone()
    }
}

impl ControlPlane for MockControlPlane {
    fn presign<'a>(
        &'a self,
        req: &'a PresignRequest,
    ) -> BoxFuture<'a, Result<Vec<String>, ControlPlaneError>> {
        Box::pin(async move {
            self.presign_calls.lock().unwrap().push(req.clone());
            let mut script = self.presign_script.lock().unwrap();
            if script.is_empty() {
                Ok((0..req.total_parts).map(|i| part_url(&req.id, i)).collect())
            } else {
                script.remove(0)
            }
        })
    }

    fn finalize<'a>(
        &'a self,
        req: &'a FinalizeRequest,
    ) -> BoxFuture<'a, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            self.finalize_calls.lock().unwrap().push(req.clone());
            let mut script = self.finalize_script.lock().unwrap();
            if script.is_empty() {
                Ok(())
            } else {
                script.remove(0)
            }
        })
    }

    fn notify_record<'a>(
        &'a self,
        req: &'a RecordNotifyRequest,
    ) -> BoxFuture<'a, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            self.notify_calls.lock().unwrap().push(req.clone());
            if self.notify_fails.load(Ordering::SeqCst) {
                Err(ControlPlaneError::Api {
                    status: 500,
                    body: "record service down".into(),
                })
            } else {
                Ok(())
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Part PUTs
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MockParts {
    /// URL -> remaining scripted failures.
    failures: Mutex<HashMap<String, u32>>,
    fail_all_status: AtomicU16,
    hang: AtomicBool,
    delay_ms: AtomicUsize,
    calls: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Bytes>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockParts {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fails the first `times` PUTs to part `index` of any job with a 500.
    pub(crate) fn fail_part(&self, index: u32, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(format!("/part-{index}"), times);
    }

    pub(crate) fn fail_all(&self, status: u16) {
        self.fail_all_status.store(status, Ordering::SeqCst);
    }

    pub(crate) fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn bodies(&self) -> Vec<Bytes> {
        self.bodies.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, url: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        for (suffix, remaining) in failures.iter_mut() {
            if url.ends_with(suffix.as_str()) && *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return true;
            }
        }
        false
    }
}

impl PartTransport for MockParts {
    fn put_part<'a>(
        &'a self,
        url: &'a str,
        body: Bytes,
    ) -> BoxFuture<'a, Result<PutOutcome, ControlPlaneError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(url.to_string());
            self.bodies.lock().unwrap().push(body);

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let fail_all = self.fail_all_status.load(Ordering::SeqCst);
            let status = if fail_all != 0 {
                fail_all
            } else if self.scripted_failure(url) {
                500
            } else {
                200
            };
            Ok(PutOutcome {
                status,
                etag: (status == 200).then(|| format!("\"etag-{}\"", url.len())),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub(crate) fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub(crate) fn bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, title: &str, body: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Reachability
// ---------------------------------------------------------------------------

pub(crate) struct MockReachability {
    reachable: AtomicBool,
    probes: AtomicUsize,
}

impl MockReachability {
    pub(crate) fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            probes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub(crate) fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl Reachability for MockReachability {
    fn is_reachable(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.reachable.load(Ordering::SeqCst)
        })
    }
}

// ---------------------------------------------------------------------------
// Background transport
// ---------------------------------------------------------------------------

/// Records submissions. In auto mode, answers each one on `callbacks`
/// with a scripted outcome (default: 50% progress then a 200).
pub(crate) struct MockBackground {
    callbacks: Option<mpsc::Sender<TransportEvent>>,
    script: Mutex<HashMap<usize, Vec<TransportEventKind>>>,
    submissions: Mutex<Vec<SubmitRequest>>,
    cancelled: Mutex<Vec<TransportHandle>>,
    next: AtomicUsize,
}

impl MockBackground {
    /// Never calls back; tests dispatch events themselves.
    pub(crate) fn manual() -> Self {
        Self {
            callbacks: None,
            script: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn auto(callbacks: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            callbacks: Some(callbacks),
            ..Self::manual()
        }
    }

    /// Overrides the events sent for the `nth` submission (0-based).
    pub(crate) fn script(&self, nth: usize, events: Vec<TransportEventKind>) {
        self.script.lock().unwrap().insert(nth, events);
    }

    pub(crate) fn request(&self) -> SubmitRequest {
        SubmitRequest {
            source: PartSource::Bytes(Bytes::from_static(b"part")),
            url: part_url("j", 0),
            method: "PUT".into(),
            headers: Vec::new(),
        }
    }

    pub(crate) fn submissions(&self) -> Vec<SubmitRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub(crate) fn cancelled(&self) -> Vec<TransportHandle> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl BackgroundTransport for MockBackground {
    fn submit(&self, req: SubmitRequest) -> BoxFuture<'_, Result<TransportHandle, UploadError>> {
        Box::pin(async move {
            let nth = self.next.fetch_add(1, Ordering::SeqCst);
            let handle = TransportHandle::new(format!("h-{nth}"));
            self.submissions.lock().unwrap().push(req);

            if let Some(callbacks) = &self.callbacks {
                let events = self.script.lock().unwrap().remove(&nth).unwrap_or_else(|| {
                    vec![
                        TransportEventKind::Progress(50),
                        TransportEventKind::Completed(200),
                    ]
                });
                let callbacks = callbacks.clone();
                let h = handle.clone();
                tokio::spawn(async move {
                    for kind in events {
                        let _ = callbacks
                            .send(TransportEvent {
                                handle: h.clone(),
                                kind,
                            })
                            .await;
                    }
                });
            }
            Ok(handle)
        })
    }

    fn cancel<'a>(&'a self, handle: &'a TransportHandle) -> BoxFuture<'a, Result<(), UploadError>> {
        Box::pin(async move {
            self.cancelled.lock().unwrap().push(handle.clone());
            Ok(())
        })
    }
}
