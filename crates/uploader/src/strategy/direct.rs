//! In-process transfer with a bounded batch of concurrent PUTs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fieldlift_control_plane::PutOutcome;
use fieldlift_transfer::read_range;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::UploaderConfig;
use crate::connectivity::ConnectivityGate;
use crate::control::{BoxFuture, PartTransport, Reachability};
use crate::error::UploadError;
use crate::retry::{RetryPolicy, sleep_or_cancel};
use crate::strategy::{ChunkEvent, PlannedPart, TransferContext, TransferStrategy};
use crate::types::StrategyKind;

/// Uploads chunks itself, at most `concurrency` at a time.
pub struct DirectStrategy {
    transport: Arc<dyn PartTransport>,
    reachability: Arc<dyn Reachability>,
    concurrency: usize,
    retry: RetryPolicy,
    failure_threshold: usize,
    offline_poll: Duration,
    offline_timeout: Duration,
}

/// Per-job state shared by chunk tasks.
#[derive(Clone)]
struct PartWorker {
    job_id: Arc<str>,
    source: Arc<PathBuf>,
    transport: Arc<dyn PartTransport>,
    gate: Arc<ConnectivityGate>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl DirectStrategy {
    pub fn new(
        transport: Arc<dyn PartTransport>,
        reachability: Arc<dyn Reachability>,
        config: &UploaderConfig,
    ) -> Self {
        Self {
            transport,
            reachability,
            concurrency: config.concurrency.max(1),
            retry: config.chunk_retry,
            failure_threshold: config.chunk_failure_threshold,
            offline_poll: config.offline_poll_interval,
            offline_timeout: config.offline_timeout,
        }
    }

    async fn run(&self, ctx: TransferContext) -> Result<(), UploadError> {
        let TransferContext {
            job_id,
            source,
            parts,
            events,
            cancel,
        } = ctx;

        let worker = PartWorker {
            job_id: Arc::from(job_id.as_str()),
            source: Arc::new(source),
            transport: Arc::clone(&self.transport),
            gate: Arc::new(ConnectivityGate::new(
                Arc::clone(&self.reachability),
                self.offline_poll,
                self.offline_timeout,
            )),
            retry: self.retry,
            cancel: cancel.clone(),
        };

        let mut pending = parts.into_iter();
        let mut in_flight = JoinSet::new();
        let mut failed = 0usize;

        loop {
            // Fill free slots, stalling while the job is offline.
            while in_flight.len() < self.concurrency {
                let Some(part) = pending.next() else { break };
                if cancel.is_cancelled() {
                    in_flight.abort_all();
                    return Err(UploadError::Cancelled);
                }
                if let Err(e) = worker.gate.checkpoint().await {
                    in_flight.abort_all();
                    return Err(e);
                }
                let _ = events
                    .send(ChunkEvent::Progress {
                        index: part.chunk.index,
                        pct: 0,
                    })
                    .await;
                in_flight.spawn(worker.clone().upload(part));
            }

            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    in_flight.abort_all();
                    return Err(UploadError::Cancelled);
                }
                joined = in_flight.join_next() => joined,
            };
            let Some(joined) = joined else { break };

            let (index, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    failed += 1;
                    warn!(job = %job_id, error = %e, "chunk task ended abnormally");
                    if failed > self.failure_threshold {
                        in_flight.abort_all();
                        return Err(UploadError::TooManyChunkFailures { failed });
                    }
                    continue;
                }
            };

            match outcome {
                Ok(put) => {
                    debug!(job = %job_id, chunk = index, status = put.status, etag = ?put.etag, "chunk uploaded");
                    let _ = events
                        .send(ChunkEvent::Completed {
                            index,
                            status: put.status,
                            etag: put.etag,
                        })
                        .await;
                }
                Err(e @ (UploadError::OfflineTimeout(_) | UploadError::Cancelled)) => {
                    in_flight.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    failed += 1;
                    warn!(job = %job_id, chunk = index, failed, error = %e, "chunk permanently failed");
                    let _ = events
                        .send(ChunkEvent::Failed {
                            index,
                            error: e,
                            fatal: false,
                        })
                        .await;
                    if failed > self.failure_threshold {
                        in_flight.abort_all();
                        error!(job = %job_id, failed, "too many chunk failures, aborting");
                        return Err(UploadError::TooManyChunkFailures { failed });
                    }
                }
            }
        }

        if failed > 0 {
            return Err(UploadError::ChunkUploadExhausted { failed });
        }
        Ok(())
    }
}

impl PartWorker {
    /// Uploads one chunk with retries. Returns the chunk index and outcome.
    async fn upload(self, part: PlannedPart) -> (u32, Result<PutOutcome, UploadError>) {
        let index = part.chunk.index;
        let body = match read_range(&self.source, part.chunk.offset, part.chunk.len).await {
            Ok(body) => body,
            Err(e) => return (index, Err(e.into())),
        };

        let mut attempt = 0;
        loop {
            let last = match self.transport.put_part(&part.url, body.clone()).await {
                Ok(put) if put.is_success() => return (index, Ok(put)),
                Ok(put) => UploadError::HttpError(put.status),
                Err(e) => UploadError::TransportError(e.to_string()),
            };

            if attempt >= self.retry.max_retries {
                return (index, Err(last));
            }

            let delay = self.retry.delay_for_attempt(attempt);
            debug!(job = %self.job_id, chunk = index, attempt, error = %last, ?delay, "chunk failed, retrying");
            if let Err(e) = sleep_or_cancel(delay, &self.cancel).await {
                return (index, Err(e));
            }
            if let Err(e) = self.gate.ensure_online(&self.cancel).await {
                return (index, Err(e));
            }
            attempt += 1;
        }
    }
}

impl TransferStrategy for DirectStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    fn transfer(&self, ctx: TransferContext) -> BoxFuture<'_, Result<(), UploadError>> {
        Box::pin(self.run(ctx))
    }

    fn release<'a>(&'a self, _job_id: &'a str) -> BoxFuture<'a, ()> {
        // In-flight PUTs die with the transfer future.
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlift_transfer::plan_chunks;
    use tokio::sync::mpsc;

    use crate::testing::{MockParts, MockReachability, part_url, write_source};

    struct Harness {
        _dir: tempfile::TempDir,
        parts: Arc<MockParts>,
        reach: Arc<MockReachability>,
        strategy: DirectStrategy,
        ctx: TransferContext,
        events: mpsc::Receiver<ChunkEvent>,
    }

    fn harness(size: u64, chunk_size: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "clip.mp4", size);
        let parts = Arc::new(MockParts::new());
        let reach = Arc::new(MockReachability::new(true));
        let strategy = DirectStrategy::new(parts.clone(), reach.clone(), &UploaderConfig::default());

        let planned = plan_chunks(size, chunk_size)
            .unwrap()
            .into_iter()
            .map(|chunk| PlannedPart {
                url: part_url("job-1", chunk.index),
                chunk,
            })
            .collect();
        let (tx, rx) = mpsc::channel(1024);
        let ctx = TransferContext {
            job_id: "job-1".into(),
            source,
            parts: planned,
            events: tx,
            cancel: CancellationToken::new(),
        };
        Harness {
            _dir: dir,
            parts,
            reach,
            strategy,
            ctx,
            events: rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ChunkEvent>) -> Vec<ChunkEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_every_chunk_once() {
        let mut h = harness(10, 4);
        h.strategy.transfer(h.ctx).await.unwrap();

        let mut urls = h.parts.calls();
        urls.sort();
        assert_eq!(urls, vec![part_url("job-1", 0), part_url("job-1", 1), part_url("job-1", 2)]);

        let completed: Vec<u32> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                ChunkEvent::Completed { index, etag, .. } => {
                    assert!(etag.is_some());
                    Some(index)
                }
                _ => None,
            })
            .collect();
        assert_eq!(completed.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_chunk_bytes() {
        let h = harness(10, 4);
        h.strategy.transfer(h.ctx).await.unwrap();
        let bodies = h.parts.bodies();
        let mut lens: Vec<usize> = bodies.iter().map(|b| b.len()).collect();
        lens.sort();
        assert_eq!(lens, vec![2, 4, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency() {
        let h = harness(40, 1);
        h.parts.set_delay(Duration::from_millis(100));
        h.strategy.transfer(h.ctx).await.unwrap();
        assert_eq!(h.parts.calls().len(), 40);
        assert!(h.parts.max_in_flight() <= 4);
        assert_eq!(h.parts.max_in_flight(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let h = harness(10, 4);
        h.parts.fail_part(1, 2);
        h.strategy.transfer(h.ctx).await.unwrap();
        let tries = h
            .parts
            .calls()
            .into_iter()
            .filter(|u| *u == part_url("job-1", 1))
            .count();
        assert_eq!(tries, 3);
        // Reachability is probed before each retry.
        assert_eq!(h.reach.probes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_failure_exhausts_chunk() {
        let mut h = harness(10, 4);
        h.parts.fail_part(2, u32::MAX);
        let err = h.strategy.transfer(h.ctx).await.unwrap_err();
        assert!(matches!(err, UploadError::ChunkUploadExhausted { failed: 1 }));

        let tries = h
            .parts
            .calls()
            .into_iter()
            .filter(|u| *u == part_url("job-1", 2))
            .count();
        assert_eq!(tries, 6);

        let failed = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, ChunkEvent::Failed { index: 2, fatal: false, .. }))
            .count();
        assert_eq!(failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn more_than_ten_failures_aborts_job() {
        let h = harness(20, 1);
        h.parts.fail_all(500);
        let err = h.strategy.transfer(h.ctx).await.unwrap_err();
        assert!(matches!(err, UploadError::TooManyChunkFailures { failed: 11 }));
        // Remaining chunks were never started or were abandoned.
        assert!(h.parts.calls().len() < 20 * 6);
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_trips_while_other_chunks_succeed() {
        let mut h = harness(24, 1);
        for index in (0..24).step_by(2) {
            h.parts.fail_part(index, u32::MAX);
        }
        let err = h.strategy.transfer(h.ctx).await.unwrap_err();
        assert!(matches!(err, UploadError::TooManyChunkFailures { failed: 11 }));

        let events = drain(&mut h.events);
        let completed: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ChunkEvent::Completed { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert!(!completed.is_empty());
        assert!(completed.iter().all(|i| i % 2 == 1));

        // Successes were reported before the failure that tripped the abort.
        let first_completed = events
            .iter()
            .position(|e| matches!(e, ChunkEvent::Completed { .. }))
            .unwrap();
        let last_failed = events
            .iter()
            .rposition(|e| matches!(e, ChunkEvent::Failed { .. }))
            .unwrap();
        assert!(first_completed < last_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_for_two_minutes_aborts() {
        let h = harness(10, 4);
        h.parts.fail_part(0, 1);
        h.reach.set(false);

        let start = tokio::time::Instant::now();
        let err = h.strategy.transfer(h.ctx).await.unwrap_err();
        assert!(matches!(err, UploadError::OfflineTimeout(_)));
        assert!(start.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_transfer() {
        let h = harness(10, 4);
        h.parts.hang();
        let cancel = h.ctx.cancel.clone();
        let strategy = Arc::new(h.strategy);
        let s = strategy.clone();
        let task = tokio::spawn(async move { s.transfer(h.ctx).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
    }
}
