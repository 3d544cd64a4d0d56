//! Wires the upload services together and executes CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use fieldlift_control_plane::Client;
use fieldlift_uploader::{
    BackgroundServices, FileJobStore, JobStatus, TracingNotifier, TransportRouter, UploadEvent,
    UploadJob, UploadManager, UploadServices,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Loaded;
use crate::transport::TaskTransport;

/// What the agent was asked to do.
#[derive(Debug, Clone)]
pub enum Action {
    Run,
    Enqueue {
        file: PathBuf,
        destination: String,
        id: Option<String>,
    },
    List,
    Retry(String),
    Pause(String),
    Resume(String),
    Cancel(String),
}

struct Agent {
    manager: Arc<UploadManager>,
    events: mpsc::Receiver<UploadEvent>,
}

/// Builds the manager over the persisted job store.
fn build(loaded: &Loaded) -> anyhow::Result<Agent> {
    let config = &loaded.config;
    let store_path = loaded.store_path();
    let store = Arc::new(
        FileJobStore::open(store_path.clone())
            .with_context(|| format!("opening job store {}", store_path.display()))?,
    );

    let client = Arc::new(
        Client::new(&config.control_plane_url, config.request_timeout())?
            .with_record_url(config.record_url.clone()),
    );

    let (callbacks_tx, callbacks_rx) = mpsc::channel(256);
    let router = Arc::new(TransportRouter::new());
    router.spawn(callbacks_rx);
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;
    let transport = Arc::new(TaskTransport::new(http, callbacks_tx));

    let mut manager = UploadManager::new(
        UploadServices {
            store,
            control: client.clone(),
            parts: client.clone(),
            reachability: client,
            background: Some(BackgroundServices { transport, router }),
            notifier: Arc::new(TracingNotifier),
        },
        config.uploader(),
    );
    manager.set_lifecycle(config.lifecycle);
    let events = manager
        .take_events()
        .context("upload event receiver already taken")?;

    tracing::debug!(store = %store_path.display(), lifecycle = ?config.lifecycle, "upload manager ready");
    Ok(Agent {
        manager: Arc::new(manager),
        events,
    })
}

pub async fn execute(loaded: Loaded, action: Action) -> anyhow::Result<()> {
    let Agent { manager, events } = build(&loaded)?;

    match action {
        Action::Run => run(manager, events).await?,
        Action::Enqueue {
            file,
            destination,
            id,
        } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let job = manager.enqueue(id, &file, &destination).await?;
            println!("{}", job.id);
        }
        Action::List => {
            for job in manager.list()? {
                println!("{}", describe(&job));
            }
        }
        Action::Retry(id) => {
            manager.retry(&id)?;
            println!("{id} queued for retry");
        }
        Action::Pause(id) => {
            manager.pause(&id).await?;
            println!("{id} paused");
        }
        Action::Resume(id) => drive(manager, events, &id).await?,
        Action::Cancel(id) => {
            manager.cancel(&id).await?;
            println!("{id} removed");
        }
    }
    Ok(())
}

/// Drains the queue until Ctrl+C.
async fn run(manager: Arc<UploadManager>, events: mpsc::Receiver<UploadEvent>) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let queue = tokio::spawn({
        let manager = Arc::clone(&manager);
        let shutdown = shutdown.clone();
        async move { manager.run(shutdown).await }
    });
    let logger = tokio::spawn(log_events(events));

    tracing::info!("agent ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    shutdown.cancel();
    queue.await?;
    logger.abort();
    Ok(())
}

/// Resumes one paused job and follows it until it settles or Ctrl+C
/// pauses it again.
async fn drive(
    manager: Arc<UploadManager>,
    mut events: mpsc::Receiver<UploadEvent>,
    id: &str,
) -> anyhow::Result<()> {
    manager.resume(id)?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.pause(id).await?;
                println!("{id} paused");
                return Ok(());
            }
            ev = events.recv() => match ev {
                Some(UploadEvent::Progress { job_id, progress }) if job_id == id => {
                    println!("{id} {progress}%");
                }
                Some(UploadEvent::StatusChanged { job_id, status, error }) if job_id == id => {
                    match status {
                        JobStatus::Completed => {
                            println!("{id} completed");
                            return Ok(());
                        }
                        JobStatus::Failed => {
                            anyhow::bail!("{id} failed: {}", error.unwrap_or_default());
                        }
                        _ => {}
                    }
                }
                Some(_) => {}
                None => anyhow::bail!("upload event channel closed"),
            },
        }
    }
}

async fn log_events(mut events: mpsc::Receiver<UploadEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::debug!(event = %json, "upload event"),
            Err(e) => tracing::warn!(error = %e, "failed to encode upload event"),
        }
    }
}

fn describe(job: &UploadJob) -> String {
    let mut line = format!(
        "{}\t{}\t{}%\t{}\t{}",
        job.id, job.status, job.progress, job.file_name, job.destination
    );
    if let Some(error) = &job.error {
        line.push('\t');
        line.push_str(error);
    }
    line
}
