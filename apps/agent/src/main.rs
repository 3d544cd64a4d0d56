//! Fieldlift upload agent entry point.

mod app;
mod config;
mod transport;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::app::Action;

/// Headless agent that uploads recordings to the object store.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process the upload queue until interrupted.
    Run,
    /// Add a recording to the upload queue.
    Enqueue {
        #[arg(long)]
        file: PathBuf,
        /// Inspection the recording belongs to.
        #[arg(long)]
        destination: String,
        /// Job id (random if omitted).
        #[arg(long)]
        id: Option<String>,
    },
    /// Print every queued job.
    List,
    /// Queue a failed job again.
    Retry { id: String },
    Pause { id: String },
    /// Resume a paused job and follow it to completion.
    Resume { id: String },
    /// Remove a job from the queue.
    Cancel { id: String },
}

impl From<Command> for Action {
    fn from(command: Command) -> Self {
        match command {
            Command::Run => Action::Run,
            Command::Enqueue {
                file,
                destination,
                id,
            } => Action::Enqueue {
                file,
                destination,
                id,
            },
            Command::List => Action::List,
            Command::Retry { id } => Action::Retry(id),
            Command::Pause { id } => Action::Pause(id),
            Command::Resume { id } => Action::Resume(id),
            Command::Cancel { id } => Action::Cancel(id),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let action = cli.command.map(Action::from).unwrap_or(Action::Run);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting fieldlift agent"
    );

    let loaded = config::Config::load(cli.config.as_deref())?;
    tracing::info!(
        path = %loaded.path.display(),
        control_plane = %loaded.config.control_plane_url,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::execute(loaded, action))?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}
