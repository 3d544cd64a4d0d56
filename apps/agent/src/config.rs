//! Agent configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/fieldlift/agent.toml`
//! - Windows: `%APPDATA%/fieldlift/agent.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use fieldlift_uploader::{Lifecycle, UploaderConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control-plane base URL (presign and finalize live under it).
    #[serde(default = "default_control_plane_url")]
    pub control_plane_url: String,

    /// System-of-record endpoint notified after each finalize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_url: Option<String>,

    /// Job queue file. Defaults to `jobs.json` next to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Concurrent part PUTs per job (foreground).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_active_jobs")]
    pub max_active_jobs: usize,

    #[serde(default = "default_queue_poll_secs")]
    pub queue_poll_secs: u64,

    /// `foreground` uploads in-process, `background` hands parts to the
    /// detached transport.
    #[serde(default)]
    pub lifecycle: Lifecycle,

    /// Restart paused jobs when the queue runs.
    #[serde(default = "default_true")]
    pub auto_resume: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_control_plane_url() -> String {
    "http://localhost:8080".into()
}

fn default_chunk_size() -> u64 {
    fieldlift_transfer::DEFAULT_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    4
}

fn default_max_active_jobs() -> usize {
    1
}

fn default_queue_poll_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_plane_url: default_control_plane_url(),
            record_url: None,
            store_path: None,
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            max_active_jobs: default_max_active_jobs(),
            queue_poll_secs: default_queue_poll_secs(),
            lifecycle: Lifecycle::default(),
            auto_resume: default_true(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// A loaded configuration and the file it came from.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub config: Config,
    pub path: PathBuf,
}

impl Config {
    /// Loads `path` (or the platform default), creating it with defaults
    /// if it does not exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Loaded> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save(&path)?;
            config
        };
        Ok(Loaded { config, path })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Coordinator settings; anything not configurable keeps its default.
    pub fn uploader(&self) -> UploaderConfig {
        UploaderConfig {
            chunk_size: self.chunk_size,
            concurrency: self.concurrency,
            max_active_jobs: self.max_active_jobs,
            queue_poll_interval: Duration::from_secs(self.queue_poll_secs),
            auto_resume_paused: self.auto_resume,
            ..UploaderConfig::default()
        }
    }
}

impl Loaded {
    pub fn store_path(&self) -> PathBuf {
        match &self.config.store_path {
            Some(p) => p.clone(),
            None => self
                .path
                .parent()
                .map(|dir| dir.join("jobs.json"))
                .unwrap_or_else(|| PathBuf::from("jobs.json")),
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("fieldlift")
            .join("agent.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("fieldlift").join("agent.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/fieldlift/agent.toml"))
    }
}
