//! Agent configuration
//!
//! The configuration is a JSON file with the same sections the agent's
//! collaborators care about: general execution flags, backend connection,
//! Docker behavior, and the simple-poll schedule. It is loaded once at
//! startup into an immutable struct and passed explicitly into the poll
//! loop, backend client, and work-directory manager.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backoff::SleepSchedule;

/// Default location of the system-wide configuration file
pub const SYSTEMWIDE_CONFIG: &str = "/etc/drover/agent.json";

/// Top-level agent configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub poll_simple: PollSimpleConfig,
}

/// General execution flags
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Verbose diagnostics in the job log
    pub debug: bool,
    /// Retain per-job work directories after completion (debugging aid)
    pub keep_job_dirs: bool,
    /// Advisory flag for executors that install packages: disable pip's cache
    pub pip_no_cache: bool,
    /// Compression method used when packaging output artifacts
    pub compression: Compression,
    /// Polling strategy name; only "simple" is known
    pub poll: String,
    /// Backoff ladder (comma-separated seconds) applied on backend errors
    pub poll_backenderror_wait: String,
    /// Accelerator index this agent drives, -1 for none
    pub gpu_id: i32,
    /// Seconds between cancellation checks while a job is running
    pub cancel_check_wait: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            debug: false,
            keep_job_dirs: false,
            pip_no_cache: true,
            compression: Compression::None,
            poll: "simple".to_string(),
            poll_backenderror_wait: "10,30".to_string(),
            gpu_id: -1,
            cancel_check_wait: 10,
        }
    }
}

/// Archive compression for packaged outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    Gzip,
}

/// Backend connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            user: "launcher".to_string(),
            password: String::new(),
        }
    }
}

/// Docker execution settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Root under which per-job scratch directories are created
    pub work_dir: PathBuf,
    /// Long-lived cache for downloaded datasets/models
    pub cache_dir: PathBuf,
    /// Prefix container runtime commands with sudo
    pub use_sudo: bool,
    /// Have sudo read its password from stdin (-S)
    pub ask_sudo_pw: bool,
    /// Run containers as the invoking uid:gid instead of root
    pub use_current_user: bool,
    /// Grace period in seconds before an unresponsive container is killed
    pub stop_timeout: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/drover/work"),
            cache_dir: PathBuf::from("/tmp/drover/cache"),
            use_sudo: false,
            ask_sudo_pw: false,
            use_current_user: false,
            stop_timeout: 10,
        }
    }
}

/// Settings for the "simple" polling strategy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollSimpleConfig {
    /// Idle-poll wait schedule (comma-separated seconds), reset on work
    pub interval: String,
}

impl Default for PollSimpleConfig {
    fn default() -> Self {
        Self {
            interval: "5".to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration from the given file, or from the
    /// system-wide location when none is given
    ///
    /// A missing explicit file is an error; a missing system-wide file
    /// falls back to defaults.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let config = match config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {:?}", path))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("failed to parse config file {:?}", path))?
            }
            None => {
                let path = Path::new(SYSTEMWIDE_CONFIG);
                if path.exists() {
                    let text = std::fs::read_to_string(path)
                        .with_context(|| format!("failed to read config file {:?}", path))?;
                    serde_json::from_str(&text)
                        .with_context(|| format!("failed to parse config file {:?}", path))?
                } else {
                    Config::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.backend.url.is_empty() {
            anyhow::bail!("backend.url cannot be empty");
        }

        if !self.backend.url.starts_with("http://") && !self.backend.url.starts_with("https://") {
            anyhow::bail!("backend.url must start with http:// or https://");
        }

        if self.general.poll != "simple" {
            anyhow::bail!("unknown poll strategy: {}", self.general.poll);
        }

        if self.general.cancel_check_wait == 0 {
            anyhow::bail!("general.cancel_check_wait must be greater than 0");
        }

        SleepSchedule::parse(&self.general.poll_backenderror_wait)
            .context("invalid general.poll_backenderror_wait schedule")?;
        SleepSchedule::parse(&self.poll_simple.interval)
            .context("invalid poll_simple.interval schedule")?;

        Ok(())
    }

    /// The backoff ladder applied when the backend is unavailable
    pub fn backend_error_schedule(&self) -> SleepSchedule {
        // validate() already proved the schedule parses
        SleepSchedule::parse(&self.general.poll_backenderror_wait)
            .expect("schedule validated at load time")
    }

    /// The idle-poll wait schedule
    pub fn poll_interval_schedule(&self) -> SleepSchedule {
        SleepSchedule::parse(&self.poll_simple.interval).expect("schedule validated at load time")
    }
}
