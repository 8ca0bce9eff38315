//! Drover Agent
//!
//! A single-node worker that polls a central backend for jobs, runs each
//! one in a Docker container, supervises cancellation, and reports the
//! results back.
//!
//! Architecture:
//! - Configuration: JSON file with general/backend/docker/poll sections
//! - Backend client: HTTP communication with the central backend
//! - Executors: pluggable per-class job runners, Docker being the default
//! - Scheduler: job polling and lifecycle supervision
//!
//! The agent registers its hardware capability on startup, then fetches
//! jobs it can serve, stages their input artifacts through a shared
//! cache, and streams container logs back as progress reports.

mod backend;
mod backoff;
mod capability;
mod config;
mod context;
mod executor;
mod scheduler;
mod workdir;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backend::Backend;
use crate::backoff::SleepSchedule;
use crate::config::Config;
use crate::executor::{DockerExecutor, ExecutorRegistry};
use crate::scheduler::JobPoller;
use crate::workdir::WorkDirManager;
use drover_client::{BackendClient, NodeRegistration};
use drover_core::domain::job::JobResult;
use drover_core::domain::node::NodeCapability;

#[derive(Parser)]
#[command(name = "drover-agent")]
#[command(about = "Worker agent executing backend jobs in Docker containers", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "DROVER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the backend and execute jobs
    Run {
        /// Keep polling after a job finishes instead of exiting
        #[arg(long)]
        continuous: bool,
    },
    /// Print this node's hardware capability and exit
    Hwinfo {
        /// Output format
        #[arg(long, value_enum, default_value_t = HwinfoFormat::Text)]
        format: HwinfoFormat,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HwinfoFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drover_agent=info,drover_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run { continuous } => run(config, continuous).await,
        Command::Hwinfo { format, output } => hwinfo(&config, format, output),
    }
}

async fn run(config: Config, continuous: bool) -> Result<()> {
    info!("Starting Drover agent");

    let docker_version =
        capability::check_docker_available().context("Docker is required to run jobs")?;
    info!("Found Docker {}", docker_version);

    let workdir = WorkDirManager::new(&config);
    workdir
        .ensure_roots()
        .context("Failed to set up work and cache directories")?;

    let capability = capability::collect(&config);
    info!("Node capability: {}", capability);

    let client = Arc::new(BackendClient::new(
        &config.backend.url,
        &config.backend.user,
        &config.backend.password,
    ));

    register_with_retry(&client, &config, &capability).await;

    let mut registry = ExecutorRegistry::new();
    {
        let config = config.clone();
        let client = Arc::clone(&client);
        let workdir = workdir.clone();
        registry.register("docker", move |job| {
            Box::new(DockerExecutor::new(
                job,
                config.clone(),
                Arc::clone(&client),
                workdir.clone(),
            ))
        });
    }

    let backend: Arc<dyn Backend> = client;
    let poller = JobPoller::new(config, backend, Arc::new(registry), capability);
    poller.run(continuous).await
}

/// Registers the node with the backend
///
/// Also recovers from an unclean previous shutdown: if the backend still
/// has a job attached to this node, its failure is reported so the job
/// does not stay stuck in a running state forever.
async fn register_with_retry(
    client: &Arc<BackendClient>,
    config: &Config,
    capability: &NodeCapability,
) {
    let mut ladder = config.backend_error_schedule();
    let registration =
        retry_registration(&mut ladder, || client.register_node(capability)).await;

    info!("Registered as node {}", registration.node_id);

    if let Some(stale_job_id) = registration.stale_job_id {
        warn!(
            "Job {} was still attached to this node, marking it failed",
            stale_job_id
        );
        let result = JobResult::failed("Node restarted during job execution.");
        if let Err(e) = client.report_result(stale_job_id, &result).await {
            warn!("Failed to report stale job {}: {}", stale_job_id, e);
        }
    }
}

/// Retries registration on the backoff ladder until the backend answers
///
/// An unreachable backend is a transient condition, not a startup
/// failure; the agent waits for as long as it takes.
async fn retry_registration<F, Fut>(ladder: &mut SleepSchedule, mut register: F) -> NodeRegistration
where
    F: FnMut() -> Fut,
    Fut: Future<Output = drover_client::Result<NodeRegistration>>,
{
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;

        match register().await {
            Ok(registration) => {
                if attempt > 1 {
                    info!("Registered with backend after {} attempt(s)", attempt);
                }
                return registration;
            }
            Err(e) => {
                warn!("Failed to register with backend (attempt {}): {}", attempt, e);
                ladder.sleep().await;
                ladder.advance();
            }
        }
    }
}

fn hwinfo(config: &Config, format: HwinfoFormat, output: Option<PathBuf>) -> Result<()> {
    let capability = capability::collect(config);

    let rendered = match format {
        HwinfoFormat::Text => format!("{}\n", capability),
        HwinfoFormat::Json => {
            let mut json = serde_json::to_string_pretty(&capability)?;
            json.push('\n');
            json
        }
    };

    match output {
        Some(path) => std::fs::write(&path, rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", rendered),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_client::ClientError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_registration_outlasts_long_backend_outage() {
        let attempts = AtomicU32::new(0);
        let mut ladder = SleepSchedule::parse("10,30").unwrap();

        // well past any "give up after N tries" threshold
        let registration = retry_registration(&mut ladder, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt <= 25 {
                    Err(ClientError::api_error(503, "backend starting up"))
                } else {
                    Ok(NodeRegistration {
                        node_id: 7,
                        stale_job_id: None,
                    })
                }
            }
        })
        .await;

        assert_eq!(registration.node_id, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 26);
    }
}
