//! Job executors
//!
//! An executor binds one fetched job to a concrete execution strategy. The
//! driver walks every executor through the same lifecycle:
//!
//! created -> prepare() -> start() -> poll() until terminal
//!         -> collect_result() -> cleanup()
//!
//! with cancel() possibly injected while the job is running. Errors during
//! preparation or execution fail the individual job, never the agent.

mod docker;
mod registry;

pub use docker::DockerExecutor;
pub use registry::ExecutorRegistry;

use async_trait::async_trait;
use drover_core::domain::job::JobResult;
use thiserror::Error;

use crate::context::ExecutionContext;

/// Errors surfaced by executors and the registry
///
/// All of these fail the job they occur in; the driver converts them into
/// a failed [`JobResult`] and keeps polling.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// No factory is registered for the job's executor class
    #[error("unknown executor class '{0}'")]
    UnknownExecutor(String),

    /// Input staging failed (unreachable artifact, insufficient disk, ...)
    #[error("preparation failed: {0}")]
    Preparation(String),

    /// The execution environment misbehaved (runtime invocation failed)
    #[error("execution failed: {0}")]
    Execution(String),

    /// Resource release failed; logged and non-fatal
    #[error("cleanup failed: {0}")]
    Cleanup(String),
}

/// Observed state of the underlying process/container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Exited { code: i64 },
}

/// The contract every executor satisfies
///
/// Implementations own their [`ExecutionContext`] exclusively; the driver
/// only reads it (to drain logs and to observe the cancellation flag).
#[async_trait]
pub trait JobExecutor: Send {
    /// Stage inputs into the job directory; idempotent, re-entrant if
    /// retried
    async fn prepare(&mut self) -> Result<(), ExecutorError>;

    /// Begin asynchronous execution; returns promptly so the driver can
    /// run its cancellation watcher concurrently
    async fn start(&mut self) -> Result<(), ExecutorError>;

    /// Non-blocking observation of the underlying process; restartable,
    /// called repeatedly until terminal
    async fn poll(&mut self) -> Result<RunState, ExecutorError>;

    /// Request early termination; when this returns the process is no
    /// longer running. Safe to call if the process already exited.
    async fn cancel(&mut self) -> Result<(), ExecutorError>;

    /// Gather output, logs, and exit classification; called exactly once
    /// after a terminal state was observed
    async fn collect_result(&mut self) -> JobResult;

    /// Release containers, temp files, and volumes; runs on every exit
    /// path and must tolerate resources that were never allocated
    async fn cleanup(&mut self) -> Result<(), ExecutorError>;

    /// The per-job context, for log draining by the driver
    fn context(&self) -> &ExecutionContext;
}
