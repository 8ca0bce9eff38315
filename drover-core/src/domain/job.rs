//! Job domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::artifact::{ArtifactRef, OutputArtifact};

/// A unit of work fetched from the backend
///
/// Immutable once fetched; owned by the poll loop for the duration of
/// execution and dropped after the terminal result has been reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// The executor template resolved by the backend for this job
    pub template: JobTemplate,
    /// Parameter values substituted into the template command
    pub parameters: HashMap<String, serde_json::Value>,
    /// Datasets/models that must be staged before execution
    pub inputs: Vec<ArtifactRef>,
    /// Hardware the scheduler matched this job against
    pub hardware: HardwareRequirement,
}

/// Executor template attached to a job
///
/// Declares which executor class runs the job and what it runs. The
/// required-package list is advisory metadata for the execution
/// environment; the registry never enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    /// Registered executor class identifier (e.g. "docker")
    pub executor_class: String,
    #[serde(default)]
    pub required_packages: Vec<String>,
    /// Container image reference for container-based executors
    pub image: String,
    /// Command to run, with `${name}` parameter placeholders
    pub command: Vec<String>,
}

/// Hardware required to run a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareRequirement {
    None,
    /// Requires the accelerator at the given index
    Accelerator { index: u32 },
}

impl Default for HardwareRequirement {
    fn default() -> Self {
        HardwareRequirement::None
    }
}

/// Terminal classification of a job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Result of a job execution
///
/// Created by the executor once a terminal state is observed, consumed
/// exactly once by the backend client for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    /// Exit code of the underlying process, where one was observed
    pub exit_code: Option<i64>,
    pub artifacts: Vec<OutputArtifact>,
    pub error_message: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl JobResult {
    /// A failure result carrying a diagnostic message
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            exit_code: None,
            artifacts: Vec::new(),
            error_message: Some(error.into()),
            started_at: None,
            finished_at: chrono::Utc::now(),
        }
    }

    /// A cancellation result; exit code retained for diagnostics only
    pub fn cancelled(exit_code: Option<i64>) -> Self {
        Self {
            status: JobStatus::Cancelled,
            exit_code,
            artifacts: Vec::new(),
            error_message: None,
            started_at: None,
            finished_at: chrono::Utc::now(),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
