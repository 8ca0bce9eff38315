//! Backend seam for the poll loop
//!
//! The driver talks to the backend through this trait so the scheduler can
//! be exercised against an in-memory backend in tests. The HTTP
//! implementation lives in `drover-client`; this module only adapts it.

use async_trait::async_trait;
use drover_client::{BackendClient, ClientError};
use drover_core::domain::job::{Job, JobResult};
use drover_core::domain::node::NodeCapability;
use uuid::Uuid;

/// Backend operations used while driving jobs
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the next job this node may run, if any
    async fn fetch_next_job(&self, capability: &NodeCapability)
    -> Result<Option<Job>, ClientError>;

    /// Whether the given job was cancelled on the backend
    async fn is_cancelled(&self, job_id: Uuid) -> Result<bool, ClientError>;

    /// Stream a progress message for a running job
    async fn report_progress(&self, job_id: Uuid, message: &str) -> Result<(), ClientError>;

    /// Report the terminal result; called exactly once per job
    async fn report_result(&self, job_id: Uuid, result: &JobResult) -> Result<(), ClientError>;
}

#[async_trait]
impl Backend for BackendClient {
    async fn fetch_next_job(
        &self,
        capability: &NodeCapability,
    ) -> Result<Option<Job>, ClientError> {
        BackendClient::fetch_next_job(self, capability).await
    }

    async fn is_cancelled(&self, job_id: Uuid) -> Result<bool, ClientError> {
        BackendClient::is_cancelled(self, job_id).await
    }

    async fn report_progress(&self, job_id: Uuid, message: &str) -> Result<(), ClientError> {
        BackendClient::report_progress(self, job_id, message).await
    }

    async fn report_result(&self, job_id: Uuid, result: &JobResult) -> Result<(), ClientError> {
        BackendClient::report_result(self, job_id, result).await
    }
}
