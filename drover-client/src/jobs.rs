//! Job-related API endpoints
//!
//! The four lifecycle calls the agent makes while driving a job:
//! fetch the next runnable job, check whether it was cancelled, stream
//! progress, and report the terminal result.

use crate::BackendClient;
use crate::error::Result;
use drover_core::domain::job::{Job, JobResult};
use drover_core::domain::node::NodeCapability;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

impl BackendClient {
    /// Fetch the next job assigned to this node, if any
    ///
    /// The capability descriptor is sent along so the backend only hands
    /// out jobs the node can actually run.
    pub async fn fetch_next_job(&self, capability: &NodeCapability) -> Result<Option<Job>> {
        let url = format!("{}/api/jobs/next", self.base_url);
        let response = self.post(&url).json(capability).send().await?;

        let next: NextJobResponse = self.handle_response(response).await?;
        Ok(next.job)
    }

    /// Check whether the given job has been cancelled on the backend
    pub async fn is_cancelled(&self, job_id: Uuid) -> Result<bool> {
        let url = format!("{}/api/jobs/{}/cancelled", self.base_url, job_id);
        let response = self.get(&url).send().await?;

        let state: CancelledResponse = self.handle_response(response).await?;
        Ok(state.cancelled)
    }

    /// Report free-form progress for a running job
    pub async fn report_progress(&self, job_id: Uuid, message: &str) -> Result<()> {
        let url = format!("{}/api/jobs/{}/progress", self.base_url, job_id);
        let response = self
            .post(&url)
            .json(&ProgressRequest {
                message: message.to_string(),
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Report the terminal result of a job
    ///
    /// Called exactly once per job; the backend rejects a second report.
    pub async fn report_result(&self, job_id: Uuid, result: &JobResult) -> Result<()> {
        let url = format!("{}/api/jobs/{}/result", self.base_url, job_id);
        let response = self.post(&url).json(result).send().await?;

        self.handle_empty_response(response).await
    }

    /// Download an input artifact to the given local path
    ///
    /// Streams the body to disk; used by executors to populate the
    /// artifact cache.
    pub async fn download_artifact(&self, url: &str, dest: &std::path::Path) -> Result<u64> {
        let response = self.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(crate::ClientError::api_error(status.as_u16(), error_text));
        }

        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        debug!("Downloaded {} bytes from {} to {:?}", bytes.len(), url, dest);
        Ok(bytes.len() as u64)
    }
}

#[derive(Debug, Deserialize)]
struct NextJobResponse {
    job: Option<Job>,
}

#[derive(Debug, Deserialize)]
struct CancelledResponse {
    cancelled: bool,
}

#[derive(Debug, Serialize)]
struct ProgressRequest {
    message: String,
}
