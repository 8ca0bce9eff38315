//! Node registration endpoints
//!
//! The agent registers its capability descriptor at startup so the backend
//! can match jobs against it. The registration response carries any job the
//! backend still has attached to this node from before a restart, so the
//! agent can fail it cleanly before polling.

use crate::BackendClient;
use crate::error::Result;
use drover_core::domain::node::NodeCapability;
use serde::Deserialize;
use uuid::Uuid;

/// Outcome of registering this node with the backend
#[derive(Debug, Clone, Deserialize)]
pub struct NodeRegistration {
    /// Backend-assigned node id
    pub node_id: i64,
    /// Job still attached to this node from a previous agent run, if any
    pub stale_job_id: Option<Uuid>,
}

impl BackendClient {
    /// Register (or update) this node with the backend
    pub async fn register_node(&self, capability: &NodeCapability) -> Result<NodeRegistration> {
        let url = format!("{}/api/nodes/register", self.base_url);
        let response = self.post(&url).json(capability).send().await?;

        self.handle_response(response).await
    }

    /// Ping the backend to keep the session alive
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/nodes/ping", self.base_url);
        let response = self.post(&url).send().await?;

        self.handle_empty_response(response).await
    }
}
