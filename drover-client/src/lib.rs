//! Drover backend client
//!
//! A type-safe HTTP client for the job backend consumed by the agent. The
//! backend owns the wire shapes; this crate treats them as typed RPC:
//! fetch the next runnable job, check for cancellation, report progress
//! and results, register the node.
//!
//! # Example
//!
//! ```no_run
//! use drover_client::BackendClient;
//!
//! # async fn example() -> drover_client::Result<()> {
//! let client = BackendClient::new("http://localhost:8080", "launcher", "secret");
//! if let Some(job) = client.fetch_next_job(&capability()).await? {
//!     println!("got job {}", job.id);
//! }
//! # Ok(())
//! # }
//! # fn capability() -> drover_core::domain::node::NodeCapability { unimplemented!() }
//! ```

pub mod error;
mod jobs;
mod nodes;

pub use error::{ClientError, Result};
pub use nodes::NodeRegistration;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the job backend API
#[derive(Debug, Clone)]
pub struct BackendClient {
    /// Base URL of the backend (e.g., "http://localhost:8080")
    base_url: String,
    /// Username used for basic authentication
    user: String,
    /// Password used for basic authentication
    password: String,
    /// HTTP client instance
    client: Client,
}

impl BackendClient {
    /// Create a new backend client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the backend API
    /// * `user` / `password` - Credentials for the backend
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
            client: Client::new(),
        }
    }

    /// Create a backend client with a custom HTTP client
    ///
    /// Allows configuring timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
            client,
        }
    }

    /// Get the base URL of the backend
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
    }

    pub(crate) fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .basic_auth(&self.user, Some(&self.password))
    }

    /// Handle an API response and deserialize JSON
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    pub(crate) async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = BackendClient::new("http://localhost:8080", "launcher", "secret");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = BackendClient::new("http://localhost:8080/", "launcher", "secret");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
