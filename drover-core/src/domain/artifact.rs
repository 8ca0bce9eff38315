//! Artifact domain types

use serde::{Deserialize, Serialize};

/// Kind of input artifact a job references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Dataset,
    Model,
}

/// Reference to a downloadable input artifact (dataset or base model)
///
/// `key` identifies the artifact in the shared download cache; two jobs
/// referencing the same key resolve to the same cached file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub key: String,
    pub kind: ArtifactKind,
    /// Where the backend serves the artifact from
    pub url: String,
    /// File name the artifact is staged under inside the job directory
    pub file_name: String,
}

/// An output produced by a finished job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub name: String,
    /// Path of the artifact on the node, relative to the job directory
    pub path: String,
    pub size_bytes: u64,
}
