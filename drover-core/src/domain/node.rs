//! Node capability descriptor
//!
//! Describes what this node can execute. Collected once at startup,
//! registered with the backend, and sent along with every job fetch so the
//! scheduler only hands out jobs the node can run.

use serde::{Deserialize, Serialize};

/// Execution capability of a worker node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCapability {
    /// Hostname or address the node is reachable under
    pub node_name: String,
    /// Broad hardware class used for scheduler matching
    pub hardware_class: HardwareClass,
    /// Accelerator available to this agent, if any
    pub accelerator: Option<Accelerator>,
    /// Total system memory in bytes, where it could be determined
    pub memory_bytes: Option<u64>,
    /// Software available on the node (e.g. "docker/27.1")
    #[serde(default)]
    pub software: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareClass {
    CpuOnly,
    Gpu,
}

/// An accelerator device usable for job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accelerator {
    /// Device index passed through to the container runtime
    pub index: u32,
    pub model: Option<String>,
    pub driver_version: Option<String>,
    pub memory_bytes: Option<u64>,
}

impl NodeCapability {
    /// Whether this node satisfies a job's accelerator requirement
    pub fn has_accelerator(&self, index: u32) -> bool {
        matches!(&self.accelerator, Some(acc) if acc.index == index)
    }
}

impl std::fmt::Display for NodeCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.node_name)?;
        match &self.accelerator {
            Some(acc) => write!(
                f,
                " [gpu {} {}]",
                acc.index,
                acc.model.as_deref().unwrap_or("unknown")
            ),
            None => write!(f, " [cpu-only]"),
        }
    }
}
