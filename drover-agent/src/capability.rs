//! Node capability collection
//!
//! Derives the execution capability of this node: hardware class,
//! accelerator (probed via nvidia-smi for the configured index), total
//! memory, and available software. All probes are best-effort; a failed
//! probe leaves the corresponding field empty rather than failing startup.

use drover_core::domain::node::{Accelerator, HardwareClass, NodeCapability};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Collects the capability descriptor for this node
pub fn collect(config: &Config) -> NodeCapability {
    info!("Collecting node capability");

    let accelerator = if config.general.gpu_id >= 0 {
        probe_accelerator(config.general.gpu_id as u32)
    } else {
        None
    };

    let hardware_class = if accelerator.is_some() {
        HardwareClass::Gpu
    } else {
        HardwareClass::CpuOnly
    };

    NodeCapability {
        node_name: hostname(),
        hardware_class,
        accelerator,
        memory_bytes: total_memory_bytes(),
        software: probe_software(),
    }
}

/// Checks that the container runtime is reachable
///
/// Called once at startup; an unreachable runtime is fatal for the agent.
pub fn check_docker_available() -> anyhow::Result<String> {
    let output = Command::new("docker")
        .arg("--version")
        .output()
        .map_err(|e| anyhow::anyhow!("failed to execute 'docker --version': {}", e))?;

    if !output.status.success() {
        anyhow::bail!("docker is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(version)
}

fn hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Total system memory from /proc/meminfo
fn total_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_total(&meminfo)
}

fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib = line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(kib * 1024)
}

/// Queries nvidia-smi for the configured GPU index
fn probe_accelerator(index: u32) -> Option<Accelerator> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=name,driver_version,memory.total",
            "--format=csv,noheader,nounits",
            "-i",
            &index.to_string(),
        ])
        .output();

    let output = match output {
        Ok(out) if out.status.success() => out,
        Ok(out) => {
            warn!(
                "nvidia-smi failed for GPU {}: {}",
                index,
                String::from_utf8_lossy(&out.stderr).trim()
            );
            return None;
        }
        Err(e) => {
            debug!("nvidia-smi not available: {}", e);
            return None;
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_nvidia_smi_line(index, stdout.trim())
}

fn parse_nvidia_smi_line(index: u32, line: &str) -> Option<Accelerator> {
    let mut fields = line.split(',').map(|f| f.trim());
    let model = fields.next().filter(|f| !f.is_empty())?.to_string();
    let driver_version = fields.next().map(|f| f.to_string());
    // memory.total is reported in MiB with nounits
    let memory_bytes = fields
        .next()
        .and_then(|f| f.parse::<u64>().ok())
        .map(|mib| mib * 1024 * 1024);

    Some(Accelerator {
        index,
        model: Some(model),
        driver_version,
        memory_bytes,
    })
}

/// Software tags reported to the backend for job matching
fn probe_software() -> Vec<String> {
    let mut software = Vec::new();

    if let Ok(version) = check_docker_available() {
        // "Docker version 27.1.1, build ..." -> "docker/27.1.1"
        let tag = version
            .strip_prefix("Docker version ")
            .and_then(|rest| rest.split(',').next())
            .map(|v| format!("docker/{}", v))
            .unwrap_or_else(|| "docker".to_string());
        software.push(tag);
    }

    software
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo_total() {
        let meminfo = "MemTotal:       16384000 kB\nMemFree:         1234 kB\n";
        assert_eq!(parse_meminfo_total(meminfo), Some(16384000 * 1024));
    }

    #[test]
    fn test_parse_meminfo_missing() {
        assert_eq!(parse_meminfo_total("MemFree: 10 kB\n"), None);
    }

    #[test]
    fn test_parse_nvidia_smi_line() {
        let acc =
            parse_nvidia_smi_line(0, "NVIDIA GeForce RTX 2080 Ti, 535.154.05, 11264").unwrap();
        assert_eq!(acc.index, 0);
        assert_eq!(acc.model.as_deref(), Some("NVIDIA GeForce RTX 2080 Ti"));
        assert_eq!(acc.driver_version.as_deref(), Some("535.154.05"));
        assert_eq!(acc.memory_bytes, Some(11264 * 1024 * 1024));
    }

    #[test]
    fn test_parse_nvidia_smi_empty() {
        assert!(parse_nvidia_smi_line(0, "").is_none());
    }
}
