//! Work directory management
//!
//! Allocates a fresh scratch directory per job under the configured work
//! root and maintains a long-lived cache for downloaded artifacts keyed by
//! artifact identity. The cache is populated idempotently: a second job
//! referencing the same key resolves to the already-cached file without a
//! second fetch. Writers stage into a temporary file and rename, so a
//! concurrent populate of the same key never exposes a partial file.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;

/// Manages per-job scratch directories and the shared artifact cache
#[derive(Debug, Clone)]
pub struct WorkDirManager {
    work_dir: PathBuf,
    cache_dir: PathBuf,
    keep_job_dirs: bool,
}

impl WorkDirManager {
    pub fn new(config: &Config) -> Self {
        Self {
            work_dir: config.docker.work_dir.clone(),
            cache_dir: config.docker.cache_dir.clone(),
            keep_job_dirs: config.general.keep_job_dirs,
        }
    }

    #[cfg(test)]
    pub fn with_roots(work_dir: PathBuf, cache_dir: PathBuf, keep_job_dirs: bool) -> Self {
        Self {
            work_dir,
            cache_dir,
            keep_job_dirs,
        }
    }

    /// Creates the work and cache roots if they are missing
    ///
    /// Failure here is fatal for the agent process.
    pub fn ensure_roots(&self) -> Result<()> {
        for (path, desc) in [
            (&self.work_dir, "work directory"),
            (&self.cache_dir, "cache directory"),
        ] {
            if !path.exists() {
                warn!("{} {:?} does not exist, creating", desc, path);
                std::fs::create_dir_all(path)
                    .with_context(|| format!("failed to create {} {:?}", desc, path))?;
            }
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Allocates a fresh, uniquely named scratch directory for a job
    pub fn create_job_dir(&self, job_id: Uuid) -> Result<PathBuf> {
        let dir = self.work_dir.join(format!("job-{}", job_id));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create job directory {:?}", dir))?;
        debug!("Created job directory {:?}", dir);
        Ok(dir)
    }

    /// Resolves an artifact in the cache, fetching it if absent
    ///
    /// The fetch closure receives the path to write to; on success the
    /// staged file is renamed into its final location. Requesting the same
    /// key twice performs exactly one fetch.
    pub async fn resolve_artifact<F, Fut>(&self, key: &str, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        // keys come from the backend; keep them inside the cache root
        if !is_safe_cache_key(key) {
            anyhow::bail!("invalid artifact key '{}'", key);
        }

        let cached = self.cache_dir.join(key);

        if cached.exists() {
            debug!("Artifact '{}' already cached at {:?}", key, cached);
            return Ok(cached);
        }

        if let Some(parent) = cached.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache subdirectory {:?}", parent))?;
        }

        info!("Fetching artifact '{}' into cache", key);
        let staging = self
            .cache_dir
            .join(format!(".{}.partial-{}", key.replace('/', "_"), Uuid::new_v4()));

        let fetched = fetch(staging.clone()).await;
        if let Err(e) = fetched {
            let _ = std::fs::remove_file(&staging);
            return Err(e.context(format!("failed to fetch artifact '{}'", key)));
        }

        // Another populate of the same key may have won the rename race;
        // either file is a complete copy of the artifact.
        if cached.exists() {
            let _ = std::fs::remove_file(&staging);
        } else {
            std::fs::rename(&staging, &cached)
                .with_context(|| format!("failed to move artifact '{}' into cache", key))?;
        }

        Ok(cached)
    }

    /// Removes a job's scratch directory once its result is reported
    ///
    /// Retains the directory when `keep_job_dirs` is configured. Removal
    /// errors are logged and swallowed; cleanup is best-effort.
    pub fn remove_job_dir(&self, job_dir: &Path) {
        if self.keep_job_dirs {
            info!("Keeping job directory {:?}", job_dir);
            return;
        }

        debug!("Removing job directory {:?}", job_dir);
        if let Err(e) = std::fs::remove_dir_all(job_dir) {
            if job_dir.exists() {
                warn!("Failed to remove job directory {:?}: {}", job_dir, e);
            }
        }
    }
}

/// A cache key may use `/` for sub-grouping, but every segment must be a
/// plain name: no empty segments (absolute paths), no `.`/`..`, and no
/// backslashes.
fn is_safe_cache_key(key: &str) -> bool {
    !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
