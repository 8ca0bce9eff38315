//! Docker job executor
//!
//! Concrete executor that runs a job's command inside a detached Docker
//! container. Handles image acquisition (pull only when not locally
//! cached), input staging through the shared artifact cache, container
//! launch with work/cache volume mounts and optional accelerator
//! passthrough, status polling via inspect, stop-then-kill cancellation,
//! log capture, output packaging, and container/work-dir cleanup.

use async_trait::async_trait;
use drover_core::domain::artifact::OutputArtifact;
use drover_core::domain::job::{HardwareRequirement, Job, JobResult, JobStatus};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{Compression, Config};
use crate::context::ExecutionContext;
use crate::workdir::WorkDirManager;
use drover_client::BackendClient;

use super::{ExecutorError, JobExecutor, RunState};

/// Mount point of the job directory inside the container
const CONTAINER_WORKSPACE: &str = "/workspace";
/// Read-only mount point of the artifact cache inside the container
const CONTAINER_CACHE: &str = "/cache";

pub struct DockerExecutor {
    job: Job,
    config: Config,
    client: Arc<BackendClient>,
    workdir: WorkDirManager,
    context: ExecutionContext,
    cleaned_up: bool,
}

impl DockerExecutor {
    pub fn new(
        job: Job,
        config: Config,
        client: Arc<BackendClient>,
        workdir: WorkDirManager,
    ) -> Self {
        let context = ExecutionContext::new(job.id);
        Self {
            job,
            config,
            client,
            workdir,
            context,
            cleaned_up: false,
        }
    }

    fn container_name(&self) -> String {
        format!("drover-job-{}", self.context.job_id)
    }

    /// Builds the full argv for a docker invocation, honoring sudo config
    fn docker_argv(&self, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 3);
        if self.config.docker.use_sudo {
            argv.push("sudo".to_string());
            if self.config.docker.ask_sudo_pw {
                argv.push("-S".to_string());
            }
        }
        argv.push("docker".to_string());
        argv.extend(args.iter().cloned());
        argv
    }

    /// Runs a docker subcommand and returns its raw output
    async fn run_docker(&self, args: &[String]) -> Result<Output, ExecutorError> {
        let argv = self.docker_argv(args);
        debug!("Executing: {}", argv.join(" "));

        Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .await
            .map_err(|e| ExecutorError::Execution(format!("failed to run {}: {}", argv[0], e)))
    }

    /// Like `run_docker`, but a non-zero exit is an error
    async fn run_docker_checked(&self, args: &[String]) -> Result<Output, ExecutorError> {
        let output = self.run_docker(args).await?;
        if !output.status.success() {
            return Err(ExecutorError::Execution(format!(
                "docker {} failed: {}",
                args.first().map(String::as_str).unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }

    /// Pulls the job's image unless it is already in the local image cache
    async fn ensure_image(&self) -> Result<(), ExecutorError> {
        let image = &self.job.template.image;

        let inspect = self
            .run_docker(&svec(["image", "inspect", image]))
            .await?;
        if inspect.status.success() {
            self.context
                .log_info(format!("Image {} already cached locally", image));
            return Ok(());
        }

        self.context.log_info(format!("Pulling image {}", image));
        let pull = self.run_docker(&svec(["pull", image])).await?;
        if !pull.status.success() {
            return Err(ExecutorError::Preparation(format!(
                "failed to pull image {}: {}",
                image,
                String::from_utf8_lossy(&pull.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Stages all referenced artifacts into the job directory
    async fn stage_inputs(&self, job_dir: &Path) -> Result<(), ExecutorError> {
        let input_dir = job_dir.join("input");
        std::fs::create_dir_all(&input_dir)
            .map_err(|e| ExecutorError::Preparation(format!("failed to create input dir: {}", e)))?;

        for artifact in &self.job.inputs {
            let client = Arc::clone(&self.client);
            let url = artifact.url.clone();

            let cached = self
                .workdir
                .resolve_artifact(&artifact.key, |dest| async move {
                    client.download_artifact(&url, &dest).await?;
                    Ok(())
                })
                .await
                .map_err(|e| ExecutorError::Preparation(format!("{:#}", e)))?;

            let staged = input_dir.join(&artifact.file_name);
            std::fs::copy(&cached, &staged).map_err(|e| {
                ExecutorError::Preparation(format!(
                    "failed to stage artifact '{}': {}",
                    artifact.key, e
                ))
            })?;
            self.context.log_info(format!(
                "Staged {:?} artifact '{}' as input/{}",
                artifact.kind, artifact.key, artifact.file_name
            ));
        }

        std::fs::create_dir_all(job_dir.join("output"))
            .map_err(|e| ExecutorError::Preparation(format!("failed to create output dir: {}", e)))?;

        Ok(())
    }

    /// Host uid:gid for `use_current_user`, via the `id` utility
    async fn current_user_spec(&self) -> Option<String> {
        let uid = Command::new("id").arg("-u").output().await.ok()?;
        let gid = Command::new("id").arg("-g").output().await.ok()?;
        if !uid.status.success() || !gid.status.success() {
            return None;
        }
        Some(format!(
            "{}:{}",
            String::from_utf8_lossy(&uid.stdout).trim(),
            String::from_utf8_lossy(&gid.stdout).trim()
        ))
    }

    /// Captures the container's combined output into the job log buffer
    async fn capture_container_logs(&self) {
        let Some(name) = &self.context.container_name else {
            return;
        };

        match self.run_docker(&svec(["logs", name])).await {
            Ok(output) => {
                for line in String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .chain(String::from_utf8_lossy(&output.stderr).lines())
                {
                    self.context.log_info(line.to_string());
                }
            }
            Err(e) => {
                self.context
                    .log_error(format!("failed to capture container logs: {}", e));
            }
        }
    }

    /// Packages the files under the job's output directory into a single
    /// archive artifact
    ///
    /// The archive is always produced when outputs exist; `compression`
    /// only selects between a plain and a gzipped tarball. Falls back to
    /// reporting the files individually if archiving fails.
    async fn collect_outputs(&self, job_dir: &Path) -> Vec<OutputArtifact> {
        let output_dir = job_dir.join("output");

        let mut files = Vec::new();
        collect_files(&output_dir, &output_dir, &mut files);
        if files.is_empty() {
            return Vec::new();
        }

        let (archive_name, tar_flags) = match self.config.general.compression {
            Compression::None => ("outputs.tar", "-cf"),
            Compression::Gzip => ("outputs.tar.gz", "-czf"),
        };

        let archive = job_dir.join(archive_name);
        let status = Command::new("tar")
            .arg(tar_flags)
            .arg(&archive)
            .arg("-C")
            .arg(job_dir)
            .arg("output")
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                let size = std::fs::metadata(&archive).map(|m| m.len()).unwrap_or(0);
                vec![OutputArtifact {
                    name: archive_name.to_string(),
                    path: archive_name.to_string(),
                    size_bytes: size,
                }]
            }
            _ => {
                self.context
                    .log_error("failed to package outputs, reporting them unarchived");
                files
            }
        }
    }

    /// Persists the accumulated job log alongside the outputs
    fn persist_log(&self, job_dir: &Path) {
        let log_path = job_dir.join("log.json");
        let entries = self.context.peek_logs();
        match serde_json::to_vec_pretty(&entries) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&log_path, bytes) {
                    warn!("Failed to write job log to {:?}: {}", log_path, e);
                }
            }
            Err(e) => warn!("Failed to serialize job log: {}", e),
        }
    }
}

#[async_trait]
impl JobExecutor for DockerExecutor {
    async fn prepare(&mut self) -> Result<(), ExecutorError> {
        let job_dir = match &self.context.job_dir {
            // re-entrant: keep the directory from an earlier attempt
            Some(dir) => dir.clone(),
            None => {
                let dir = self
                    .workdir
                    .create_job_dir(self.job.id)
                    .map_err(|e| ExecutorError::Preparation(format!("{:#}", e)))?;
                self.context.job_dir = Some(dir.clone());
                dir
            }
        };

        self.context
            .log_info(format!("Preparing job {} in {:?}", self.job.id, job_dir));
        self.ensure_image().await?;
        self.stage_inputs(&job_dir).await?;
        Ok(())
    }

    async fn start(&mut self) -> Result<(), ExecutorError> {
        let job_dir = self
            .context
            .job_dir
            .clone()
            .ok_or_else(|| ExecutorError::Execution("start() before prepare()".to_string()))?;

        let name = self.container_name();
        let mut args = svec([
            "run",
            "-d",
            "--name",
            &name,
            "-v",
            &format!("{}:{}", job_dir.display(), CONTAINER_WORKSPACE),
            "-v",
            &format!(
                "{}:{}:ro",
                self.workdir.cache_dir().display(),
                CONTAINER_CACHE
            ),
            "-w",
            CONTAINER_WORKSPACE,
        ]);

        args.extend(accelerator_args(self.job.hardware));

        if self.config.docker.use_current_user {
            match self.current_user_spec().await {
                Some(spec) => args.extend(svec(["-u", &spec])),
                None => warn!("use_current_user set but uid/gid could not be determined"),
            }
        }

        // advisory environment for images whose entrypoints self-install
        if !self.job.template.required_packages.is_empty() {
            args.extend(svec([
                "-e",
                &format!(
                    "DROVER_REQUIRED_PACKAGES={}",
                    self.job.template.required_packages.join(" ")
                ),
            ]));
            args.extend(svec([
                "-e",
                &format!("DROVER_PIP_NO_CACHE={}", self.config.general.pip_no_cache),
            ]));
        }

        args.push(self.job.template.image.clone());
        args.extend(expand_placeholders(
            &self.job.template.command,
            &self.job.parameters,
        ));

        let output = self.run_docker_checked(&args).await?;
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        self.context.container_name = Some(name.clone());
        self.context.started_at = Some(chrono::Utc::now());
        self.context
            .log_info(format!("Started container {} ({})", name, container_id));
        Ok(())
    }

    async fn poll(&mut self) -> Result<RunState, ExecutorError> {
        let name = self
            .context
            .container_name
            .clone()
            .ok_or_else(|| ExecutorError::Execution("poll() before start()".to_string()))?;

        let output = self
            .run_docker_checked(&svec([
                "inspect",
                "-f",
                "{{.State.Running}};{{.State.ExitCode}}",
                &name,
            ]))
            .await?;

        parse_inspect_state(String::from_utf8_lossy(&output.stdout).trim())
            .ok_or_else(|| ExecutorError::Execution(format!("unparseable inspect output for {}", name)))
    }

    async fn cancel(&mut self) -> Result<(), ExecutorError> {
        self.context.request_cancel();

        let Some(name) = self.context.container_name.clone() else {
            // nothing running yet; the flag alone forces the outcome
            return Ok(());
        };

        self.context.log_info(format!(
            "Cancellation requested, stopping container {} (grace {}s)",
            name, self.config.docker.stop_timeout
        ));

        // best-effort stop, then escalate if the container is still up
        let _ = self
            .run_docker(&svec([
                "stop",
                "-t",
                &self.config.docker.stop_timeout.to_string(),
                &name,
            ]))
            .await;

        if let Ok(RunState::Running) = self.poll().await {
            warn!("Container {} survived stop, killing", name);
            let _ = self.run_docker(&svec(["kill", &name])).await;
        }

        Ok(())
    }

    async fn collect_result(&mut self) -> JobResult {
        let exit_code = match self.poll().await {
            Ok(RunState::Exited { code }) => Some(code),
            Ok(RunState::Running) => None,
            Err(_) => None,
        };

        self.capture_container_logs().await;

        let (artifacts, started_at) = match &self.context.job_dir {
            Some(job_dir) => {
                let artifacts = self.collect_outputs(job_dir).await;
                self.persist_log(job_dir);
                (artifacts, self.context.started_at)
            }
            None => (Vec::new(), None),
        };

        let status = classify_exit(self.context.cancel_requested(), exit_code);
        let error_message = match status {
            JobStatus::Failed => Some(format!(
                "container exited with code {}",
                exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            )),
            _ => None,
        };

        JobResult {
            status,
            exit_code,
            artifacts,
            error_message,
            started_at,
            finished_at: chrono::Utc::now(),
        }
    }

    async fn cleanup(&mut self) -> Result<(), ExecutorError> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;

        let mut first_error = None;

        if let Some(name) = self.context.container_name.take() {
            debug!("Removing container {}", name);
            match self.run_docker(&svec(["rm", "-f", &name])).await {
                Ok(output) if !output.status.success() => {
                    first_error = Some(ExecutorError::Cleanup(format!(
                        "failed to remove container {}: {}",
                        name,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                Err(e) => first_error = Some(ExecutorError::Cleanup(e.to_string())),
                Ok(_) => {}
            }
        }

        if let Some(job_dir) = self.context.job_dir.take() {
            self.workdir.remove_job_dir(&job_dir);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn context(&self) -> &ExecutionContext {
        &self.context
    }
}

/// Owned-string argv helper
fn svec<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Device passthrough flags for the job's hardware requirement
fn accelerator_args(hardware: HardwareRequirement) -> Vec<String> {
    match hardware {
        HardwareRequirement::None => Vec::new(),
        HardwareRequirement::Accelerator { index } => {
            vec!["--gpus".to_string(), format!("device={}", index)]
        }
    }
}

/// Replaces `${name}` placeholders with parameter values
///
/// Unknown placeholders are left intact; non-string values use their JSON
/// representation.
fn expand_placeholders(command: &[String], parameters: &HashMap<String, JsonValue>) -> Vec<String> {
    command
        .iter()
        .map(|part| {
            let mut expanded = part.clone();
            for (name, value) in parameters {
                let placeholder = format!("${{{}}}", name);
                if expanded.contains(&placeholder) {
                    let replacement = match value {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    expanded = expanded.replace(&placeholder, &replacement);
                }
            }
            expanded
        })
        .collect()
}

/// Parses "running;exit_code" as produced by the inspect format string
fn parse_inspect_state(raw: &str) -> Option<RunState> {
    let (running, code) = raw.split_once(';')?;
    match running {
        "true" => Some(RunState::Running),
        "false" => Some(RunState::Exited {
            code: code.parse().ok()?,
        }),
        _ => None,
    }
}

/// Final status: an issued cancel wins over any exit code
fn classify_exit(cancel_requested: bool, exit_code: Option<i64>) -> JobStatus {
    if cancel_requested {
        JobStatus::Cancelled
    } else {
        match exit_code {
            Some(0) => JobStatus::Succeeded,
            _ => JobStatus::Failed,
        }
    }
}

/// Recursively gathers files under `dir` as artifacts relative to `root`
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<OutputArtifact>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(meta) = entry.metadata() {
            let relative: PathBuf = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            out.push(OutputArtifact {
                name: relative.to_string_lossy().to_string(),
                path: Path::new("output").join(&relative).to_string_lossy().to_string(),
                size_bytes: meta.len(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::domain::job::JobTemplate;
    use serde_json::json;
    use uuid::Uuid;

    fn test_executor(compression: Compression, root: &Path) -> DockerExecutor {
        let job = Job {
            id: Uuid::new_v4(),
            template: JobTemplate {
                executor_class: "docker".to_string(),
                required_packages: vec![],
                image: "alpine:latest".to_string(),
                command: vec!["true".to_string()],
            },
            parameters: HashMap::new(),
            inputs: vec![],
            hardware: HardwareRequirement::None,
        };

        let mut config = Config::default();
        config.general.compression = compression;

        DockerExecutor::new(
            job,
            config,
            Arc::new(BackendClient::new("http://localhost:8080", "launcher", "")),
            WorkDirManager::with_roots(root.join("work"), root.join("cache"), false),
        )
    }

    fn staged_job_dir(root: &Path) -> PathBuf {
        let job_dir = root.join("job");
        std::fs::create_dir_all(job_dir.join("output")).unwrap();
        std::fs::write(job_dir.join("output").join("model.bin"), b"weights").unwrap();
        job_dir
    }

    #[tokio::test]
    async fn test_outputs_archived_without_compression() {
        let root = std::env::temp_dir().join(format!("drover-docker-test-{}", Uuid::new_v4()));
        let job_dir = staged_job_dir(&root);
        let executor = test_executor(Compression::None, &root);

        let artifacts = executor.collect_outputs(&job_dir).await;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "outputs.tar");
        assert!(artifacts[0].size_bytes > 0);
        assert!(job_dir.join("outputs.tar").exists());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_outputs_archived_with_gzip() {
        let root = std::env::temp_dir().join(format!("drover-docker-test-{}", Uuid::new_v4()));
        let job_dir = staged_job_dir(&root);
        let executor = test_executor(Compression::Gzip, &root);

        let artifacts = executor.collect_outputs(&job_dir).await;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "outputs.tar.gz");
        assert!(job_dir.join("outputs.tar.gz").exists());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_empty_output_dir_yields_no_artifacts() {
        let root = std::env::temp_dir().join(format!("drover-docker-test-{}", Uuid::new_v4()));
        let job_dir = root.join("job");
        std::fs::create_dir_all(job_dir.join("output")).unwrap();
        let executor = test_executor(Compression::None, &root);

        assert!(executor.collect_outputs(&job_dir).await.is_empty());
        assert!(!job_dir.join("outputs.tar").exists());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_expand_placeholders() {
        let mut params = HashMap::new();
        params.insert("epochs".to_string(), json!(50));
        params.insert("dataset".to_string(), json!("coco"));

        let command = vec![
            "train".to_string(),
            "--epochs=${epochs}".to_string(),
            "--data=${dataset}".to_string(),
            "--keep=${unknown}".to_string(),
        ];

        let expanded = expand_placeholders(&command, &params);
        assert_eq!(expanded[1], "--epochs=50");
        assert_eq!(expanded[2], "--data=coco");
        // unknown placeholders are left for the image to interpret
        assert_eq!(expanded[3], "--keep=${unknown}");
    }

    #[test]
    fn test_accelerator_args() {
        assert!(accelerator_args(HardwareRequirement::None).is_empty());
        assert_eq!(
            accelerator_args(HardwareRequirement::Accelerator { index: 1 }),
            vec!["--gpus".to_string(), "device=1".to_string()]
        );
    }

    #[test]
    fn test_parse_inspect_state() {
        assert_eq!(parse_inspect_state("true;0"), Some(RunState::Running));
        assert_eq!(
            parse_inspect_state("false;0"),
            Some(RunState::Exited { code: 0 })
        );
        assert_eq!(
            parse_inspect_state("false;137"),
            Some(RunState::Exited { code: 137 })
        );
        assert_eq!(parse_inspect_state("garbage"), None);
    }

    #[test]
    fn test_classify_exit() {
        assert_eq!(classify_exit(false, Some(0)), JobStatus::Succeeded);
        assert_eq!(classify_exit(false, Some(2)), JobStatus::Failed);
        assert_eq!(classify_exit(false, None), JobStatus::Failed);
        // cancellation wins regardless of the container's own exit code
        assert_eq!(classify_exit(true, Some(0)), JobStatus::Cancelled);
        assert_eq!(classify_exit(true, Some(137)), JobStatus::Cancelled);
    }
}
