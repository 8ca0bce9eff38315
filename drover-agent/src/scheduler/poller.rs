//! Job poller
//!
//! The control loop of the agent. Repeatedly asks the backend for the next
//! job matching this node's capability, dispatches it to an executor
//! resolved from the registry, supervises the running job with a
//! concurrent cancellation watcher, and reports the terminal result.
//!
//! Per-job errors of any kind are converted into a failed result and
//! reported; nothing a single job does can terminate the loop. Backend
//! unavailability is answered with the configured backoff ladder.

use anyhow::Result;
use drover_core::domain::job::{Job, JobResult, JobStatus};
use drover_core::domain::log::LogEntry;
use drover_core::domain::node::NodeCapability;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::config::Config;
use crate::executor::{ExecutorRegistry, JobExecutor, RunState};

/// Cadence of the completion poll while a job is running
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive status-poll failures tolerated before the job is failed
const MAX_POLL_ERRORS: u32 = 3;

/// Job poller driving the fetch/execute/report cycle
pub struct JobPoller {
    config: Config,
    backend: Arc<dyn Backend>,
    registry: Arc<ExecutorRegistry>,
    capability: NodeCapability,
}

impl JobPoller {
    pub fn new(
        config: Config,
        backend: Arc<dyn Backend>,
        registry: Arc<ExecutorRegistry>,
        capability: NodeCapability,
    ) -> Self {
        Self {
            config,
            backend,
            registry,
            capability,
        }
    }

    /// Runs the poll loop
    ///
    /// In continuous mode the loop runs until externally interrupted; in
    /// single-shot mode it ends after one executed job, one empty poll,
    /// or one backend error.
    pub async fn run(&self, continuous: bool) -> Result<()> {
        info!(
            "Starting job poller (continuous: {}, idle schedule: {})",
            continuous, self.config.poll_simple.interval
        );

        let mut error_ladder = self.config.backend_error_schedule();
        let mut idle_schedule = self.config.poll_interval_schedule();

        loop {
            debug!("Polling backend for the next job");

            match self.backend.fetch_next_job(&self.capability).await {
                Ok(Some(job)) => {
                    error_ladder.reset();
                    idle_schedule.reset();
                    self.execute_job(job).await;
                }
                Ok(None) => {
                    error_ladder.reset();
                    debug!("No job available");
                    if continuous {
                        idle_schedule.sleep().await;
                        idle_schedule.advance();
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!("Backend unavailable: {}", e);
                    // single-shot has no next attempt to wait for
                    if continuous {
                        error_ladder.sleep().await;
                        error_ladder.advance();
                    }
                }
                Err(e) => {
                    error!("Failed to poll backend: {}", e);
                    if continuous {
                        error_ladder.sleep().await;
                        error_ladder.advance();
                    }
                }
            }

            if !continuous {
                break;
            }
        }

        Ok(())
    }

    /// Executes a single job end to end and reports its result
    ///
    /// Reporting happens exactly once, and cleanup runs on every exit
    /// path, after the result has been reported.
    async fn execute_job(&self, job: Job) {
        let job_id = job.id;
        info!(
            "Dispatching job {} (executor class '{}')",
            job_id, job.template.executor_class
        );

        let mut executor = match self.registry.instantiate(job) {
            Ok(executor) => executor,
            Err(e) => {
                error!("Cannot dispatch job {}: {}", job_id, e);
                let result = JobResult::failed(e.to_string());
                self.report(job_id, &result).await;
                return;
            }
        };

        let result = self.drive(job_id, executor.as_mut()).await;

        // flush whatever the executor logged after the last progress tick
        self.flush_logs(job_id, executor.as_mut()).await;

        info!("Job {} finished with status: {}", job_id, result.status);
        self.report(job_id, &result).await;

        if let Err(e) = executor.cleanup().await {
            warn!("Cleanup for job {} incomplete: {}", job_id, e);
        }
    }

    /// Walks one executor through prepare/start/monitor/collect
    async fn drive(&self, job_id: Uuid, executor: &mut dyn JobExecutor) -> JobResult {
        if let Err(e) = executor.prepare().await {
            error!("Preparation of job {} failed: {}", job_id, e);
            return JobResult::failed(e.to_string());
        }

        if let Err(e) = executor.start().await {
            error!("Start of job {} failed: {}", job_id, e);
            return JobResult::failed(e.to_string());
        }

        if let Err(e) = self.monitor(job_id, executor).await {
            error!("Job {} failed while running: {}", job_id, e);
            // make sure nothing is left running before collecting
            if let Err(cancel_err) = executor.cancel().await {
                warn!("Failed to stop job {}: {}", job_id, cancel_err);
            }
            return JobResult::failed(e.to_string());
        }

        let mut result = executor.collect_result().await;

        // an issued cancel wins over whatever the process reported
        if executor.context().cancel_requested() && result.status != JobStatus::Cancelled {
            result.status = JobStatus::Cancelled;
            result.error_message = None;
        }

        result
    }

    /// Supervises a running job until it reaches a terminal state
    ///
    /// Two concurrent observers: the completion poll every
    /// [`STATUS_POLL_INTERVAL`], and the cancellation check every
    /// `cancel_check_wait` seconds (which also drains the job log into a
    /// progress report). If cancellation is observed first, `cancel()` is
    /// invoked and the loop keeps polling until the process is gone.
    async fn monitor(&self, job_id: Uuid, executor: &mut dyn JobExecutor) -> Result<()> {
        let mut status_interval = time::interval(STATUS_POLL_INTERVAL);
        let mut cancel_interval =
            time::interval(Duration::from_secs(self.config.general.cancel_check_wait));

        let mut poll_errors = 0u32;

        loop {
            tokio::select! {
                _ = status_interval.tick() => {
                    match executor.poll().await {
                        Ok(RunState::Exited { code }) => {
                            debug!("Job {} process exited with code {}", job_id, code);
                            return Ok(());
                        }
                        Ok(RunState::Running) => {
                            poll_errors = 0;
                        }
                        Err(e) => {
                            poll_errors += 1;
                            warn!(
                                "Status poll for job {} failed ({}/{}): {}",
                                job_id, poll_errors, MAX_POLL_ERRORS, e
                            );
                            if poll_errors >= MAX_POLL_ERRORS {
                                anyhow::bail!("lost track of job process: {}", e);
                            }
                        }
                    }
                }
                _ = cancel_interval.tick() => {
                    self.flush_logs(job_id, executor).await;

                    if !executor.context().cancel_requested() {
                        // a backend error here means "not cancelled"; the
                        // next tick checks again
                        match self.backend.is_cancelled(job_id).await {
                            Ok(true) => {
                                info!("Job {} was cancelled on the backend", job_id);
                                if let Err(e) = executor.cancel().await {
                                    warn!("Failed to cancel job {}: {}", job_id, e);
                                }
                            }
                            Ok(false) => {}
                            Err(e) => {
                                debug!("Cancellation check for job {} failed: {}", job_id, e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Drains the executor's log buffer into a progress report
    async fn flush_logs(&self, job_id: Uuid, executor: &mut dyn JobExecutor) {
        let entries = executor.context().drain_logs();
        if entries.is_empty() {
            return;
        }

        let message = format_log_batch(&entries);
        if let Err(e) = self.backend.report_progress(job_id, &message).await {
            debug!("Failed to report progress for job {}: {}", job_id, e);
        }
    }

    /// Reports the terminal result; failures are logged, never retried
    /// into a second report
    async fn report(&self, job_id: Uuid, result: &JobResult) {
        if let Err(e) = self.backend.report_result(job_id, result).await {
            error!("Failed to report result for job {}: {}", job_id, e);
        }
    }
}

fn format_log_batch(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::executor::ExecutorError;
    use async_trait::async_trait;
    use drover_client::ClientError;
    use drover_core::domain::job::{HardwareRequirement, JobTemplate};
    use drover_core::domain::node::{HardwareClass, NodeCapability};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn test_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            template: JobTemplate {
                executor_class: "mock".to_string(),
                required_packages: vec![],
                image: "alpine:latest".to_string(),
                command: vec!["true".to_string()],
            },
            parameters: HashMap::new(),
            inputs: vec![],
            hardware: HardwareRequirement::None,
        }
    }

    fn capability() -> NodeCapability {
        NodeCapability {
            node_name: "test-node".to_string(),
            hardware_class: HardwareClass::CpuOnly,
            accelerator: None,
            memory_bytes: None,
            software: vec![],
        }
    }

    /// In-memory backend recording every interaction
    #[derive(Default)]
    struct MockBackend {
        jobs: Mutex<Vec<Job>>,
        /// emit one transient error per entry before serving jobs
        transient_failures: AtomicU32,
        cancel_job: Mutex<Option<Uuid>>,
        fetch_calls: AtomicUsize,
        cancel_checks: AtomicUsize,
        results: Mutex<Vec<(Uuid, JobResult)>>,
    }

    impl MockBackend {
        fn with_jobs(jobs: Vec<Job>) -> Self {
            Self {
                jobs: Mutex::new(jobs),
                ..Default::default()
            }
        }

        fn results(&self) -> Vec<(Uuid, JobResult)> {
            self.results.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn fetch_next_job(
            &self,
            _capability: &NodeCapability,
        ) -> Result<Option<Job>, ClientError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.transient_failures.load(Ordering::SeqCst) > 0 {
                self.transient_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ClientError::api_error(503, "unavailable"));
            }
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.is_empty() {
                Ok(None)
            } else {
                Ok(Some(jobs.remove(0)))
            }
        }

        async fn is_cancelled(&self, job_id: Uuid) -> Result<bool, ClientError> {
            self.cancel_checks.fetch_add(1, Ordering::SeqCst);
            Ok(*self.cancel_job.lock().unwrap() == Some(job_id))
        }

        async fn report_progress(&self, _job_id: Uuid, _message: &str) -> Result<(), ClientError> {
            Ok(())
        }

        async fn report_result(&self, job_id: Uuid, result: &JobResult) -> Result<(), ClientError> {
            self.results.lock().unwrap().push((job_id, result.clone()));
            Ok(())
        }
    }

    /// Shared observation point for mock executor instances
    #[derive(Default)]
    struct ExecProbe {
        prepare_calls: AtomicUsize,
        cleanup_calls: AtomicUsize,
        collect_calls: AtomicUsize,
        cancel_calls: AtomicUsize,
    }

    struct MockExecutor {
        context: ExecutionContext,
        probe: Arc<ExecProbe>,
        /// number of status polls answered with Running before exiting
        polls_until_exit: u32,
        exit_code: i64,
        fail_prepare: bool,
    }

    impl MockExecutor {
        fn register(
            registry: &mut ExecutorRegistry,
            probe: Arc<ExecProbe>,
            polls_until_exit: u32,
            exit_code: i64,
            fail_prepare: bool,
        ) {
            registry.register("mock", move |job| {
                Box::new(MockExecutor {
                    context: ExecutionContext::new(job.id),
                    probe: Arc::clone(&probe),
                    polls_until_exit,
                    exit_code,
                    fail_prepare,
                })
            });
        }
    }

    #[async_trait]
    impl JobExecutor for MockExecutor {
        async fn prepare(&mut self) -> Result<(), ExecutorError> {
            self.probe.prepare_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_prepare {
                return Err(ExecutorError::Preparation("artifact unreachable".into()));
            }
            Ok(())
        }

        async fn start(&mut self) -> Result<(), ExecutorError> {
            Ok(())
        }

        async fn poll(&mut self) -> Result<RunState, ExecutorError> {
            if self.context.cancel_requested() || self.polls_until_exit == 0 {
                let code = if self.context.cancel_requested() {
                    137
                } else {
                    self.exit_code
                };
                return Ok(RunState::Exited { code });
            }
            self.polls_until_exit -= 1;
            Ok(RunState::Running)
        }

        async fn cancel(&mut self) -> Result<(), ExecutorError> {
            self.probe.cancel_calls.fetch_add(1, Ordering::SeqCst);
            self.context.request_cancel();
            Ok(())
        }

        async fn collect_result(&mut self) -> JobResult {
            self.probe.collect_calls.fetch_add(1, Ordering::SeqCst);
            let status = if self.context.cancel_requested() {
                JobStatus::Cancelled
            } else if self.exit_code == 0 {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            };
            JobResult {
                status,
                exit_code: Some(self.exit_code),
                artifacts: vec![],
                error_message: None,
                started_at: None,
                finished_at: chrono::Utc::now(),
            }
        }

        async fn cleanup(&mut self) -> Result<(), ExecutorError> {
            self.probe.cleanup_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn context(&self) -> &ExecutionContext {
            &self.context
        }
    }

    fn poller(backend: Arc<MockBackend>, registry: ExecutorRegistry) -> JobPoller {
        JobPoller::new(
            Config::default(),
            backend,
            Arc::new(registry),
            capability(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_job_reports_succeeded() {
        let backend = Arc::new(MockBackend::with_jobs(vec![test_job()]));
        let probe = Arc::new(ExecProbe::default());
        let mut registry = ExecutorRegistry::new();
        MockExecutor::register(&mut registry, Arc::clone(&probe), 3, 0, false);

        poller(Arc::clone(&backend), registry)
            .run(false)
            .await
            .unwrap();

        let results = backend.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.status, JobStatus::Succeeded);
        assert_eq!(probe.cleanup_calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.collect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonzero_exit_reports_failed() {
        let backend = Arc::new(MockBackend::with_jobs(vec![test_job()]));
        let probe = Arc::new(ExecProbe::default());
        let mut registry = ExecutorRegistry::new();
        MockExecutor::register(&mut registry, Arc::clone(&probe), 2, 3, false);

        poller(Arc::clone(&backend), registry)
            .run(false)
            .await
            .unwrap();

        let results = backend.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.status, JobStatus::Failed);
        assert_eq!(probe.cleanup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_forces_cancelled_status() {
        let job = test_job();
        let job_id = job.id;
        let backend = Arc::new(MockBackend::with_jobs(vec![job]));
        *backend.cancel_job.lock().unwrap() = Some(job_id);

        let probe = Arc::new(ExecProbe::default());
        let mut registry = ExecutorRegistry::new();
        // would run for a long time if never cancelled
        MockExecutor::register(&mut registry, Arc::clone(&probe), 10_000, 0, false);

        poller(Arc::clone(&backend), registry)
            .run(false)
            .await
            .unwrap();

        let results = backend.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.status, JobStatus::Cancelled);
        assert_eq!(probe.cancel_calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.cleanup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_check_cadence() {
        // a ~25s job with cancel_check_wait = 10 must be checked at least twice
        let backend = Arc::new(MockBackend::with_jobs(vec![test_job()]));
        let probe = Arc::new(ExecProbe::default());
        let mut registry = ExecutorRegistry::new();
        MockExecutor::register(&mut registry, Arc::clone(&probe), 25, 0, false);

        poller(Arc::clone(&backend), registry)
            .run(false)
            .await
            .unwrap();

        assert!(backend.cancel_checks.load(Ordering::SeqCst) >= 2);
        assert_eq!(backend.results()[0].1.status, JobStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_failure_reports_failed_and_cleans_up() {
        let backend = Arc::new(MockBackend::with_jobs(vec![test_job()]));
        let probe = Arc::new(ExecProbe::default());
        let mut registry = ExecutorRegistry::new();
        MockExecutor::register(&mut registry, Arc::clone(&probe), 0, 0, true);

        poller(Arc::clone(&backend), registry)
            .run(false)
            .await
            .unwrap();

        let results = backend.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.status, JobStatus::Failed);
        assert!(
            results[0]
                .1
                .error_message
                .as_deref()
                .unwrap()
                .contains("artifact unreachable")
        );
        // cleanup still ran exactly once, collect never did
        assert_eq!(probe.cleanup_calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.collect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_executor_fails_job_only() {
        let mut job = test_job();
        job.template.executor_class = "mystery".to_string();
        let backend = Arc::new(MockBackend::with_jobs(vec![job]));
        let registry = ExecutorRegistry::new();

        poller(Arc::clone(&backend), registry)
            .run(false)
            .await
            .unwrap();

        let results = backend.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.status, JobStatus::Failed);
        assert!(
            results[0]
                .1
                .error_message
                .as_deref()
                .unwrap()
                .contains("mystery")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_shot_with_no_jobs_polls_once() {
        let backend = Arc::new(MockBackend::with_jobs(vec![]));
        let registry = ExecutorRegistry::new();

        poller(Arc::clone(&backend), registry)
            .run(false)
            .await
            .unwrap();

        assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 1);
        assert!(backend.results().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_backend_error_exits_single_shot_promptly() {
        let backend = Arc::new(MockBackend::with_jobs(vec![]));
        backend.transient_failures.store(1, Ordering::SeqCst);
        let registry = ExecutorRegistry::new();

        let before = tokio::time::Instant::now();
        poller(Arc::clone(&backend), registry)
            .run(false)
            .await
            .unwrap();

        assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 1);
        assert!(backend.results().is_empty());
        // no backoff wait when there is no next attempt
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_mode_executes_multiple_jobs() {
        let backend = Arc::new(MockBackend::with_jobs(vec![test_job(), test_job()]));
        let probe = Arc::new(ExecProbe::default());
        let mut registry = ExecutorRegistry::new();
        MockExecutor::register(&mut registry, Arc::clone(&probe), 1, 0, false);

        let poller = Arc::new(poller(Arc::clone(&backend), registry));
        let handle = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.run(true).await }
        });

        // enough paused-clock time for both jobs and idle polls in between
        for _ in 0..60 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
            if backend.results().len() == 2 {
                break;
            }
        }
        handle.abort();

        let results = backend.results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.status == JobStatus::Succeeded));
        assert_eq!(probe.cleanup_calls.load(Ordering::SeqCst), 2);
        // two distinct jobs, each reported exactly once
        assert_ne!(results[0].0, results[1].0);
    }
}
