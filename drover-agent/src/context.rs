//! Per-job execution context
//!
//! Mutable state owned by the executor instance running a job: the scratch
//! directory, the container handle once one exists, the cancellation flag,
//! and the accumulated log buffer that the driver drains into progress
//! reports. Never shared across jobs.

use drover_core::domain::log::LogEntry;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Execution state for a single job
pub struct ExecutionContext {
    pub job_id: Uuid,
    /// Scratch directory for this job, set during preparation
    pub job_dir: Option<PathBuf>,
    /// Name of the container running the job, set at start
    pub container_name: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    cancel_requested: AtomicBool,
    log_buffer: Mutex<Vec<LogEntry>>,
}

impl ExecutionContext {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            job_dir: None,
            container_name: None,
            started_at: None,
            cancel_requested: AtomicBool::new(false),
            log_buffer: Mutex::new(Vec::new()),
        }
    }

    /// Marks the job as cancelled; once set it stays set
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn add_log(&self, entry: LogEntry) {
        let mut buffer = self.log_buffer.lock().unwrap();
        buffer.push(entry);
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.add_log(LogEntry::info(message));
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.add_log(LogEntry::error(message));
    }

    /// Drains all buffered log entries
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self.log_buffer.lock().unwrap();
        buffer.drain(..).collect()
    }

    /// Snapshot of the buffered logs without draining
    pub fn peek_logs(&self) -> Vec<LogEntry> {
        self.log_buffer.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::domain::log::LogLevel;

    #[test]
    fn test_cancel_flag_is_sticky() {
        let ctx = ExecutionContext::new(Uuid::new_v4());
        assert!(!ctx.cancel_requested());
        ctx.request_cancel();
        ctx.request_cancel();
        assert!(ctx.cancel_requested());
    }

    #[test]
    fn test_drain_empties_buffer() {
        let ctx = ExecutionContext::new(Uuid::new_v4());
        ctx.log_info("staging inputs");
        ctx.log_error("pull failed");

        let drained = ctx.drain_logs();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].level, LogLevel::Info);
        assert!(ctx.drain_logs().is_empty());
    }
}
