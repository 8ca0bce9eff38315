//! Executor registry
//!
//! Maps a job's declared executor class identifier to a factory that
//! builds a fresh executor instance for that job. Populated once at
//! startup, read-only thereafter. Resolution failure fails the individual
//! job only, never the agent.

use drover_core::domain::job::Job;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{ExecutorError, JobExecutor};

/// Builds an executor instance for one job
pub type ExecutorFactory = Arc<dyn Fn(Job) -> Box<dyn JobExecutor> + Send + Sync>;

/// Process-wide table of executor factories keyed by class name
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a class name
    pub fn register<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(Job) -> Box<dyn JobExecutor> + Send + Sync + 'static,
    {
        let class_name = class_name.into();
        debug!("Registering executor class '{}'", class_name);
        self.factories.insert(class_name, Arc::new(factory));
    }

    /// Resolves the factory for a class name
    pub fn resolve(&self, class_name: &str) -> Result<&ExecutorFactory, ExecutorError> {
        self.factories
            .get(class_name)
            .ok_or_else(|| ExecutorError::UnknownExecutor(class_name.to_string()))
    }

    /// Builds an executor for the given job
    pub fn instantiate(&self, job: Job) -> Result<Box<dyn JobExecutor>, ExecutorError> {
        let factory = self.resolve(&job.template.executor_class)?;
        Ok(factory(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use async_trait::async_trait;
    use drover_core::domain::job::{HardwareRequirement, JobResult, JobTemplate};
    use std::collections::HashMap;
    use uuid::Uuid;

    struct NoopExecutor {
        context: ExecutionContext,
    }

    #[async_trait]
    impl JobExecutor for NoopExecutor {
        async fn prepare(&mut self) -> Result<(), ExecutorError> {
            Ok(())
        }
        async fn start(&mut self) -> Result<(), ExecutorError> {
            Ok(())
        }
        async fn poll(&mut self) -> Result<super::super::RunState, ExecutorError> {
            Ok(super::super::RunState::Exited { code: 0 })
        }
        async fn cancel(&mut self) -> Result<(), ExecutorError> {
            Ok(())
        }
        async fn collect_result(&mut self) -> JobResult {
            JobResult::failed("noop")
        }
        async fn cleanup(&mut self) -> Result<(), ExecutorError> {
            Ok(())
        }
        fn context(&self) -> &ExecutionContext {
            &self.context
        }
    }

    fn job(executor_class: &str) -> Job {
        Job {
            id: Uuid::new_v4(),
            template: JobTemplate {
                executor_class: executor_class.to_string(),
                required_packages: vec![],
                image: "alpine:latest".to_string(),
                command: vec!["true".to_string()],
            },
            parameters: HashMap::new(),
            inputs: vec![],
            hardware: HardwareRequirement::None,
        }
    }

    #[test]
    fn test_resolve_registered_class() {
        let mut registry = ExecutorRegistry::new();
        registry.register("noop", |job| {
            Box::new(NoopExecutor {
                context: ExecutionContext::new(job.id),
            })
        });

        assert!(registry.resolve("noop").is_ok());
        assert!(registry.instantiate(job("noop")).is_ok());
    }

    #[test]
    fn test_unknown_class_fails_resolution() {
        let registry = ExecutorRegistry::new();
        let err = registry.instantiate(job("mystery")).err().unwrap();
        assert!(matches!(err, ExecutorError::UnknownExecutor(name) if name == "mystery"));
    }
}
