//! Check execution trait and implementations.
//!
//! The executor is responsible for running individual checks, typically by
//! delegating to external scanners, API probes, or log backends. The
//! scheduler owns the timeout; executors just do the work.

use async_trait::async_trait;

use conauth_core::{CheckId, ServiceId};

use crate::check::{CheckConfig, ExecutionOutcome, Finding};

/// A kind-specific execution request handed to an executor.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// The check being executed.
    pub check_id: CheckId,
    /// Owning service, if the check is service-scoped.
    pub service_id: Option<ServiceId>,
    /// Rule name, for diagnostics.
    pub name: String,
    /// Kind-specific configuration.
    pub config: CheckConfig,
}

/// Trait for executing checks.
///
/// Implementations can call external scanners, probe APIs, query logs, or
/// run anything else the configured kind requires. An `Err` from the
/// executor is recorded as an errored execution and feeds the owning rule's
/// consecutive-failure counter; it is never surfaced to the scheduler loop.
#[async_trait]
pub trait CheckExecutor: Send + Sync {
    /// Executes one check and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns an error when the check could not be run at all (executor
    /// unreachable, malformed configuration). A check that ran but did not
    /// meet its criteria is a `Failed` outcome, not an error.
    async fn execute(&self, request: &CheckRequest) -> std::result::Result<ExecutionOutcome, ExecutorError>;
}

/// An error raised by an executor that could not complete a check.
#[derive(Debug, thiserror::Error)]
#[error("executor error: {message}")]
pub struct ExecutorError {
    /// Description of why the check could not run.
    pub message: String,
}

impl ExecutorError {
    /// Creates a new executor error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An executor that always passes; for tests and wiring smoke checks.
#[derive(Debug, Default)]
pub struct StaticExecutor;

#[async_trait]
impl CheckExecutor for StaticExecutor {
    async fn execute(
        &self,
        request: &CheckRequest,
    ) -> std::result::Result<ExecutionOutcome, ExecutorError> {
        Ok(ExecutionOutcome::passed(vec![Finding::new(format!(
            "{} criteria satisfied",
            request.config.kind_label()
        ))]))
    }
}

/// An executor that always fails with a configurable message.
#[derive(Debug)]
pub struct FailingExecutor {
    message: String,
}

impl FailingExecutor {
    /// Creates a failing executor with the given failure message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl CheckExecutor for FailingExecutor {
    async fn execute(
        &self,
        _request: &CheckRequest,
    ) -> std::result::Result<ExecutionOutcome, ExecutorError> {
        Ok(ExecutionOutcome::failed(vec![], self.message.clone()))
    }
}
