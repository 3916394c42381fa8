//! Execution options
//!
//! All configuration flows through the `Execute` call and constructor
//! parameters; there is no process-global state.

use std::time::Duration;

use flowgate_contracts::RetrySpec;

use crate::error::ExecutionError;

/// Per-engine (overridable per-call) execution options
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Bound on in-flight HTTP calls within one execution. `1` is legal
    /// and yields sequential execution; `0` is rejected.
    pub max_concurrency: usize,

    /// Overall deadline for one execution; `None` means unbounded
    pub deadline: Option<Duration>,

    /// Retry defaults for tasks that declare none
    pub default_retry: RetrySpec,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            deadline: None,
            default_retry: RetrySpec::default(),
        }
    }
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_default_retry(mut self, retry: RetrySpec) -> Self {
        self.default_retry = retry;
        self
    }

    /// Reject unusable options before any work starts.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.max_concurrency == 0 {
            return Err(ExecutionError::ConfigurationInvalid {
                field: "max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.deadline.is_some_and(|d| d.is_zero()) {
            return Err(ExecutionError::ConfigurationInvalid {
                field: "deadline",
                reason: "must be positive".to_string(),
            });
        }
        if self.default_retry.max_attempts == 0 {
            return Err(ExecutionError::ConfigurationInvalid {
                field: "default_retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
