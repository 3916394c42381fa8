//! Registry abstractions for cluster-managed resources
//!
//! How these are populated (cluster watch, files, test fixtures) is opaque
//! to the engine. Lookups are synchronous and expected to be fast; plan
//! compilation is a pure function of the registry snapshot it reads.

use std::sync::Arc;

use flowgate_contracts::{TaskDefinition, WorkflowDefinition};

/// Resolves task names to parsed Task definitions
pub trait TaskRegistry: Send + Sync {
    /// Look up a task; `namespace: None` matches cluster-scoped tasks
    fn task(&self, name: &str, namespace: Option<&str>) -> Option<Arc<TaskDefinition>>;

    /// Every known task name, used for "did you mean" diagnostics
    fn task_names(&self) -> Vec<String>;
}

/// Resolves workflow names to Workflow definitions
pub trait WorkflowRegistry: Send + Sync {
    fn workflow(&self, name: &str, namespace: Option<&str>) -> Option<Arc<WorkflowDefinition>>;
}
