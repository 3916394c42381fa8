//! Engine facade: the gateway-facing entry points
//!
//! Resolves a named Workflow through the registry, compiles (or re-uses) a
//! plan, and hands it to the orchestrator. Compiled plans are cached per
//! `(name, namespace, resourceVersion)`; a definition without a resource
//! version is compiled fresh on every call, since the engine cannot tell
//! whether it changed.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use flowgate_contracts::WorkflowDefinition;

use crate::compile::{compile, CompiledPlan};
use crate::config::ExecuteOptions;
use crate::error::{ExecutionError, ValidationErrors};
use crate::executor::WorkflowExecutor;
use crate::http::HttpClient;
use crate::registry::{TaskRegistry, WorkflowRegistry};
use crate::retry::JitterSource;

type PlanKey = (String, Option<String>, String);

/// The engine owns no resources: registries and the HTTP client are
/// injected, and all remaining configuration arrives in [`ExecuteOptions`].
pub struct Engine {
    tasks: Arc<dyn TaskRegistry>,
    workflows: Arc<dyn WorkflowRegistry>,
    executor: WorkflowExecutor,
    plans: DashMap<PlanKey, Arc<CompiledPlan>>,
}

impl Engine {
    /// Create an engine; rejects unusable options.
    pub fn new(
        tasks: Arc<dyn TaskRegistry>,
        workflows: Arc<dyn WorkflowRegistry>,
        http: Arc<dyn HttpClient>,
        options: ExecuteOptions,
    ) -> Result<Self, ExecutionError> {
        Ok(Self {
            tasks,
            workflows,
            executor: WorkflowExecutor::new(http, options)?,
            plans: DashMap::new(),
        })
    }

    /// Replace the retry jitter source (deterministic tests)
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.executor = self.executor.with_jitter(jitter);
        self
    }

    /// Compile a workflow against the current registry snapshot.
    ///
    /// Pure: no cache is consulted or filled.
    pub fn validate(
        &self,
        workflow: &WorkflowDefinition,
    ) -> Result<Arc<CompiledPlan>, ValidationErrors> {
        compile(
            workflow,
            self.tasks.as_ref(),
            &self.executor.options().default_retry,
        )
        .map(Arc::new)
    }

    /// Execute a named workflow with the given input and env snapshot.
    pub async fn execute(
        &self,
        workflow_name: &str,
        namespace: Option<&str>,
        input: Value,
        env: BTreeMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        let workflow = self
            .workflows
            .workflow(workflow_name, namespace)
            .ok_or_else(|| ExecutionError::UnknownWorkflow {
                name: workflow_name.to_string(),
            })?;
        let plan = self.plan_for(&workflow)?;
        self.executor.execute(plan, input, env, cancel).await
    }

    /// Like [`Engine::execute`], with one-off options overriding the
    /// engine defaults for this call only.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_with(
        &self,
        workflow_name: &str,
        namespace: Option<&str>,
        input: Value,
        env: BTreeMap<String, String>,
        cancel: CancellationToken,
        options: ExecuteOptions,
    ) -> Result<Value, ExecutionError> {
        let workflow = self
            .workflows
            .workflow(workflow_name, namespace)
            .ok_or_else(|| ExecutionError::UnknownWorkflow {
                name: workflow_name.to_string(),
            })?;
        let plan = self.plan_for(&workflow)?;
        self.executor
            .with_options(options)?
            .execute(plan, input, env, cancel)
            .await
    }

    fn plan_for(
        &self,
        workflow: &WorkflowDefinition,
    ) -> Result<Arc<CompiledPlan>, ValidationErrors> {
        let Some(version) = &workflow.resource_version else {
            return self.validate(workflow);
        };
        let key = (
            workflow.name.clone(),
            workflow.namespace.clone(),
            version.clone(),
        );
        if let Some(plan) = self.plans.get(&key) {
            return Ok(Arc::clone(&plan));
        }
        debug!(workflow = %workflow.name, version = %version, "compiling plan");
        let plan = self.validate(workflow)?;
        self.plans.insert(key, Arc::clone(&plan));
        Ok(plan)
    }
}
