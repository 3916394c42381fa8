//! Workflow orchestration
//!
//! Consumes a compiled plan and runtime data, executes waves in order with
//! each wave's invocations in parallel under a concurrency semaphore, and
//! resolves the final output projection.
//!
//! Cancellation is cooperative and single-token: the caller's token is the
//! parent of a per-wave token that also trips on the overall deadline and
//! on peer failure. In-flight HTTP calls receive it through the client;
//! the orchestrator always waits for every spawned invocation to settle
//! before returning, so nothing outlives the execution.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::compile::CompiledPlan;
use crate::config::ExecuteOptions;
use crate::error::{CancelSource, ExecutionError, TaskError};
use crate::http::HttpClient;
use crate::retry::{JitterSource, ThreadRngJitter};
use crate::schema::validate;
use crate::task::{self, TaskFailure};
use crate::template::{resolve, ResolveContext};

/// Executes compiled plans. Cheap to clone-construct per gateway; safe to
/// share across concurrent executions.
pub struct WorkflowExecutor {
    http: Arc<dyn HttpClient>,
    jitter: Arc<dyn JitterSource>,
    options: ExecuteOptions,
}

impl WorkflowExecutor {
    /// Create an executor; rejects unusable options.
    pub fn new(http: Arc<dyn HttpClient>, options: ExecuteOptions) -> Result<Self, ExecutionError> {
        options.validate()?;
        Ok(Self {
            http,
            jitter: Arc::new(ThreadRngJitter),
            options,
        })
    }

    /// Replace the retry jitter source (deterministic tests)
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Derive an executor with different options, sharing the HTTP client
    /// and jitter source.
    pub fn with_options(&self, options: ExecuteOptions) -> Result<Self, ExecutionError> {
        options.validate()?;
        Ok(Self {
            http: Arc::clone(&self.http),
            jitter: Arc::clone(&self.jitter),
            options,
        })
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    /// Run one execution to completion.
    ///
    /// On any failure the execution aborts with no partial results: peers
    /// in the failing wave are cancelled and awaited, and later waves never
    /// start.
    #[instrument(skip_all, fields(workflow = %plan.workflow_name))]
    pub async fn execute(
        &self,
        plan: Arc<CompiledPlan>,
        input: Value,
        env: BTreeMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<Value, ExecutionError> {
        // 1. Gate the runtime input.
        let violations = validate(&input, &plan.input_schema);
        if !violations.is_empty() {
            return Err(ExecutionError::InputInvalid {
                scope: "input".to_string(),
                violations,
            });
        }

        // 2. Capture execution-wide state.
        let env = Arc::new(env);
        let deadline = self.options.deadline.map(|d| Instant::now() + d);
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency));
        let mut outputs: BTreeMap<String, Value> = BTreeMap::new();

        info!(
            waves = plan.waves.len(),
            invocations = plan.invocations.len(),
            "starting execution"
        );

        // 3. Waves, strictly in order.
        for (wave_index, wave) in plan.waves.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled {
                    source: CancelSource::Caller,
                });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ExecutionError::Cancelled {
                    source: CancelSource::Deadline,
                });
            }
            debug!(wave = wave_index, size = wave.len(), "starting wave");

            // Resolve every invocation's input against the context before
            // anything is spawned; reads in a wave never observe writes
            // from the same wave.
            let mut wave_inputs: Vec<(String, Value)> = Vec::with_capacity(wave.len());
            let ctx = ResolveContext {
                input: &input,
                env: env.as_ref(),
                outputs: &outputs,
            };
            for id in wave {
                let invocation = plan
                    .invocations
                    .get(id)
                    .expect("waves cover exactly the plan's invocations");
                let mut resolved = serde_json::Map::new();
                for (property, template) in &invocation.bindings {
                    match resolve(template, &ctx) {
                        Ok(value) => {
                            resolved.insert(property.clone(), value);
                        }
                        Err(e) => {
                            return Err(ExecutionError::TaskFailed {
                                invocation: id.clone(),
                                wave: wave_index,
                                attempts: 0,
                                last_status: None,
                                last_body_excerpt: None,
                                cause: TaskError::Materialize {
                                    reason: e.to_string(),
                                },
                            })
                        }
                    }
                }
                wave_inputs.push((id.clone(), Value::Object(resolved)));
            }

            // Spawn the wave under a child token so peer failure or the
            // deadline cancels siblings without touching the caller's token.
            let wave_token = cancel.child_token();
            let mut join: JoinSet<(String, Result<Value, TaskFailure>)> = JoinSet::new();
            for (id, task_input) in wave_inputs {
                let plan = Arc::clone(&plan);
                let env = Arc::clone(&env);
                let http = Arc::clone(&self.http);
                let jitter = Arc::clone(&self.jitter);
                let semaphore = Arc::clone(&semaphore);
                let token = wave_token.clone();
                join.spawn(async move {
                    // No new HTTP call once cancellation fired, including
                    // while waiting for a concurrency slot.
                    let _permit = tokio::select! {
                        _ = token.cancelled() => {
                            return (
                                id,
                                Err(TaskFailure {
                                    attempts: 0,
                                    last_status: None,
                                    last_body_excerpt: None,
                                    cause: TaskError::Cancelled,
                                }),
                            );
                        }
                        permit = semaphore.acquire_owned() => {
                            permit.expect("semaphore is never closed")
                        }
                    };
                    let invocation = plan
                        .invocations
                        .get(&id)
                        .expect("waves cover exactly the plan's invocations");
                    let result = task::execute(
                        invocation,
                        &task_input,
                        &env,
                        http.as_ref(),
                        jitter.as_ref(),
                        deadline,
                        &token,
                    )
                    .await;
                    (id, result)
                });
            }

            // Drain the wave: first failure wins, peers get cancelled, and
            // every spawned invocation is awaited before moving on.
            let mut first_failure: Option<(String, TaskFailure)> = None;
            let mut internal_error: Option<anyhow::Error> = None;
            let mut cancel_source: Option<CancelSource> = None;
            let mut completed: Vec<(String, Value)> = Vec::new();

            while !join.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled(), if cancel_source.is_none() => {
                        cancel_source = Some(CancelSource::Caller);
                        wave_token.cancel();
                    }
                    _ = wait_deadline(deadline), if cancel_source.is_none() => {
                        cancel_source = Some(CancelSource::Deadline);
                        wave_token.cancel();
                    }
                    joined = join.join_next() => {
                        let Some(joined) = joined else { break };
                        match joined {
                            Ok((id, Ok(value))) => completed.push((id, value)),
                            Ok((id, Err(failure))) => {
                                let observed_cancel =
                                    matches!(failure.cause, TaskError::Cancelled);
                                if observed_cancel && cancel_source.is_some() {
                                    debug!(invocation = %id, "peer cancelled");
                                } else if first_failure.is_none() {
                                    warn!(
                                        invocation = %id,
                                        wave = wave_index,
                                        attempts = failure.attempts,
                                        "invocation failed, cancelling wave"
                                    );
                                    cancel_source.get_or_insert(CancelSource::PeerFailure);
                                    first_failure = Some((id, failure));
                                    wave_token.cancel();
                                } else {
                                    debug!(invocation = %id, "additional failure after abort");
                                }
                            }
                            Err(join_error) => {
                                if first_failure.is_none() && internal_error.is_none() {
                                    cancel_source.get_or_insert(CancelSource::PeerFailure);
                                    internal_error = Some(anyhow::anyhow!(
                                        "invocation task aborted: {join_error}"
                                    ));
                                    wave_token.cancel();
                                }
                            }
                        }
                    }
                }
            }

            match cancel_source {
                Some(CancelSource::Caller) => {
                    return Err(ExecutionError::Cancelled {
                        source: CancelSource::Caller,
                    })
                }
                Some(CancelSource::Deadline) => {
                    return Err(ExecutionError::Cancelled {
                        source: CancelSource::Deadline,
                    })
                }
                Some(CancelSource::PeerFailure) => {
                    if let Some((id, failure)) = first_failure {
                        return Err(task_failed(id, wave_index, failure));
                    }
                    return Err(ExecutionError::Internal(
                        internal_error.expect("peer-failure source implies a failure"),
                    ));
                }
                None => {
                    // Writes land only after the wave join; later waves
                    // read them through a fresh context.
                    for (id, value) in completed {
                        outputs.insert(id, value);
                    }
                }
            }
        }

        // 4. Final projection in one pass.
        let ctx = ResolveContext {
            input: &input,
            env: env.as_ref(),
            outputs: &outputs,
        };
        let mut projected = serde_json::Map::new();
        for (name, template) in &plan.output {
            match resolve(template, &ctx) {
                Ok(value) => {
                    projected.insert(name.clone(), value);
                }
                Err(e) => {
                    return Err(ExecutionError::OutputProjectionFailed {
                        name: name.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }

        info!("execution completed");
        Ok(Value::Object(projected))
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        None => std::future::pending().await,
    }
}

fn task_failed(id: String, wave: usize, failure: TaskFailure) -> ExecutionError {
    match failure.cause {
        TaskError::InputInvalid { violations } => ExecutionError::InputInvalid {
            scope: format!("tasks.{id}.input"),
            violations,
        },
        TaskError::OutputInvalid { violations } => ExecutionError::OutputInvalid {
            invocation: id,
            violations,
        },
        cause => ExecutionError::TaskFailed {
            invocation: id,
            wave,
            attempts: failure.attempts,
            last_status: failure.last_status,
            last_body_excerpt: failure.last_body_excerpt,
            cause,
        },
    }
}
