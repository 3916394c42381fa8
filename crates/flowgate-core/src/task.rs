//! HTTP task execution
//!
//! Runs one invocation: validates the resolved input, materializes the
//! request from the task's pre-parsed templates, then drives the attempt
//! loop under the merged retry policy. Each attempt runs under a deadline
//! of `min(time remaining until the overall deadline, per-attempt
//! timeout)`; backoff sleeps are cancellable and never outlive the
//! execution deadline.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::compile::ResolvedInvocation;
use crate::error::TaskError;
use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::retry::JitterSource;
use crate::schema::validate;
use crate::template::{canonical_string, resolve, ResolveContext, Template};

/// Terminal failure of one invocation, with the evidence the error report
/// needs
#[derive(Debug)]
pub struct TaskFailure {
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub last_body_excerpt: Option<String>,
    pub cause: TaskError,
}

impl TaskFailure {
    fn before_send(cause: TaskError) -> Self {
        Self {
            attempts: 0,
            last_status: None,
            last_body_excerpt: None,
            cause,
        }
    }
}

/// Execute one invocation's HTTP call and return the validated output.
pub async fn execute(
    invocation: &ResolvedInvocation,
    input: &Value,
    env: &BTreeMap<String, String>,
    http: &dyn HttpClient,
    jitter: &dyn JitterSource,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Result<Value, TaskFailure> {
    let task = &invocation.task;

    // 1. Input gate: a request is never sent with an invalid input, even
    //    when compile-time checking was satisfied through `any`.
    let violations = validate(input, &task.input_schema);
    if !violations.is_empty() {
        return Err(TaskFailure::before_send(TaskError::InputInvalid {
            violations,
        }));
    }

    // 2. Materialize the request.
    let request = materialize(invocation, input, env)
        .map_err(|reason| TaskFailure::before_send(TaskError::Materialize { reason }))?;

    // 3. Attempt loop, bounded by the retry policy and the deadline.
    let policy = &invocation.retry;
    let mut attempt: u32 = 0;
    let mut last_status: Option<u16> = None;
    let mut last_excerpt: Option<String> = None;

    let fail = |attempts, last_status, last_excerpt: &Option<String>, cause| TaskFailure {
        attempts,
        last_status,
        last_body_excerpt: last_excerpt.clone(),
        cause,
    };

    loop {
        if cancel.is_cancelled() {
            return Err(fail(attempt, last_status, &last_excerpt, TaskError::Cancelled));
        }

        let remaining = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(fail(
                        attempt,
                        last_status,
                        &last_excerpt,
                        TaskError::DeadlineExceeded,
                    ));
                }
                Some(remaining)
            }
            None => None,
        };
        let budget = match (remaining, invocation.timeout) {
            (Some(r), Some(t)) => Some(r.min(t)),
            (Some(r), None) => Some(r),
            (None, Some(t)) => Some(t),
            (None, None) => None,
        };

        attempt += 1;
        debug!(
            invocation = %invocation.id,
            attempt,
            max_attempts = policy.max_attempts,
            "sending task request"
        );

        let outcome = send_attempt(http, request.clone(), budget, cancel).await;

        let (retry_hint, cause) = match outcome {
            AttemptOutcome::Response(response) if response.is_success() => {
                return finish(invocation, &response, attempt);
            }
            AttemptOutcome::Response(response) => {
                last_status = Some(response.status);
                last_excerpt = Some(response.body_excerpt());
                if policy.is_retryable_status(response.status) {
                    (
                        response.retry_after_hint(),
                        TaskError::Status {
                            status: response.status,
                        },
                    )
                } else {
                    // Fatal: a 4xx other than 408/429 will not get better.
                    return Err(fail(
                        attempt,
                        last_status,
                        &last_excerpt,
                        TaskError::Status {
                            status: response.status,
                        },
                    ));
                }
            }
            AttemptOutcome::Transport(TransportError::Cancelled) => {
                return Err(fail(attempt, last_status, &last_excerpt, TaskError::Cancelled));
            }
            AttemptOutcome::Transport(TransportError::Failed { reason }) => {
                (None, TaskError::Transport { reason })
            }
            AttemptOutcome::TimedOut => (None, TaskError::AttemptTimeout),
        };

        // Retryable outcome: back off if attempts and deadline allow.
        let Some(delay) = policy.next_delay(attempt, retry_hint, jitter) else {
            return Err(fail(attempt, last_status, &last_excerpt, cause));
        };
        if let Some(deadline) = deadline {
            if Instant::now() + delay >= deadline {
                return Err(fail(
                    attempt,
                    last_status,
                    &last_excerpt,
                    TaskError::DeadlineExceeded,
                ));
            }
        }
        warn!(
            invocation = %invocation.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            status = last_status,
            "task attempt failed, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(fail(attempt, last_status, &last_excerpt, TaskError::Cancelled));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

enum AttemptOutcome {
    Response(HttpResponse),
    Transport(TransportError),
    TimedOut,
}

async fn send_attempt(
    http: &dyn HttpClient,
    request: HttpRequest,
    budget: Option<Duration>,
    cancel: &CancellationToken,
) -> AttemptOutcome {
    let send = http.send(request, cancel);
    let result = match budget {
        // Dropping the send future on timeout aborts the in-flight call.
        Some(budget) => match tokio::time::timeout(budget, send).await {
            Ok(result) => result,
            Err(_) => return AttemptOutcome::TimedOut,
        },
        None => send.await,
    };
    match result {
        Ok(response) => AttemptOutcome::Response(response),
        Err(error) => AttemptOutcome::Transport(error),
    }
}

fn finish(
    invocation: &ResolvedInvocation,
    response: &HttpResponse,
    attempts: u32,
) -> Result<Value, TaskFailure> {
    let failure = |cause: TaskError| TaskFailure {
        attempts,
        last_status: Some(response.status),
        last_body_excerpt: Some(response.body_excerpt()),
        cause,
    };

    let output: Value = if response.body.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str(&response.body) {
            Ok(value) => value,
            Err(e) => {
                return Err(failure(TaskError::BodyNotJson {
                    reason: e.to_string(),
                }))
            }
        }
    };

    let violations = validate(&output, &invocation.task.output_schema);
    if !violations.is_empty() {
        // Output validation failures are never retried.
        return Err(failure(TaskError::OutputInvalid { violations }));
    }
    Ok(output)
}

/// Substitute the task's url, header, and body templates against
/// `{input, env}`.
fn materialize(
    invocation: &ResolvedInvocation,
    input: &Value,
    env: &BTreeMap<String, String>,
) -> Result<HttpRequest, String> {
    let empty = BTreeMap::new();
    let ctx = ResolveContext {
        input,
        env,
        outputs: &empty,
    };
    let task = &invocation.task;

    let url = resolve_to_string(&task.url, &ctx)?;
    let mut headers = Vec::with_capacity(task.headers.len());
    for (name, template) in &task.headers {
        headers.push((name.clone(), resolve_to_string(template, &ctx)?));
    }
    let body = match &task.body {
        Some(template) => Some(resolve_to_string(template, &ctx)?),
        None => None,
    };

    Ok(HttpRequest {
        method: task.definition.http.method,
        url,
        headers,
        body,
    })
}

fn resolve_to_string(template: &Template, ctx: &ResolveContext<'_>) -> Result<String, String> {
    let value = resolve(template, ctx).map_err(|e| e.to_string())?;
    Ok(canonical_string(&value))
}
