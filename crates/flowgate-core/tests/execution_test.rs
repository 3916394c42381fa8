// Integration tests for workflow compilation and execution
//
// These drive the engine end-to-end against the in-memory registry and the
// scripted HTTP client: wave ordering, wave parallelism, retry behavior,
// peer-failure cancellation, and the compile-time rejections.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use flowgate_core::memory::{InMemoryRegistry, ScriptedHttpClient, ScriptedResponse};
use flowgate_core::retry::FixedJitter;
use flowgate_core::{
    CancelSource, Diagnostic, Engine, ExecuteOptions, ExecutionError, HttpClient, TaskError,
    TaskRegistry, WorkflowRegistry,
};

fn add_task(registry: &InMemoryRegistry, task: serde_json::Value) {
    registry.add_task(serde_json::from_value(task).unwrap());
}

fn add_workflow(registry: &InMemoryRegistry, workflow: serde_json::Value) {
    registry.add_workflow(serde_json::from_value(workflow).unwrap());
}

fn engine_with(
    registry: &Arc<InMemoryRegistry>,
    client: &Arc<ScriptedHttpClient>,
    options: ExecuteOptions,
) -> Engine {
    Engine::new(
        Arc::clone(registry) as Arc<dyn TaskRegistry>,
        Arc::clone(registry) as Arc<dyn WorkflowRegistry>,
        Arc::clone(client) as Arc<dyn HttpClient>,
        options,
    )
    .unwrap()
    .with_jitter(Arc::new(FixedJitter(1.0)))
}

/// Registry with the two-task chain used by several scenarios:
/// `stringify` (int -> string) and `verify` (string -> bool).
fn linear_fixtures() -> Arc<InMemoryRegistry> {
    let registry = Arc::new(InMemoryRegistry::new());
    add_task(
        &registry,
        json!({
            "name": "stringify",
            "inputSchema": {
                "type": "object",
                "properties": { "x": { "type": "integer" } },
                "required": ["x"]
            },
            "outputSchema": {
                "type": "object",
                "properties": { "y": { "type": "string" } },
                "required": ["y"]
            },
            "http": { "method": "POST", "url": "https://svc.local/stringify",
                      "body": "{{input.x}}" }
        }),
    );
    add_task(
        &registry,
        json!({
            "name": "verify",
            "inputSchema": {
                "type": "object",
                "properties": { "s": { "type": "string" } },
                "required": ["s"]
            },
            "outputSchema": {
                "type": "object",
                "properties": { "ok": { "type": "boolean" } },
                "required": ["ok"]
            },
            "http": { "method": "POST", "url": "https://svc.local/verify",
                      "body": "{{input.s}}" }
        }),
    );
    registry
}

// =============================================================================
// Scenario: linear two-task chain
// =============================================================================

#[tokio::test]
async fn test_linear_two_task_chain() {
    let registry = linear_fixtures();
    add_workflow(
        &registry,
        json!({
            "name": "linear",
            "resourceVersion": "1",
            "inputSchema": {
                "type": "object",
                "properties": { "n": { "type": "integer" } },
                "required": ["n"]
            },
            "tasks": [
                { "id": "a", "taskRef": "stringify", "input": { "x": "{{input.n}}" } },
                { "id": "b", "taskRef": "verify",
                  "input": { "s": "{{tasks.a.output.y}}" } }
            ],
            "output": { "result": "{{tasks.b.output.ok}}" }
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    client.script(
        "https://svc.local/stringify",
        ScriptedResponse::json(200, json!({ "y": "7" })),
    );
    client.script(
        "https://svc.local/verify",
        ScriptedResponse::json(200, json!({ "ok": true })),
    );

    let engine = engine_with(&registry, &client, ExecuteOptions::default());

    // The compiled plan partitions the chain into two waves.
    let workflow = registry.workflow("linear", None).unwrap();
    let plan = engine.validate(&workflow).unwrap();
    assert_eq!(plan.waves, vec![vec!["a".to_string()], vec!["b".to_string()]]);

    let output = engine
        .execute(
            "linear",
            None,
            json!({ "n": 7 }),
            BTreeMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // The projection preserves the boolean's type.
    assert_eq!(output, json!({ "result": true }));

    // Each invocation sent exactly one request; b saw a's output.
    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].url, "https://svc.local/stringify");
    assert_eq!(calls[1].url, "https://svc.local/verify");
    assert_eq!(calls[1].body.as_deref(), Some("7"));
}

// =============================================================================
// Scenario: diamond runs both branches in parallel
// =============================================================================

#[tokio::test]
async fn test_diamond_branches_run_in_parallel() {
    const BRANCH_DELAY: Duration = Duration::from_millis(150);

    let registry = Arc::new(InMemoryRegistry::new());
    add_task(
        &registry,
        json!({
            "name": "seed",
            "inputSchema": { "type": "object" },
            "outputSchema": {
                "type": "object",
                "properties": { "v": { "type": "string" } },
                "required": ["v"]
            },
            "http": { "method": "GET", "url": "https://svc.local/seed" }
        }),
    );
    for branch in ["left", "right"] {
        add_task(
            &registry,
            json!({
                "name": branch,
                "inputSchema": {
                    "type": "object",
                    "properties": { "v": { "type": "string" } },
                    "required": ["v"]
                },
                "outputSchema": {
                    "type": "object",
                    "properties": { "v": { "type": "string" } },
                    "required": ["v"]
                },
                "http": { "method": "POST", "url": format!("https://svc.local/{branch}"),
                          "body": "{{input.v}}" }
            }),
        );
    }
    add_task(
        &registry,
        json!({
            "name": "join",
            "inputSchema": {
                "type": "object",
                "properties": { "l": { "type": "string" }, "r": { "type": "string" } },
                "required": ["l", "r"]
            },
            "outputSchema": {
                "type": "object",
                "properties": { "v": { "type": "string" } },
                "required": ["v"]
            },
            "http": { "method": "POST", "url": "https://svc.local/join",
                      "body": "{{input.l}}+{{input.r}}" }
        }),
    );
    add_workflow(
        &registry,
        json!({
            "name": "diamond",
            "inputSchema": { "type": "object" },
            "tasks": [
                { "id": "p", "taskRef": "seed", "input": {} },
                { "id": "a", "taskRef": "left",
                  "input": { "v": "{{tasks.p.output.v}}" } },
                { "id": "b", "taskRef": "right",
                  "input": { "v": "{{tasks.p.output.v}}" } },
                { "id": "j", "taskRef": "join",
                  "input": { "l": "{{tasks.a.output.v}}", "r": "{{tasks.b.output.v}}" } }
            ],
            "output": { "joined": "{{tasks.j.output.v}}" }
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    client.script(
        "https://svc.local/seed",
        ScriptedResponse::json(200, json!({ "v": "s" })),
    );
    client.script(
        "https://svc.local/left",
        ScriptedResponse::json(200, json!({ "v": "L" })).with_delay(BRANCH_DELAY),
    );
    client.script(
        "https://svc.local/right",
        ScriptedResponse::json(200, json!({ "v": "R" })).with_delay(BRANCH_DELAY),
    );
    client.script(
        "https://svc.local/join",
        ScriptedResponse::json(200, json!({ "v": "LR" })),
    );

    let engine = engine_with(&registry, &client, ExecuteOptions::default());
    let output = engine
        .execute(
            "diamond",
            None,
            json!({}),
            BTreeMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(output, json!({ "joined": "LR" }));

    let start_a = client.calls_to("https://svc.local/left")[0].started_at;
    let start_b = client.calls_to("https://svc.local/right")[0].started_at;
    let start_j = client.calls_to("https://svc.local/join")[0].started_at;

    // Both branches started together, not back to back.
    let spread = if start_a > start_b {
        start_a - start_b
    } else {
        start_b - start_a
    };
    assert!(spread < BRANCH_DELAY, "branches were serialized: {spread:?}");

    // The join waited for the slower branch.
    assert!(start_j >= start_a + BRANCH_DELAY);
    assert!(start_j >= start_b + BRANCH_DELAY);
}

// =============================================================================
// Scenario: cycles are rejected at compile time
// =============================================================================

#[tokio::test]
async fn test_cycle_rejected_before_any_execution() {
    let registry = linear_fixtures();
    add_workflow(
        &registry,
        json!({
            "name": "cyclic",
            "inputSchema": { "type": "object" },
            "tasks": [
                { "id": "a", "taskRef": "verify",
                  "input": { "s": "{{tasks.b.output.y}}" } },
                { "id": "b", "taskRef": "stringify",
                  "input": { "x": "{{tasks.a.output.y}}" } }
            ]
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    let engine = engine_with(&registry, &client, ExecuteOptions::default());

    let err = engine
        .execute(
            "cyclic",
            None,
            json!({}),
            BTreeMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    let ExecutionError::Validation(errors) = err else {
        panic!("expected validation failure, got {err:?}");
    };
    let cycle = errors
        .diagnostics
        .iter()
        .find_map(|d| match d {
            Diagnostic::CycleDetected { path } => Some(path.clone()),
            _ => None,
        })
        .expect("cycle diagnostic");
    assert_eq!(cycle, vec!["a", "b", "a"]);

    // No request was ever sent.
    assert!(client.calls().is_empty());
}

// =============================================================================
// Scenario: producer/consumer type mismatch
// =============================================================================

#[tokio::test]
async fn test_binding_type_mismatch_rejected() {
    let registry = linear_fixtures();
    // stringify.x wants an integer, but a's output y is a string.
    add_workflow(
        &registry,
        json!({
            "name": "mismatched",
            "inputSchema": {
                "type": "object",
                "properties": { "n": { "type": "integer" } },
                "required": ["n"]
            },
            "tasks": [
                { "id": "a", "taskRef": "stringify", "input": { "x": "{{input.n}}" } },
                { "id": "b", "taskRef": "stringify",
                  "input": { "x": "{{tasks.a.output.y}}" } }
            ]
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    let engine = engine_with(&registry, &client, ExecuteOptions::default());
    let workflow = registry.workflow("mismatched", None).unwrap();

    let errors = engine.validate(&workflow).unwrap_err();
    assert!(errors.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::BindingMismatch { invocation, property, expected, got, path }
            if invocation == "b" && property == "x" && expected == "integer"
               && got == "string" && path == "tasks.a.output.y"
    )));
}

// =============================================================================
// Scenario: retry twice, then succeed
// =============================================================================

#[tokio::test]
async fn test_retry_then_success_with_backoff() {
    const BASE: Duration = Duration::from_millis(50);

    let registry = Arc::new(InMemoryRegistry::new());
    add_task(
        &registry,
        json!({
            "name": "flaky",
            "inputSchema": { "type": "object" },
            "outputSchema": {
                "type": "object",
                "properties": { "y": { "type": "string" } },
                "required": ["y"]
            },
            "http": { "method": "GET", "url": "https://svc.local/flaky" },
            "retry": { "maxAttempts": 3, "baseDelay": "50ms", "factor": 2.0, "cap": "5s" }
        }),
    );
    add_workflow(
        &registry,
        json!({
            "name": "retrying",
            "inputSchema": { "type": "object" },
            "tasks": [{ "id": "f", "taskRef": "flaky", "input": {} }],
            "output": { "y": "{{tasks.f.output.y}}" }
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    client.script_sequence(
        "https://svc.local/flaky",
        [
            ScriptedResponse::status(503),
            ScriptedResponse::status(503),
            ScriptedResponse::json(200, json!({ "y": "ok" })),
        ],
    );

    let engine = engine_with(&registry, &client, ExecuteOptions::default());
    let output = engine
        .execute(
            "retrying",
            None,
            json!({}),
            BTreeMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(output, json!({ "y": "ok" }));

    // Three attempts, with backoff of base then base*factor (jitter fixed
    // at 1.0).
    let calls = client.calls_to("https://svc.local/flaky");
    assert_eq!(calls.len(), 3);
    assert!(calls[1].started_at - calls[0].started_at >= BASE);
    assert!(calls[2].started_at - calls[1].started_at >= BASE * 2);
}

// =============================================================================
// Scenario: peer failure cancels the wave promptly
// =============================================================================

#[tokio::test]
async fn test_peer_failure_cancels_in_flight_siblings() {
    let registry = Arc::new(InMemoryRegistry::new());
    add_task(
        &registry,
        json!({
            "name": "failing",
            "inputSchema": { "type": "object" },
            "outputSchema": { "type": "object" },
            "http": { "method": "GET", "url": "https://svc.local/fail" },
            "retry": { "maxAttempts": 1 }
        }),
    );
    for slow in ["slow-b", "slow-c"] {
        add_task(
            &registry,
            json!({
                "name": slow,
                "inputSchema": { "type": "object" },
                "outputSchema": { "type": "object" },
                "http": { "method": "GET", "url": format!("https://svc.local/{slow}") }
            }),
        );
    }
    // d consumes a's output, so the second wave must never start.
    add_task(
        &registry,
        json!({
            "name": "downstream",
            "inputSchema": { "type": "object", "properties": { "v": { "type": "any" } } },
            "outputSchema": { "type": "object" },
            "http": { "method": "GET", "url": "https://svc.local/downstream" }
        }),
    );
    add_workflow(
        &registry,
        json!({
            "name": "doomed",
            "inputSchema": { "type": "object" },
            "tasks": [
                { "id": "a", "taskRef": "failing", "input": {} },
                { "id": "b", "taskRef": "slow-b", "input": {} },
                { "id": "c", "taskRef": "slow-c", "input": {} },
                { "id": "d", "taskRef": "downstream",
                  "input": { "v": "{{tasks.a.output}}" } }
            ]
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    client.script("https://svc.local/fail", ScriptedResponse::status(500));
    for slow in ["slow-b", "slow-c"] {
        client.script(
            format!("https://svc.local/{slow}"),
            ScriptedResponse::json(200, json!({})).with_delay(Duration::from_secs(1)),
        );
    }

    let engine = engine_with(&registry, &client, ExecuteOptions::default());
    let started = Instant::now();
    let err = engine
        .execute(
            "doomed",
            None,
            json!({}),
            BTreeMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    // The failing invocation is named, with its wave.
    match err {
        ExecutionError::TaskFailed {
            invocation,
            wave,
            attempts,
            last_status,
            ..
        } => {
            assert_eq!(invocation, "a");
            assert_eq!(wave, 0);
            assert_eq!(attempts, 1);
            assert_eq!(last_status, Some(500));
        }
        other => panic!("expected task failure, got {other:?}"),
    }

    // Siblings were cancelled rather than run to completion, and the
    // dependent second wave never started.
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    assert_eq!(client.calls_to("https://svc.local/slow-b").len(), 1);
    assert_eq!(client.calls_to("https://svc.local/slow-c").len(), 1);
    assert!(client.calls_to("https://svc.local/downstream").is_empty());
}

// =============================================================================
// Cancellation and deadline behavior
// =============================================================================

#[tokio::test]
async fn test_caller_cancellation_is_prompt() {
    let registry = Arc::new(InMemoryRegistry::new());
    add_task(
        &registry,
        json!({
            "name": "slow",
            "inputSchema": { "type": "object" },
            "outputSchema": { "type": "object" },
            "http": { "method": "GET", "url": "https://svc.local/slow" }
        }),
    );
    add_workflow(
        &registry,
        json!({
            "name": "cancellable",
            "inputSchema": { "type": "object" },
            "tasks": [{ "id": "s", "taskRef": "slow", "input": {} }]
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    client.script(
        "https://svc.local/slow",
        ScriptedResponse::json(200, json!({})).with_delay(Duration::from_secs(5)),
    );

    let engine = engine_with(&registry, &client, ExecuteOptions::default());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = engine
        .execute("cancellable", None, json!({}), BTreeMap::new(), cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::Cancelled {
            source: CancelSource::Caller
        }
    ));
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_overall_deadline_bounds_execution() {
    let registry = Arc::new(InMemoryRegistry::new());
    add_task(
        &registry,
        json!({
            "name": "slow",
            "inputSchema": { "type": "object" },
            "outputSchema": { "type": "object" },
            "http": { "method": "GET", "url": "https://svc.local/slow" }
        }),
    );
    add_workflow(
        &registry,
        json!({
            "name": "bounded",
            "inputSchema": { "type": "object" },
            "tasks": [{ "id": "s", "taskRef": "slow", "input": {} }]
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    client.script(
        "https://svc.local/slow",
        ScriptedResponse::json(200, json!({})).with_delay(Duration::from_secs(5)),
    );

    let engine = engine_with(
        &registry,
        &client,
        ExecuteOptions::default().with_deadline(Duration::from_millis(100)),
    );

    let started = Instant::now();
    let err = engine
        .execute(
            "bounded",
            None,
            json!({}),
            BTreeMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    // The deadline either trips the orchestrator's watchdog or expires the
    // attempt budget; both surface the deadline, never a success.
    match err {
        ExecutionError::Cancelled {
            source: CancelSource::Deadline,
        } => {}
        ExecutionError::TaskFailed {
            cause: TaskError::DeadlineExceeded | TaskError::AttemptTimeout,
            ..
        } => {}
        other => panic!("expected deadline failure, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}

// =============================================================================
// Concurrency cap and runtime input validation
// =============================================================================

#[tokio::test]
async fn test_max_concurrency_one_serializes_a_wave() {
    const DELAY: Duration = Duration::from_millis(100);

    let registry = Arc::new(InMemoryRegistry::new());
    for name in ["first", "second"] {
        add_task(
            &registry,
            json!({
                "name": name,
                "inputSchema": { "type": "object" },
                "outputSchema": { "type": "object" },
                "http": { "method": "GET", "url": format!("https://svc.local/{name}") }
            }),
        );
    }
    add_workflow(
        &registry,
        json!({
            "name": "pair",
            "inputSchema": { "type": "object" },
            "tasks": [
                { "id": "x", "taskRef": "first", "input": {} },
                { "id": "y", "taskRef": "second", "input": {} }
            ]
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    for name in ["first", "second"] {
        client.script(
            format!("https://svc.local/{name}"),
            ScriptedResponse::json(200, json!({})).with_delay(DELAY),
        );
    }

    let engine = engine_with(
        &registry,
        &client,
        ExecuteOptions::default().with_max_concurrency(1),
    );
    engine
        .execute(
            "pair",
            None,
            json!({}),
            BTreeMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    let spread = calls[1].started_at - calls[0].started_at;
    assert!(spread >= DELAY, "calls overlapped under cap 1: {spread:?}");
}

#[tokio::test]
async fn test_runtime_input_validation_rejects_before_any_call() {
    let registry = linear_fixtures();
    add_workflow(
        &registry,
        json!({
            "name": "strict-input",
            "inputSchema": {
                "type": "object",
                "properties": { "n": { "type": "integer" } },
                "required": ["n"]
            },
            "tasks": [
                { "id": "a", "taskRef": "stringify", "input": { "x": "{{input.n}}" } }
            ]
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    let engine = engine_with(&registry, &client, ExecuteOptions::default());

    let err = engine
        .execute(
            "strict-input",
            None,
            json!({ "n": "seven" }),
            BTreeMap::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        ExecutionError::InputInvalid { scope, violations } => {
            assert_eq!(scope, "input");
            assert_eq!(violations.len(), 1);
        }
        other => panic!("expected input rejection, got {other:?}"),
    }
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn test_env_reaches_headers_and_projection() {
    let registry = Arc::new(InMemoryRegistry::new());
    add_task(
        &registry,
        json!({
            "name": "regional",
            "inputSchema": { "type": "object" },
            "outputSchema": {
                "type": "object",
                "properties": { "ok": { "type": "boolean" } },
                "required": ["ok"]
            },
            "http": {
                "method": "GET",
                "url": "https://svc.local/regional",
                "headers": { "x-region": "{{env.REGION}}" }
            }
        }),
    );
    add_workflow(
        &registry,
        json!({
            "name": "env-user",
            "inputSchema": { "type": "object" },
            "tasks": [{ "id": "r", "taskRef": "regional", "input": {} }],
            "output": { "ok": "{{tasks.r.output.ok}}", "region": "{{env.REGION}}" }
        }),
    );

    let client = Arc::new(ScriptedHttpClient::new());
    client.script(
        "https://svc.local/regional",
        ScriptedResponse::json(200, json!({ "ok": true })),
    );

    let engine = engine_with(&registry, &client, ExecuteOptions::default());
    let env = BTreeMap::from([("REGION".to_string(), "eu-west".to_string())]);
    let output = engine
        .execute(
            "env-user",
            None,
            json!({}),
            env,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output, json!({ "ok": true, "region": "eu-west" }));
    let calls = client.calls_to("https://svc.local/regional");
    assert_eq!(
        calls[0].headers,
        vec![("x-region".to_string(), "eu-west".to_string())]
    );
}
