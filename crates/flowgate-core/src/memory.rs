//! In-memory implementations for examples and testing
//!
//! These keep all data in memory, making them perfect for:
//! - Unit and integration tests that need a registry snapshot
//! - Scripted HTTP responses with controllable delays and failures
//! - Quick prototyping without a cluster

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use flowgate_contracts::{HttpMethod, TaskDefinition, WorkflowDefinition};

use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::registry::{TaskRegistry, WorkflowRegistry};

// ============================================================================
// InMemoryRegistry - Task and Workflow definitions from fixtures
// ============================================================================

/// Registry backed by plain maps; namespaced lookups fall back to
/// cluster-scoped entries like the controller's resolution does.
#[derive(Default)]
pub struct InMemoryRegistry {
    tasks: Mutex<HashMap<(String, Option<String>), Arc<TaskDefinition>>>,
    workflows: Mutex<HashMap<(String, Option<String>), Arc<WorkflowDefinition>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&self, task: TaskDefinition) {
        let key = (task.name.clone(), task.namespace.clone());
        self.tasks.lock().unwrap().insert(key, Arc::new(task));
    }

    pub fn add_workflow(&self, workflow: WorkflowDefinition) {
        let key = (workflow.name.clone(), workflow.namespace.clone());
        self.workflows.lock().unwrap().insert(key, Arc::new(workflow));
    }
}

impl TaskRegistry for InMemoryRegistry {
    fn task(&self, name: &str, namespace: Option<&str>) -> Option<Arc<TaskDefinition>> {
        let tasks = self.tasks.lock().unwrap();
        if let Some(namespace) = namespace {
            if let Some(task) = tasks.get(&(name.to_string(), Some(namespace.to_string()))) {
                return Some(Arc::clone(task));
            }
        }
        tasks.get(&(name.to_string(), None)).map(Arc::clone)
    }

    fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .lock()
            .unwrap()
            .keys()
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl WorkflowRegistry for InMemoryRegistry {
    fn workflow(&self, name: &str, namespace: Option<&str>) -> Option<Arc<WorkflowDefinition>> {
        let workflows = self.workflows.lock().unwrap();
        if let Some(namespace) = namespace {
            if let Some(wf) = workflows.get(&(name.to_string(), Some(namespace.to_string()))) {
                return Some(Arc::clone(wf));
            }
        }
        workflows.get(&(name.to_string(), None)).map(Arc::clone)
    }
}

// ============================================================================
// ScriptedHttpClient - canned responses with recorded calls
// ============================================================================

/// One canned response
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Simulated service latency; sleeps cancellably before responding
    pub delay: Option<Duration>,
}

impl ScriptedResponse {
    /// A JSON response with the given status
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.to_string(),
            delay: None,
        }
    }

    /// A bare status with an empty body
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: String::new(),
            delay: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A request observed by the scripted client
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// When the client accepted the request, before any scripted delay
    pub started_at: Instant,
}

/// HTTP client that replays scripted responses keyed by exact URL.
///
/// Responses for a URL are consumed front to back; the last one is sticky
/// and repeats. Unscripted URLs fail with a transport error. Every call is
/// recorded with its start timestamp so tests can assert on concurrency.
#[derive(Default)]
pub struct ScriptedHttpClient {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for a URL
    pub fn script(&self, url: impl Into<String>, response: ScriptedResponse) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(response);
    }

    /// Queue several responses for a URL, consumed in order
    pub fn script_sequence(
        &self,
        url: impl Into<String>,
        responses: impl IntoIterator<Item = ScriptedResponse>,
    ) {
        let url = url.into();
        let mut scripts = self.scripts.lock().unwrap();
        scripts.entry(url).or_default().extend(responses);
    }

    /// Every call observed so far, in arrival order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls to one URL
    pub fn calls_to(&self, url: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.url == url)
            .collect()
    }

    fn next_response(&self, url: &str) -> Option<ScriptedResponse> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            started_at: Instant::now(),
        });

        let scripted =
            self.next_response(&request.url)
                .ok_or_else(|| TransportError::Failed {
                    reason: format!("no scripted response for '{}'", request.url),
                })?;

        if let Some(delay) = scripted.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Ok(HttpResponse {
            status: scripted.status,
            headers: scripted.headers,
            body: scripted.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(name: &str, namespace: Option<&str>) -> TaskDefinition {
        serde_json::from_value(json!({
            "name": name,
            "namespace": namespace,
            "inputSchema": { "type": "object" },
            "outputSchema": { "type": "object" },
            "http": { "method": "GET", "url": "https://svc.local/x" }
        }))
        .unwrap()
    }

    #[test]
    fn test_namespace_fallback() {
        let registry = InMemoryRegistry::new();
        registry.add_task(task("shared", None));
        registry.add_task(task("scoped", Some("team-a")));

        assert!(registry.task("shared", Some("team-a")).is_some());
        assert!(registry.task("scoped", Some("team-a")).is_some());
        assert!(registry.task("scoped", Some("team-b")).is_none());
        assert!(registry.task("scoped", None).is_none());
    }

    #[tokio::test]
    async fn test_scripted_sequence_with_sticky_last() {
        let client = ScriptedHttpClient::new();
        client.script_sequence(
            "https://svc.local/a",
            [ScriptedResponse::status(503), ScriptedResponse::json(200, json!({"ok": true}))],
        );

        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "https://svc.local/a".to_string(),
            headers: vec![],
            body: None,
        };
        let cancel = CancellationToken::new();

        let first = client.send(request.clone(), &cancel).await.unwrap();
        assert_eq!(first.status, 503);
        let second = client.send(request.clone(), &cancel).await.unwrap();
        assert_eq!(second.status, 200);
        // Last response repeats.
        let third = client.send(request.clone(), &cancel).await.unwrap();
        assert_eq!(third.status, 200);

        assert_eq!(client.calls_to("https://svc.local/a").len(), 3);
    }

    #[tokio::test]
    async fn test_unscripted_url_fails() {
        let client = ScriptedHttpClient::new();
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "https://svc.local/ghost".to_string(),
            headers: vec![],
            body: None,
        };
        let err = client
            .send(request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_delay_honors_cancellation() {
        let client = Arc::new(ScriptedHttpClient::new());
        client.script(
            "https://svc.local/slow",
            ScriptedResponse::status(200).with_delay(Duration::from_secs(30)),
        );

        let cancel = CancellationToken::new();
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "https://svc.local/slow".to_string(),
            headers: vec![],
            body: None,
        };

        let send_client = Arc::clone(&client);
        let send_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            send_client.send(request, &send_cancel).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
