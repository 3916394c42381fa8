//! Task resource — a reusable HTTP call with typed input/output schemas

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{duration_str, option_duration_str};
use crate::schema::SchemaSpec;

/// A Task resource as declared in the cluster.
///
/// The `http` block describes how to materialize the request; its URL,
/// header values, and body may contain `{{input.*}}` and `{{env.*}}`
/// placeholders (never `{{tasks.*}}` — a task has no siblings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub input_schema: SchemaSpec,
    pub output_schema: SchemaSpec,

    pub http: HttpSpec,

    /// Per-attempt budget for one HTTP call
    #[serde(default, with = "option_duration_str", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
}

/// The HTTP call a task performs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSpec {
    pub method: HttpMethod,

    /// URL template
    pub url: String,

    /// Header name to value-template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Body template; omitted means no request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// HTTP methods a task may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Delete => write!(f, "DELETE"),
            HttpMethod::Head => write!(f, "HEAD"),
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            _ => Err(format!("unknown HTTP method: {s}")),
        }
    }
}

/// Retry behavior for a task's HTTP call.
///
/// Delays follow capped exponential backoff with full jitter. A workflow
/// invocation may override the task-level policy wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_base_delay", with = "duration_str")]
    pub base_delay: Duration,

    /// Backoff multiplier between attempts
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Upper bound on any single delay
    #[serde(default = "default_cap", with = "duration_str")]
    pub cap: Duration,

    /// HTTP statuses that warrant a retry (transport errors always do)
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_factor() -> f64 {
    2.0
}

fn default_cap() -> Duration {
    Duration::from_secs(5)
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            factor: default_factor(),
            cap: default_cap(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_manifest_round_trip() {
        let json = serde_json::json!({
            "name": "geocode",
            "namespace": "demo",
            "inputSchema": {
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            },
            "outputSchema": {
                "type": "object",
                "properties": { "lat": { "type": "number" }, "lon": { "type": "number" } },
                "required": ["lat", "lon"]
            },
            "http": {
                "method": "GET",
                "url": "https://geo.example.com/v1?city={{input.city}}",
                "headers": { "x-api-key": "{{env.GEO_KEY}}" }
            },
            "timeout": "2s",
            "retry": { "maxAttempts": 5, "baseDelay": "100ms", "factor": 2.0, "cap": "5s",
                       "retryableStatuses": [429, 503] }
        });

        let task: TaskDefinition = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(task.http.method, HttpMethod::Get);
        assert_eq!(task.timeout, Some(Duration::from_secs(2)));
        assert_eq!(task.retry.as_ref().unwrap().max_attempts, 5);

        let back = serde_json::to_value(&task).unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn test_retry_defaults() {
        let retry: RetrySpec = serde_json::from_str("{}").unwrap();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.base_delay, Duration::from_millis(200));
        assert_eq!(retry.cap, Duration::from_secs(5));
        assert!(retry.retryable_statuses.contains(&503));
    }

    #[test]
    fn test_http_method_from_str() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }
}
