//! HTTP client abstraction consumed by the task executor
//!
//! Transport is externally managed: the engine only needs "send a request,
//! receive status/headers/body, honor a cancellation signal". The client
//! must not retry on its own; retry policy belongs to the task executor.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use flowgate_contracts::HttpMethod;

/// A fully materialized request (all templates already substituted)
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// A raw response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names lowercased
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server-supplied retry hint (`Retry-After` in whole seconds), if any
    pub fn retry_after_hint(&self) -> Option<Duration> {
        self.headers
            .get("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Bounded body prefix for error reports
    pub fn body_excerpt(&self) -> String {
        const EXCERPT_LEN: usize = 256;
        if self.body.len() <= EXCERPT_LEN {
            self.body.clone()
        } else {
            let mut end = EXCERPT_LEN;
            while !self.body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…", &self.body[..end])
        }
    }
}

/// Transport-level failure
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The cancellation signal fired before a response arrived
    #[error("request cancelled")]
    Cancelled,

    /// Connection, TLS, DNS, or protocol failure
    #[error("{reason}")]
    Failed { reason: String },
}

/// Sends one HTTP request.
///
/// Implementations must honor the cancellation token promptly and must not
/// retry internally. Safe for concurrent use.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError>;
}

/// Production client backed by a shared [`reqwest::Client`]
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        // Dropping the in-flight future aborts the underlying request.
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = builder.send() => result.map_err(|e| TransportError::Failed {
                reason: e.to_string(),
            })?,
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = response.text() => result.map_err(|e| TransportError::Failed {
                reason: e.to_string(),
            })?,
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_success_range() {
        assert!(response(200, &[], "").is_success());
        assert!(response(204, &[], "").is_success());
        assert!(!response(301, &[], "").is_success());
        assert!(!response(404, &[], "").is_success());
    }

    #[test]
    fn test_retry_after_hint() {
        let r = response(429, &[("retry-after", "2")], "");
        assert_eq!(r.retry_after_hint(), Some(Duration::from_secs(2)));

        // HTTP-date form and garbage fall back to computed backoff.
        let r = response(429, &[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")], "");
        assert_eq!(r.retry_after_hint(), None);

        assert_eq!(response(429, &[], "").retry_after_hint(), None);
    }

    #[test]
    fn test_body_excerpt_truncates() {
        let long = "x".repeat(1000);
        let r = response(500, &[], &long);
        assert!(r.body_excerpt().chars().count() <= 257);

        let short = response(500, &[], "oops");
        assert_eq!(short.body_excerpt(), "oops");
    }
}
