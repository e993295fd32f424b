//! Network delivery with retry, doubling backoff and cancellation.

use crate::error::{DispatchError, Result, StpError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("stp/", env!("CARGO_PKG_VERSION"));

/// How often and how patiently a request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Attempts actually made; never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// A fully prepared POST.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One network round trip. Implemented over `reqwest` by [`HttpTransport`];
/// tests substitute their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: HttpRequest) -> std::result::Result<HttpResponse, DispatchError>;
}

/// Client tuning taken from the configuration.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub timeout: Duration,
    pub enable_http2: bool,
    pub verify_ssl: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            enable_http2: true,
            verify_ssl: true,
        }
    }
}

/// `reqwest` backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(options: &TransportOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(options.timeout)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90));
        if !options.enable_http2 {
            builder = builder.http1_only();
        }
        if !options.verify_ssl {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| StpError::from(DispatchError::Transport(format!("failed to build HTTP client: {e}"))))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: HttpRequest) -> std::result::Result<HttpResponse, DispatchError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::Transport(format!("failed to read body: {e}")))?;
        Ok(HttpResponse { status, body })
    }
}

fn build_request(endpoint: &str, token: &str, body: Vec<u8>) -> HttpRequest {
    let mut headers = vec![
        ("Content-Type", "application/json".to_string()),
        ("User-Agent", USER_AGENT.to_string()),
    ];
    if !token.is_empty() {
        headers.push(("Authorization", format!("Bearer {token}")));
    }
    HttpRequest {
        url: endpoint.to_string(),
        headers,
        body,
    }
}

/// POSTs `payload` to `endpoint`, retrying failed attempts.
///
/// Returns the raw body of the first 2xx response. Cancelling `cancel`
/// during a call or a backoff sleep ends the loop with
/// [`DispatchError::Cancelled`]; otherwise exhaustion returns the last error.
pub async fn send_with_retry(
    transport: &dyn Transport,
    endpoint: &str,
    token: &str,
    payload: &Map<String, Value>,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> std::result::Result<String, DispatchError> {
    if endpoint.is_empty() {
        return Err(DispatchError::EmptyEndpoint);
    }
    let body = serde_json::to_vec(payload).map_err(|e| DispatchError::Encode(e.to_string()))?;

    let attempts = policy.attempts();
    let mut delay = policy.base_delay;
    let mut last_error = None;

    for attempt in 1..=attempts {
        let request = build_request(endpoint, token, body.clone());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            outcome = transport.post(request) => outcome,
        };

        match outcome {
            Ok(response) if response.is_success() => {
                tracing::debug!(attempt, status = response.status, "request succeeded");
                return Ok(response.body);
            }
            Ok(response) => {
                tracing::warn!(attempt, attempts, status = response.status, "request rejected");
                last_error = Some(DispatchError::Status {
                    status: response.status,
                    body: response.body,
                });
            }
            Err(DispatchError::Cancelled) => return Err(DispatchError::Cancelled),
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "request failed");
                last_error = Some(e);
            }
        }

        if attempt == attempts {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        delay = delay.saturating_mul(2);
    }

    Err(last_error.unwrap_or_else(|| DispatchError::Transport("request failed".to_string())))
}
