/// Collector health classification.
///
/// The collector exposes an HTTP health API on a fixed local port:
/// `GET /health/status` returns `{"healthy": bool, "status": "StatusOK"}` and
/// `GET /health/config` returns its effective config, including the
/// receiver endpoint it actually bound.
use crate::endpoint::{Endpoint, UNIX_SCHEME};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

const RECEIVER_ENDPOINT_POINTER: &str = "/receivers/otlp/protocols/grpc/endpoint";
const STATUS_OK: &str = "StatusOK";

/// Classified state of whatever is listening on the health port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Responds, but reports itself as not OK.
    Unhealthy,
    /// Healthy, but bound to a different receiver endpoint.
    WrongEndpoint,
    /// Healthy on the right endpoint, but the socket file is not on disk yet.
    MissingSocketFile,
    /// No response, connection refused, or non-200.
    Dead,
}

/// `/health/status` payload.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    pub healthy: bool,
    #[serde(default)]
    pub status: String,
}

/// Outcome of the `/health/status` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReply {
    /// Connection error or non-200.
    Unreachable,
    /// 200 with a body that is not a status report.
    Malformed,
    Report(StatusReport),
}

impl StatusReply {
    /// Verdict decided by the status request alone, if any. When this is
    /// `Some`, the config request is skipped.
    pub fn early_verdict(&self) -> Option<HealthVerdict> {
        match self {
            StatusReply::Unreachable => Some(HealthVerdict::Dead),
            StatusReply::Malformed => Some(HealthVerdict::Unhealthy),
            StatusReply::Report(r) if !r.healthy || r.status != STATUS_OK => {
                Some(HealthVerdict::Unhealthy)
            }
            StatusReply::Report(_) => None,
        }
    }
}

/// Extract the bound receiver endpoint from a `/health/config` body.
/// Anything unexpected yields an empty endpoint.
pub fn receiver_endpoint(config: Option<&Value>) -> &str {
    config
        .and_then(|c| c.pointer(RECEIVER_ENDPOINT_POINTER))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Whether the endpoint a collector reports is `expected`. The collector
/// may leave off the `unix://` scheme.
pub fn reported_endpoint_matches(actual: &str, expected: &Endpoint) -> bool {
    if actual.is_empty() {
        return false;
    }
    let uri = expected.uri();
    uri == actual || uri.strip_suffix(actual) == Some(UNIX_SCHEME)
}

/// Verdict from both replies and the on-disk state.
///
/// Precedence: `Dead`, `Unhealthy`, `WrongEndpoint`, `MissingSocketFile`,
/// then `Healthy`. The socket file is checked last since the collector can
/// report healthy before the OS has created it.
pub fn classify_replies(
    status: &StatusReply,
    config: Option<&Value>,
    expected: &Endpoint,
    socket_exists: impl Fn(&Path) -> bool,
) -> HealthVerdict {
    if let Some(verdict) = status.early_verdict() {
        return verdict;
    }
    if !reported_endpoint_matches(receiver_endpoint(config), expected) {
        return HealthVerdict::WrongEndpoint;
    }
    if let Some(path) = expected.socket_path() {
        if !socket_exists(path) {
            return HealthVerdict::MissingSocketFile;
        }
    }
    HealthVerdict::Healthy
}

/// Anything that can classify the collector's current health.
pub trait HealthCheck {
    async fn classify(&self, expected: &Endpoint) -> HealthVerdict;
}

/// Probes the collector's HTTP health API on `127.0.0.1:{port}`.
pub struct HttpHealthProbe {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHealthProbe {
    pub fn new(port: u16, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            base_url: format!("http://127.0.0.1:{port}"),
        })
    }

    async fn fetch_status(&self) -> StatusReply {
        let url = format!("{}/health/status", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "collector health status unreachable");
                return StatusReply::Unreachable;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            tracing::debug!(status = %response.status(), "collector health status not 200");
            return StatusReply::Unreachable;
        }
        match response.json::<StatusReport>().await {
            Ok(report) => StatusReply::Report(report),
            Err(e) => {
                tracing::debug!(error = %e, "malformed collector health status");
                StatusReply::Malformed
            }
        }
    }

    async fn fetch_config(&self) -> Option<Value> {
        let url = format!("{}/health/config", self.base_url);
        let response = self.client.get(&url).send().await.ok()?;
        match response.json::<Value>().await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(error = %e, "unreadable collector config");
                None
            }
        }
    }
}

impl HealthCheck for HttpHealthProbe {
    async fn classify(&self, expected: &Endpoint) -> HealthVerdict {
        let status = self.fetch_status().await;
        if let Some(verdict) = status.early_verdict() {
            return verdict;
        }
        let config = self.fetch_config().await;
        let verdict = classify_replies(&status, config.as_ref(), expected, Path::exists);
        tracing::debug!(?verdict, expected = %expected, "collector health classified");
        verdict
    }
}
