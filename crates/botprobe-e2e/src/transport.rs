//! Webhook delivery.
//!
//! Probes are POSTed to `<base_url>/webhook/<token>` exactly the way Telegram
//! delivers updates. Only an HTTP 200 counts as accepted; every other outcome
//! is a [`TransportError`] that the runner records against the step. There are
//! no retries: a retried update would be a second, different probe.

use std::time::Duration;

use botprobe_telegram::ProbePayload;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TargetConfig;

/// An accepted delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

/// HTTP client bound to one webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl WebhookClient {
    pub fn new(target: &TargetConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(target.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Protocol(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: target.webhook_url(),
            timeout: target.timeout(),
        })
    }

    /// The full webhook URL, including the token.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delivers a probe with the configured timeout.
    pub async fn send(&self, payload: &ProbePayload) -> Result<Delivery, TransportError> {
        self.send_with_timeout(payload, self.timeout).await
    }

    /// Delivers a probe, giving up after `timeout`.
    pub async fn send_with_timeout(
        &self,
        payload: &ProbePayload,
        timeout: Duration,
    ) -> Result<Delivery, TransportError> {
        let body = payload
            .to_json()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        debug!(
            update_id = payload.update_id(),
            bytes = body.len(),
            probe = %payload.describe(),
            "delivering probe"
        );

        let start = Instant::now();
        let request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body)
            .send();

        let exchange = async {
            let response = request.await.map_err(classify)?;
            let status = response.status().as_u16();
            let text = response.text().await.map_err(classify)?;
            Ok::<_, TransportError>((status, text))
        };

        let (status, body) = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(update_id = payload.update_id(), ?timeout, "webhook delivery timed out");
                return Err(TransportError::Timeout(timeout));
            }
        };
        let latency = start.elapsed();

        if status != 200 {
            warn!(update_id = payload.update_id(), status, "webhook rejected probe");
            return Err(TransportError::Status { status, body });
        }

        info!(
            update_id = payload.update_id(),
            status,
            latency_ms = latency.as_millis() as u64,
            "probe accepted"
        );
        Ok(Delivery {
            status,
            body,
            latency,
        })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Connection(format!("timed out: {error}"))
    } else if error.is_connect() {
        TransportError::Connection(error.to_string())
    } else {
        TransportError::Protocol(error.to_string())
    }
}

/// Delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("webhook answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Short machine-readable failure class.
    pub fn reason(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Connection(_) => "connection",
            TransportError::Status { .. } => "status",
            TransportError::Protocol(_) => "protocol",
        }
    }

    /// HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
