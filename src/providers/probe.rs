//! Connectivity probes for AI providers.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::adapter::ProviderAdapter;
use crate::models::AiProvider;

/// Prompt sent by connectivity tests.
pub const PROBE_PROMPT: &str = "Reply with the single word OK.";

/// Outcome of one connectivity test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub success: bool,
    #[serde(rename = "latencyMs", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProbeResult {
    pub fn ok(latency_ms: u64, message: impl Into<String>) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
            message: Some(message.into()),
        }
    }

    pub fn failed(latency_ms: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_ms,
            message: Some(message.into()),
        }
    }
}

/// Tests whether a provider answers.
///
/// Implementations report failures in the result instead of returning
/// errors; a broken provider is data, not a fault of the caller.
#[async_trait]
pub trait ProviderProbe: Send + Sync {
    async fn test_connection(&self, provider: &AiProvider) -> ProbeResult;
}

/// Probe that sends a tiny generation request over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("khobor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderProbe for HttpProbe {
    async fn test_connection(&self, provider: &AiProvider) -> ProbeResult {
        let adapter = match ProviderAdapter::for_provider(provider) {
            Ok(adapter) => adapter,
            Err(e) => return ProbeResult::failed(None, e.to_string()),
        };
        let request = match adapter.build_request(PROBE_PROMPT) {
            Ok(request) => request,
            Err(e) => return ProbeResult::failed(None, e.to_string()),
        };

        let timeout = provider.probe_timeout();
        debug!(
            "Probing provider {} ({}) at {}",
            provider.id,
            adapter.kind().as_str(),
            request.url
        );

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let message = if e.is_timeout() {
                    format!("Timed out after {} ms", timeout.as_millis())
                } else {
                    format!("Connection error: {}", e)
                };
                return ProbeResult::failed(Some(elapsed), message);
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let message = if e.is_timeout() {
                    format!("Timed out after {} ms", timeout.as_millis())
                } else {
                    format!("Failed to read response: {}", e)
                };
                return ProbeResult::failed(Some(elapsed), message);
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match adapter.evaluate(status, &body) {
            Ok(text) => ProbeResult::ok(latency_ms, text),
            Err(reason) => ProbeResult::failed(Some(latency_ms), reason),
        }
    }
}
