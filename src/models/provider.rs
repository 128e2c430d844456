//! AI provider models and health state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Probe timeout used when a provider doesn't set `timeout_ms`.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Bounds applied to a provider's configured probe timeout.
const MIN_PROBE_TIMEOUT_MS: u64 = 250;
const MAX_PROBE_TIMEOUT_MS: u64 = 60_000;

/// Connectivity status written by the health controller.
///
/// Other writers share the provider documents, so any value outside the
/// known vocabulary decodes as `Unknown` instead of failing the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Online,
    Offline,
    Unknown,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ProviderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_str(&s.to_lowercase()).unwrap_or(Self::Unknown))
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health classification maintained alongside the health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "healthy" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "unhealthy" => Some(Self::Unhealthy),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for HealthStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_str(&s.to_lowercase()).unwrap_or(Self::Unknown))
    }
}

/// Vendor family, used to pick a request adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions (OpenAI, Groq, OpenRouter, DeepSeek...)
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
    /// Request built from the provider's own templates.
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" | "groq" | "openrouter" | "deepseek" | "together" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "gemini" | "google" => Some(Self::Gemini),
            "ollama" => Some(Self::Ollama),
            "custom" | "template" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Accepts vendor aliases such as `groq` or `claude`.
impl<'de> Deserialize<'de> for ProviderKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown provider kind: {}", s)))
    }
}

/// Stored kinds outside the known aliases fall back to endpoint inference.
fn lenient_kind<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<ProviderKind>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(ProviderKind::from_str))
}

/// Scores are written as arbitrary JSON numbers by the summary engine.
fn lenient_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| v.as_f64()).filter(|score| score.is_finite()))
}

fn default_priority() -> i64 {
    100
}

fn default_enabled() -> bool {
    true
}

/// An external AI summary-generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiProvider {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "lenient_kind",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<ProviderKind>,
    /// Lower values are tried first.
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    // Connectivity descriptor
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    // Health fields
    #[serde(default, rename = "isHealthy", skip_serializing_if = "Option::is_none")]
    pub is_healthy: Option<bool>,
    #[serde(
        default,
        rename = "healthStatus",
        skip_serializing_if = "Option::is_none"
    )]
    pub health_status: Option<HealthStatus>,
    #[serde(
        default,
        rename = "healthScore",
        deserialize_with = "lenient_score",
        skip_serializing_if = "Option::is_none"
    )]
    pub health_score: Option<f64>,
    #[serde(default, rename = "pausedUntil")]
    pub paused_until: Option<DateTime<Utc>>,
    #[serde(default, rename = "failureCount")]
    pub failure_count: u32,
    #[serde(
        default,
        rename = "lastFailureAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "lastError")]
    pub last_error: Option<String>,

    // Written by the health controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProviderStatus>,
    #[serde(
        default,
        rename = "lastCheckedAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "lastLatencyMs",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_latency_ms: Option<u64>,
}

impl AiProvider {
    /// Create an enabled provider with no health history.
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: None,
            priority: default_priority(),
            enabled: true,
            endpoint: endpoint.into(),
            api_key: None,
            model: None,
            method: None,
            headers: BTreeMap::new(),
            body_template: None,
            response_path: None,
            success_condition: None,
            timeout_ms: None,
            is_healthy: None,
            health_status: None,
            health_score: None,
            paused_until: None,
            failure_count: 0,
            last_failure_at: None,
            last_error: None,
            status: None,
            last_checked_at: None,
            last_latency_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Probe timeout, clamped to sane bounds.
    pub fn probe_timeout(&self) -> Duration {
        let ms = self
            .timeout_ms
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS)
            .clamp(MIN_PROBE_TIMEOUT_MS, MAX_PROBE_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    /// Whether retries are gated by a cool-down that hasn't elapsed yet.
    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.is_some_and(|until| until > now)
    }

    /// Whether the provider was marked offline or degraded and waits for the
    /// recovery sweep rather than the regular check. An unrecognised status
    /// is treated the same way.
    pub fn awaiting_recovery(&self) -> bool {
        matches!(
            self.status,
            Some(ProviderStatus::Offline) | Some(ProviderStatus::Unknown)
        )
            || matches!(
                self.health_status,
                Some(HealthStatus::Degraded) | Some(HealthStatus::Unhealthy)
            )
    }

    /// Whether the provider may be selected for generation right now.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.is_paused(now)
    }

    /// Copy with the API key redacted, safe to hand to callers.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.api_key = self.api_key.as_deref().map(mask_api_key);
        copy
    }
}

/// Redact an API key, keeping only enough to recognise it.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}

/// Editable subset of a provider, as submitted by the admin console.
///
/// Health fields are absent; only the health controller writes them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<ProviderKind>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub body_template: Option<String>,
    #[serde(default)]
    pub response_path: Option<String>,
    #[serde(default)]
    pub success_condition: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ProviderDescriptor {
    /// Apply the submitted fields onto a provider.
    ///
    /// A masked API key echoed back by the console (contains `****`) leaves
    /// the stored key untouched.
    pub fn apply_to(self, provider: &mut AiProvider) {
        if let Some(name) = self.name {
            provider.name = name;
        }
        if self.kind.is_some() {
            provider.kind = self.kind;
        }
        if let Some(priority) = self.priority {
            provider.priority = priority;
        }
        if let Some(enabled) = self.enabled {
            provider.enabled = enabled;
        }
        if let Some(endpoint) = self.endpoint {
            provider.endpoint = endpoint;
        }
        if let Some(key) = self.api_key.filter(|k| !k.contains("****")) {
            provider.api_key = Some(key);
        }
        if self.model.is_some() {
            provider.model = self.model;
        }
        if self.method.is_some() {
            provider.method = self.method;
        }
        if let Some(headers) = self.headers {
            provider.headers = headers;
        }
        if self.body_template.is_some() {
            provider.body_template = self.body_template;
        }
        if self.response_path.is_some() {
            provider.response_path = self.response_path;
        }
        if self.success_condition.is_some() {
            provider.success_condition = self.success_condition;
        }
        if self.timeout_ms.is_some() {
            provider.timeout_ms = self.timeout_ms;
        }
    }
}
