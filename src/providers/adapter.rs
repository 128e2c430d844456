//! Request adapters for AI provider families.
//!
//! Each provider is mapped to one adapter when it is probed. Vendor adapters
//! know their endpoint layout, auth header and where the generated text
//! sits in the response. The templated adapter is built from the provider's
//! own `method`/`headers`/`body_template`/`response_path`/`success_condition`
//! strings, which are parsed here once instead of being interpreted per call.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::models::{AiProvider, ProviderKind};

/// Max tokens requested from vendors during a probe.
const PROBE_MAX_TOKENS: u32 = 16;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Errors building an adapter or a request from it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Unknown template placeholder '{{{{{0}}}}}'")]
    UnknownPlaceholder(String),

    #[error("Unterminated placeholder in template: {0}")]
    UnterminatedPlaceholder(String),

    #[error("Invalid response path '{0}'")]
    InvalidResponsePath(String),

    #[error("Invalid success condition '{0}'")]
    InvalidSuccessCondition(String),

    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("Invalid endpoint URL '{0}'")]
    InvalidUrl(String),

    #[error("Provider endpoint is empty")]
    MissingEndpoint,

    #[error("{0} requires an API key")]
    MissingApiKey(&'static str),
}

/// Values substituted into templates.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub api_key: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Model,
    Prompt,
    ApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A string with `{{model}}`, `{{prompt}}` and `{{apiKey}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, AdapterError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &source[last..whole.start()], source)?;
            let placeholder = match name.as_str() {
                "model" => Placeholder::Model,
                "prompt" => Placeholder::Prompt,
                "apiKey" | "api_key" => Placeholder::ApiKey,
                other => return Err(AdapterError::UnknownPlaceholder(other.to_string())),
            };
            segments.push(Segment::Placeholder(placeholder));
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..], source)?;

        Ok(Self { segments })
    }

    /// Substitute placeholders verbatim.
    pub fn render(&self, ctx: &RenderContext<'_>) -> String {
        self.render_with(ctx, |s| s.to_string())
    }

    /// Substitute placeholders escaped for use inside a JSON string literal.
    pub fn render_json(&self, ctx: &RenderContext<'_>) -> String {
        self.render_with(ctx, json_escape)
    }

    fn render_with(&self, ctx: &RenderContext<'_>, escape: impl Fn(&str) -> String) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(Placeholder::Model) => out.push_str(&escape(ctx.model)),
                Segment::Placeholder(Placeholder::Prompt) => out.push_str(&escape(ctx.prompt)),
                Segment::Placeholder(Placeholder::ApiKey) => out.push_str(&escape(ctx.api_key)),
            }
        }
        out
    }
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap());

/// Literal text between placeholders; a leftover `{{` means one was never closed.
fn push_literal(
    segments: &mut Vec<Segment>,
    text: &str,
    source: &str,
) -> Result<(), AdapterError> {
    if text.contains("{{") {
        return Err(AdapterError::UnterminatedPlaceholder(source.to_string()));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

fn json_escape(s: &str) -> String {
    let quoted = Value::String(s.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Location of the generated text in a JSON response, as a JSON pointer.
///
/// Accepts `choices.0.message.content`, `choices[0].message.content` or a
/// pointer starting with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePath {
    pointer: String,
}

impl ResponsePath {
    pub fn parse(path: &str) -> Result<Self, AdapterError> {
        let path = path.trim();
        if path.starts_with('/') {
            return Ok(Self {
                pointer: path.to_string(),
            });
        }

        let mut tokens = Vec::new();
        for part in path.split('.') {
            let (key, mut indexes) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if !key.is_empty() {
                tokens.push(key.replace('~', "~0").replace('/', "~1"));
            } else if indexes.is_empty() {
                return Err(AdapterError::InvalidResponsePath(path.to_string()));
            }
            while !indexes.is_empty() {
                let close = indexes
                    .find(']')
                    .ok_or_else(|| AdapterError::InvalidResponsePath(path.to_string()))?;
                let index = &indexes[1..close];
                if index.parse::<usize>().is_err() {
                    return Err(AdapterError::InvalidResponsePath(path.to_string()));
                }
                tokens.push(index.to_string());
                indexes = &indexes[close + 1..];
                if !indexes.is_empty() && !indexes.starts_with('[') {
                    return Err(AdapterError::InvalidResponsePath(path.to_string()));
                }
            }
        }

        Ok(Self {
            pointer: format!("/{}", tokens.join("/")),
        })
    }

    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    pub fn extract<'v>(&self, body: &'v Value) -> Option<&'v Value> {
        body.pointer(&self.pointer)
    }
}

/// When a probe response counts as a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessCondition {
    /// 2xx, and the response path (if any) yields a non-empty value.
    Default,
    /// Exactly this HTTP status.
    Status(u16),
    /// 2xx and the response path resolves.
    Exists,
    /// 2xx and the response path yields a non-empty value.
    NonEmpty,
    /// 2xx and the extracted text (or the whole body) contains this text.
    Contains(String),
}

impl SuccessCondition {
    pub fn parse(condition: &str) -> Result<Self, AdapterError> {
        let condition = condition.trim();
        if condition.is_empty() {
            return Ok(Self::Default);
        }
        if let Some(text) = condition.strip_prefix("contains:") {
            return Ok(Self::Contains(text.to_string()));
        }
        if let Some(code) = condition
            .strip_prefix("status==")
            .or_else(|| condition.strip_prefix("status:"))
        {
            return code
                .trim()
                .parse::<u16>()
                .map(Self::Status)
                .map_err(|_| AdapterError::InvalidSuccessCondition(condition.to_string()));
        }
        match condition {
            "exists" => Ok(Self::Exists),
            "non_empty" | "nonEmpty" | "not_empty" => Ok(Self::NonEmpty),
            _ => Err(AdapterError::InvalidSuccessCondition(condition.to_string())),
        }
    }
}

/// A fully rendered probe request.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Request shape for one provider.
#[derive(Debug, Clone)]
pub enum ProviderAdapter {
    OpenAiCompatible(VendorTarget),
    Anthropic(VendorTarget),
    Gemini(VendorTarget),
    Ollama(VendorTarget),
    Templated(TemplatedAdapter),
}

/// Connection details shared by the vendor adapters.
#[derive(Debug, Clone)]
pub struct VendorTarget {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    headers: Vec<(String, String)>,
}

/// Adapter assembled from provider-supplied templates.
#[derive(Debug, Clone)]
pub struct TemplatedAdapter {
    method: Method,
    url: Template,
    headers: Vec<(String, Template)>,
    body: Option<Template>,
    response_path: Option<ResponsePath>,
    success: SuccessCondition,
    model: String,
    api_key: String,
}

impl ProviderAdapter {
    /// Pick and build the adapter for a provider.
    ///
    /// An explicit `kind` wins, then a `body_template` selects the templated
    /// adapter, then the endpoint host decides, falling back to the
    /// OpenAI-compatible shape.
    pub fn for_provider(provider: &AiProvider) -> Result<Self, AdapterError> {
        let endpoint = provider.endpoint.trim();
        if endpoint.is_empty() {
            return Err(AdapterError::MissingEndpoint);
        }

        let kind = match provider.kind {
            Some(kind) => kind,
            None if provider.body_template.is_some() => ProviderKind::Custom,
            None => infer_kind(endpoint),
        };

        let target = || VendorTarget {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: provider.api_key.clone().filter(|k| !k.is_empty()),
            model: provider
                .model
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| default_model(kind).to_string()),
            headers: provider
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        match kind {
            ProviderKind::OpenAi => Ok(Self::OpenAiCompatible(target())),
            ProviderKind::Anthropic => {
                let target = target();
                if target.api_key.is_none() {
                    return Err(AdapterError::MissingApiKey("Anthropic"));
                }
                Ok(Self::Anthropic(target))
            }
            ProviderKind::Gemini => {
                let target = target();
                if target.api_key.is_none() {
                    return Err(AdapterError::MissingApiKey("Gemini"));
                }
                Ok(Self::Gemini(target))
            }
            ProviderKind::Ollama => Ok(Self::Ollama(target())),
            ProviderKind::Custom => TemplatedAdapter::build(provider).map(Self::Templated),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::OpenAiCompatible(_) => ProviderKind::OpenAi,
            Self::Anthropic(_) => ProviderKind::Anthropic,
            Self::Gemini(_) => ProviderKind::Gemini,
            Self::Ollama(_) => ProviderKind::Ollama,
            Self::Templated(_) => ProviderKind::Custom,
        }
    }

    /// Render the request that sends `prompt` to the provider.
    pub fn build_request(&self, prompt: &str) -> Result<ProbeRequest, AdapterError> {
        match self {
            Self::OpenAiCompatible(t) => {
                let mut headers = t.headers.clone();
                if let Some(key) = &t.api_key {
                    headers.push(("Authorization".to_string(), format!("Bearer {}", key)));
                }
                Ok(json_request(
                    with_suffix(&t.endpoint, "/chat/completions"),
                    headers,
                    json!({
                        "model": t.model,
                        "messages": [{"role": "user", "content": prompt}],
                        "max_tokens": PROBE_MAX_TOKENS,
                    }),
                ))
            }
            Self::Anthropic(t) => {
                let mut headers = t.headers.clone();
                if let Some(key) = &t.api_key {
                    headers.push(("x-api-key".to_string(), key.clone()));
                }
                headers.push(("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()));
                let url = if t.endpoint.ends_with("/messages") {
                    t.endpoint.clone()
                } else if t.endpoint.ends_with("/v1") {
                    format!("{}/messages", t.endpoint)
                } else {
                    format!("{}/v1/messages", t.endpoint)
                };
                Ok(json_request(
                    url,
                    headers,
                    json!({
                        "model": t.model,
                        "max_tokens": PROBE_MAX_TOKENS,
                        "messages": [{"role": "user", "content": prompt}],
                    }),
                ))
            }
            Self::Gemini(t) => {
                let base = if t.endpoint.contains(":generateContent") {
                    t.endpoint.clone()
                } else {
                    format!("{}/models/{}:generateContent", t.endpoint, t.model)
                };
                let mut url =
                    Url::parse(&base).map_err(|_| AdapterError::InvalidUrl(base.clone()))?;
                if let Some(key) = &t.api_key {
                    url.query_pairs_mut().append_pair("key", key);
                }
                Ok(json_request(
                    url.to_string(),
                    t.headers.clone(),
                    json!({
                        "contents": [{"parts": [{"text": prompt}]}],
                        "generationConfig": {"maxOutputTokens": PROBE_MAX_TOKENS},
                    }),
                ))
            }
            Self::Ollama(t) => Ok(json_request(
                with_suffix(&t.endpoint, "/api/generate"),
                t.headers.clone(),
                json!({
                    "model": t.model,
                    "prompt": prompt,
                    "stream": false,
                    "options": {"num_predict": PROBE_MAX_TOKENS},
                }),
            )),
            Self::Templated(adapter) => adapter.build_request(prompt),
        }
    }

    /// Judge a response. `Ok` carries the extracted text, `Err` the reason.
    pub fn evaluate(&self, status: u16, body: &str) -> Result<String, String> {
        match self {
            Self::Templated(adapter) => {
                evaluate(status, body, adapter.response_path.as_ref(), &adapter.success)
            }
            vendor => {
                let path = ResponsePath {
                    pointer: vendor_pointer(vendor.kind()).to_string(),
                };
                evaluate(status, body, Some(&path), &SuccessCondition::Default)
            }
        }
    }
}

impl TemplatedAdapter {
    fn build(provider: &AiProvider) -> Result<Self, AdapterError> {
        let method = match provider.method.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => Method::from_bytes(m.to_uppercase().as_bytes())
                .map_err(|_| AdapterError::InvalidMethod(m.to_string()))?,
            _ if provider.body_template.is_some() => Method::POST,
            _ => Method::GET,
        };

        let headers = provider
            .headers
            .iter()
            .map(|(name, value)| Ok((name.clone(), Template::parse(value)?)))
            .collect::<Result<Vec<_>, AdapterError>>()?;

        Ok(Self {
            method,
            url: Template::parse(provider.endpoint.trim())?,
            headers,
            body: provider
                .body_template
                .as_deref()
                .map(Template::parse)
                .transpose()?,
            response_path: provider
                .response_path
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .map(ResponsePath::parse)
                .transpose()?,
            success: SuccessCondition::parse(provider.success_condition.as_deref().unwrap_or(""))?,
            model: provider.model.clone().unwrap_or_default(),
            api_key: provider.api_key.clone().unwrap_or_default(),
        })
    }

    fn build_request(&self, prompt: &str) -> Result<ProbeRequest, AdapterError> {
        let ctx = RenderContext {
            model: &self.model,
            prompt,
            api_key: &self.api_key,
        };

        let url = self.url.render(&ctx);
        Url::parse(&url).map_err(|_| AdapterError::InvalidUrl(url.clone()))?;

        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.render(&ctx)))
            .collect();

        let body = self.body.as_ref().map(|t| t.render_json(&ctx));
        if body.is_some()
            && !headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        Ok(ProbeRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
        })
    }
}

fn infer_kind(endpoint: &str) -> ProviderKind {
    let host = Url::parse(endpoint).ok().and_then(|u| {
        let port = u.port();
        u.host_str().map(|h| (h.to_lowercase(), port))
    });

    match host {
        Some((host, _)) if host.ends_with("anthropic.com") => ProviderKind::Anthropic,
        Some((host, _)) if host.ends_with("generativelanguage.googleapis.com") => {
            ProviderKind::Gemini
        }
        Some((host, port)) if host.contains("ollama") || port == Some(11434) => {
            ProviderKind::Ollama
        }
        _ => ProviderKind::OpenAi,
    }
}

fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi | ProviderKind::Custom => "gpt-4o-mini",
        ProviderKind::Anthropic => "claude-3-5-haiku-latest",
        ProviderKind::Gemini => "gemini-1.5-flash",
        ProviderKind::Ollama => "llama3",
    }
}

fn vendor_pointer(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi | ProviderKind::Custom => "/choices/0/message/content",
        ProviderKind::Anthropic => "/content/0/text",
        ProviderKind::Gemini => "/candidates/0/content/parts/0/text",
        ProviderKind::Ollama => "/response",
    }
}

fn with_suffix(endpoint: &str, suffix: &str) -> String {
    if endpoint.ends_with(suffix) {
        endpoint.to_string()
    } else {
        format!("{}{}", endpoint, suffix)
    }
}

fn json_request(url: String, mut headers: Vec<(String, String)>, body: Value) -> ProbeRequest {
    headers.push(("Content-Type".to_string(), "application/json".to_string()));
    ProbeRequest {
        method: Method::POST,
        url,
        headers,
        body: Some(body.to_string()),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn evaluate(
    status: u16,
    body: &str,
    path: Option<&ResponsePath>,
    condition: &SuccessCondition,
) -> Result<String, String> {
    if let SuccessCondition::Status(expected) = condition {
        return if status == *expected {
            Ok(format!("HTTP {}", status))
        } else {
            Err(format!("expected HTTP {}, got {}", expected, status))
        };
    }

    if !(200..300).contains(&status) {
        return Err(format!("HTTP {}: {}", status, snippet(body)));
    }

    let Some(path) = path else {
        return match condition {
            SuccessCondition::Contains(text) if !body.contains(text.as_str()) => {
                Err(format!("response does not contain '{}'", text))
            }
            _ => Ok(snippet(body)),
        };
    };

    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| format!("response is not JSON: {}", e))?;
    let extracted = path.extract(&parsed);

    match (condition, extracted) {
        (_, None) => Err(format!("response has nothing at {}", path.pointer())),
        (SuccessCondition::Exists, Some(value)) => Ok(snippet(&value_text(value))),
        (SuccessCondition::Contains(text), Some(value)) => {
            let found = value_text(value);
            if found.contains(text.as_str()) {
                Ok(snippet(&found))
            } else {
                Err(format!("response does not contain '{}'", text))
            }
        }
        (_, Some(value)) if is_empty_value(value) => {
            Err(format!("empty value at {}", path.pointer()))
        }
        (_, Some(value)) => Ok(snippet(&value_text(value))),
    }
}

/// First 120 characters, for messages.
fn snippet(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(120) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
