//! Provider-agnostic model gateway.
//!
//! Every backend is reduced to one contract:
//! `call(spec, prompt, limits) -> GatewayReply { code, text }`.
//! `code == 0` is success and `text` is the model output. Any other code is a
//! failure and `text` carries the raw response body or an error message,
//! never partially-parsed model output.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Reply codes that are not HTTP statuses.
pub mod reply_codes {
    /// Success.
    pub const OK: i32 = 0;
    /// Transport-level failure: no response, connection error or timeout.
    pub const TRANSPORT: i32 = 1;
    /// Missing credentials or endpoint; no request was attempted.
    pub const PRECONDITION: i32 = 2;
}

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// System prompt used when a participant does not bring its own.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a senior software engineer. Be concrete, concise and technically precise.";

/// Backend API shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions.
    OpenAi,
    /// Anthropic messages.
    Anthropic,
    /// Google Gemini generateContent.
    Gemini,
    /// Any OpenAI-compatible endpoint.
    Custom,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// One callable backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Participant id, unique within a call.
    pub id: String,
    /// API shape.
    pub provider: Provider,
    /// Provider model name.
    pub model: String,
    /// Endpoint override.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Credential forwarded to the provider.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// System prompt override.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl ModelSpec {
    /// Shape checks that do not need the network.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidParams("model spec requires a non-empty id".into()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::InvalidParams(format!(
                "model spec '{}' requires a non-empty model",
                self.id
            )));
        }
        Ok(())
    }

    fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    fn api_key(&self) -> Option<&str> {
        non_empty(self.api_key.as_deref())
    }

    fn api_url(&self) -> Option<&str> {
        non_empty(self.api_url.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Per-call limits shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallLimits {
    /// Wall-clock budget for the whole HTTP exchange.
    pub timeout: Duration,
    /// Sampling temperature.
    pub temperature: f64,
    /// Output token cap.
    pub max_tokens: u32,
}

impl Default for CallLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            temperature: 0.2,
            max_tokens: 2048,
        }
    }
}

/// Normalized outcome of one gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayReply {
    /// 0 on success, otherwise an HTTP status or one of [`reply_codes`].
    pub code: i32,
    /// Model output on success, diagnostics otherwise.
    pub text: String,
}

impl GatewayReply {
    /// Successful reply.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            code: reply_codes::OK,
            text: text.into(),
        }
    }

    /// Failed reply.
    pub fn failure(code: i32, text: impl Into<String>) -> Self {
        debug_assert!(code != reply_codes::OK);
        Self {
            code,
            text: text.into(),
        }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        self.code == reply_codes::OK
    }
}

/// Uniform entry point to every model backend.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Issue one prompt. Never fails at the type level; failures are encoded
    /// in the reply code.
    async fn call(&self, spec: &ModelSpec, prompt: &str, limits: &CallLimits) -> GatewayReply;
}

/// A fully-built provider request, ready to send.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub query: Vec<(&'static str, String)>,
    pub bearer: Option<String>,
    pub body: Value,
}

/// Build the provider-specific request, or the precondition failure that
/// prevents one from being sent.
pub fn build_request(
    spec: &ModelSpec,
    prompt: &str,
    limits: &CallLimits,
) -> std::result::Result<ProviderRequest, GatewayReply> {
    match spec.provider {
        Provider::OpenAi => {
            let key = spec.api_key().ok_or_else(|| missing("openai", "api_key"))?;
            Ok(ProviderRequest {
                url: spec.api_url().unwrap_or(OPENAI_ENDPOINT).to_string(),
                headers: Vec::new(),
                query: Vec::new(),
                bearer: Some(key.to_string()),
                body: chat_body(spec, prompt, limits),
            })
        }
        Provider::Custom => {
            let url = spec.api_url().ok_or_else(|| missing("custom", "api_url"))?;
            Ok(ProviderRequest {
                url: url.to_string(),
                headers: Vec::new(),
                query: Vec::new(),
                bearer: spec.api_key().map(str::to_string),
                body: chat_body(spec, prompt, limits),
            })
        }
        Provider::Anthropic => {
            let key = spec.api_key().ok_or_else(|| missing("anthropic", "api_key"))?;
            Ok(ProviderRequest {
                url: spec.api_url().unwrap_or(ANTHROPIC_ENDPOINT).to_string(),
                headers: vec![
                    ("x-api-key", key.to_string()),
                    ("anthropic-version", ANTHROPIC_VERSION.to_string()),
                ],
                query: Vec::new(),
                bearer: None,
                body: json!({
                    "model": spec.model,
                    "system": spec.system_prompt(),
                    "messages": [{ "role": "user", "content": prompt }],
                    "temperature": limits.temperature,
                    "max_tokens": limits.max_tokens,
                }),
            })
        }
        Provider::Gemini => {
            let body = json!({
                "systemInstruction": { "parts": [{ "text": spec.system_prompt() }] },
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                "generationConfig": {
                    "temperature": limits.temperature,
                    "maxOutputTokens": limits.max_tokens,
                },
            });
            match spec.api_url() {
                Some(url) => Ok(ProviderRequest {
                    url: url.to_string(),
                    headers: spec
                        .api_key()
                        .map(|k| vec![("x-goog-api-key", k.to_string())])
                        .unwrap_or_default(),
                    query: Vec::new(),
                    bearer: None,
                    body,
                }),
                None => {
                    let key = spec
                        .api_key()
                        .ok_or_else(|| missing("gemini", "api_key (or api_url)"))?;
                    Ok(ProviderRequest {
                        url: format!("{}/{}:generateContent", GEMINI_ENDPOINT, spec.model),
                        headers: Vec::new(),
                        query: vec![("key", key.to_string())],
                        bearer: None,
                        body,
                    })
                }
            }
        }
    }
}

fn missing(provider: &str, field: &str) -> GatewayReply {
    GatewayReply::failure(
        reply_codes::PRECONDITION,
        format!("{} provider requires {}", provider, field),
    )
}

fn chat_body(spec: &ModelSpec, prompt: &str, limits: &CallLimits) -> Value {
    json!({
        "model": spec.model,
        "messages": [
            { "role": "system", "content": spec.system_prompt() },
            { "role": "user", "content": prompt },
        ],
        "temperature": limits.temperature,
        "max_tokens": limits.max_tokens,
    })
}

// =============================================================================
// Response shapes
// =============================================================================

/// Successful response body, decoded per provider.
#[derive(Debug)]
pub enum ProviderResponse {
    /// OpenAI-style `choices[].message.content`.
    Chat(ChatCompletion),
    /// Anthropic `content[]` blocks.
    Messages(MessagesResponse),
    /// Gemini `candidates[].content.parts[]`.
    Generate(GenerateContentResponse),
}

impl ProviderResponse {
    /// Decode `body` with the shape `provider` returns.
    pub fn decode(provider: Provider, body: &Value) -> Option<Self> {
        let decoded = match provider {
            Provider::OpenAi | Provider::Custom => {
                serde_json::from_value(body.clone()).map(ProviderResponse::Chat)
            }
            Provider::Anthropic => {
                serde_json::from_value(body.clone()).map(ProviderResponse::Messages)
            }
            Provider::Gemini => {
                serde_json::from_value(body.clone()).map(ProviderResponse::Generate)
            }
        };
        decoded.ok()
    }

    /// Concatenated text fragments, or `None` if the shape carries no text.
    pub fn text(&self) -> Option<String> {
        let text = match self {
            ProviderResponse::Chat(c) => {
                let message = c.choices.first()?.message.as_ref()?;
                match message.content.as_ref()? {
                    ChatContent::Text(s) => s.clone(),
                    ChatContent::Parts(parts) => parts
                        .iter()
                        .filter_map(|p| match p {
                            ChatPart::Text(s) => Some(s.as_str()),
                            ChatPart::Fragment { text } => text.as_deref(),
                        })
                        .collect(),
                }
            }
            ProviderResponse::Messages(m) => m
                .content
                .iter()
                .filter_map(|b| match b {
                    AnthropicBlock::Text { text } => Some(text.as_str()),
                    AnthropicBlock::Other => None,
                })
                .collect(),
            ProviderResponse::Generate(g) => g
                .candidates
                .first()?
                .content
                .as_ref()?
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect(),
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<ChatContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatPart>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatPart {
    Text(String),
    Fragment {
        #[serde(default)]
        text: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

// =============================================================================
// HTTP gateway
// =============================================================================

/// Gateway that talks to providers over HTTPS.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
}

impl HttpGateway {
    /// Create a gateway with a fresh connection pool.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("embeddenator-council-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Create a gateway sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelGateway for HttpGateway {
    async fn call(&self, spec: &ModelSpec, prompt: &str, limits: &CallLimits) -> GatewayReply {
        let request = match build_request(spec, prompt, limits) {
            Ok(r) => r,
            Err(reply) => {
                warn!(participant = %spec.id, provider = %spec.provider, "{}", reply.text);
                return reply;
            }
        };

        let start = Instant::now();
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(limits.timeout)
            .json(&request.body);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => return transport_failure(spec, &e, limits.timeout),
        };
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return transport_failure(spec, &e, limits.timeout),
        };

        if status >= 400 || status == 0 {
            let code = if status == 0 {
                reply_codes::TRANSPORT
            } else {
                i32::from(status)
            };
            warn!(
                participant = %spec.id,
                provider = %spec.provider,
                model = %spec.model,
                code,
                "Provider returned an error status"
            );
            return GatewayReply::failure(code, body);
        }

        let parsed: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => {
                warn!(participant = %spec.id, error = %e, "Provider returned non-JSON body");
                return GatewayReply::failure(reply_codes::TRANSPORT, body);
            }
        };

        let text = ProviderResponse::decode(spec.provider, &parsed)
            .and_then(|r| r.text())
            .unwrap_or(body);

        debug!(
            participant = %spec.id,
            provider = %spec.provider,
            model = %spec.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Provider call succeeded"
        );
        GatewayReply::ok(text)
    }
}

fn transport_failure(spec: &ModelSpec, err: &reqwest::Error, timeout: Duration) -> GatewayReply {
    let text = if err.is_timeout() {
        format!("request timed out after {}s: {}", timeout.as_secs(), err)
    } else {
        format!("request failed: {}", err)
    };
    warn!(participant = %spec.id, provider = %spec.provider, "{}", text);
    GatewayReply::failure(reply_codes::TRANSPORT, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(provider: Provider) -> ModelSpec {
        ModelSpec {
            id: "m1".into(),
            provider,
            model: "test-model".into(),
            api_url: None,
            api_key: None,
            system_prompt: None,
        }
    }

    #[test]
    fn test_provider_serde_names() {
        let p: Provider = serde_json::from_value(json!("openai")).unwrap();
        assert_eq!(p, Provider::OpenAi);
        assert_eq!(Provider::Gemini.to_string(), "gemini");
        assert!(serde_json::from_value::<Provider>(json!("cohere")).is_err());
    }

    #[test]
    fn test_gemini_without_key_or_url_is_precondition_failure() {
        let err = build_request(&spec(Provider::Gemini), "hi", &CallLimits::default()).unwrap_err();
        assert_eq!(err.code, reply_codes::PRECONDITION);
    }

    #[test]
    fn test_gemini_key_goes_to_query_by_default() {
        let mut s = spec(Provider::Gemini);
        s.api_key = Some("g-key".into());
        let req = build_request(&s, "hi", &CallLimits::default()).unwrap();
        assert!(req.url.ends_with("/models/test-model:generateContent"));
        assert_eq!(req.query, vec![("key", "g-key".to_string())]);
        assert!(req.headers.is_empty());
        assert_eq!(req.body["generationConfig"]["maxOutputTokens"], json!(2048));
    }

    #[test]
    fn test_gemini_key_goes_to_header_with_explicit_url() {
        let mut s = spec(Provider::Gemini);
        s.api_key = Some("g-key".into());
        s.api_url = Some("http://localhost:9/gen".into());
        let req = build_request(&s, "hi", &CallLimits::default()).unwrap();
        assert_eq!(req.url, "http://localhost:9/gen");
        assert!(req.query.is_empty());
        assert_eq!(req.headers, vec![("x-goog-api-key", "g-key".to_string())]);
    }

    #[test]
    fn test_openai_and_anthropic_require_key() {
        for provider in [Provider::OpenAi, Provider::Anthropic] {
            let err = build_request(&spec(provider), "hi", &CallLimits::default()).unwrap_err();
            assert_eq!(err.code, reply_codes::PRECONDITION, "{}", provider);
        }
    }

    #[test]
    fn test_custom_requires_url_and_key_is_optional() {
        let err = build_request(&spec(Provider::Custom), "hi", &CallLimits::default()).unwrap_err();
        assert_eq!(err.code, reply_codes::PRECONDITION);

        let mut s = spec(Provider::Custom);
        s.api_url = Some("http://localhost:9/v1/chat/completions".into());
        let req = build_request(&s, "hi", &CallLimits::default()).unwrap();
        assert!(req.bearer.is_none());
        assert_eq!(req.body["messages"][1]["content"], json!("hi"));
    }

    #[test]
    fn test_anthropic_headers_and_system() {
        let mut s = spec(Provider::Anthropic);
        s.api_key = Some("a-key".into());
        s.system_prompt = Some("Be terse.".into());
        let req = build_request(&s, "hi", &CallLimits::default()).unwrap();
        assert!(req.headers.contains(&("x-api-key", "a-key".to_string())));
        assert!(req
            .headers
            .contains(&("anthropic-version", ANTHROPIC_VERSION.to_string())));
        assert_eq!(req.body["system"], json!("Be terse."));
    }

    #[test]
    fn test_extract_openai_string_and_fragments() {
        let body = json!({"choices": [{"message": {"content": "plain"}}]});
        let r = ProviderResponse::decode(Provider::OpenAi, &body).unwrap();
        assert_eq!(r.text().as_deref(), Some("plain"));

        let body = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "a"}, "b", {"type": "image_url"}
        ]}}]});
        let r = ProviderResponse::decode(Provider::Custom, &body).unwrap();
        assert_eq!(r.text().as_deref(), Some("ab"));
    }

    #[test]
    fn test_extract_anthropic_skips_non_text_blocks() {
        let body = json!({"content": [
            {"type": "thinking", "thinking": "..."},
            {"type": "text", "text": "one "},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "two"}
        ]});
        let r = ProviderResponse::decode(Provider::Anthropic, &body).unwrap();
        assert_eq!(r.text().as_deref(), Some("one two"));
    }

    #[test]
    fn test_extract_gemini_first_candidate_parts() {
        let body = json!({"candidates": [
            {"content": {"parts": [{"text": "x"}, {"text": "y"}]}},
            {"content": {"parts": [{"text": "ignored"}]}}
        ]});
        let r = ProviderResponse::decode(Provider::Gemini, &body).unwrap();
        assert_eq!(r.text().as_deref(), Some("xy"));
    }

    #[test]
    fn test_extract_none_when_no_text() {
        let body = json!({"choices": []});
        let r = ProviderResponse::decode(Provider::OpenAi, &body).unwrap();
        assert!(r.text().is_none());
    }

    #[tokio::test]
    async fn test_http_openai_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"content":"proposal text"}}]}"#)
            .create_async()
            .await;

        let mut s = spec(Provider::OpenAi);
        s.api_key = Some("sk-test".into());
        s.api_url = Some(format!("{}/v1/chat/completions", server.url()));

        let gateway = HttpGateway::new().unwrap();
        let reply = gateway.call(&s, "hi", &CallLimits::default()).await;
        assert_eq!(reply, GatewayReply::ok("proposal text"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_status_returns_raw_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/messages")
            .with_status(529)
            .with_body(r#"{"type":"error","error":{"type":"overloaded_error"}}"#)
            .create_async()
            .await;

        let mut s = spec(Provider::Anthropic);
        s.api_key = Some("a-key".into());
        s.api_url = Some(format!("{}/messages", server.url()));

        let reply = HttpGateway::new()
            .unwrap()
            .call(&s, "hi", &CallLimits::default())
            .await;
        assert_eq!(reply.code, 529);
        assert!(reply.text.contains("overloaded_error"));
    }

    #[tokio::test]
    async fn test_http_success_without_text_falls_back_to_raw_json() {
        let mut server = mockito::Server::new_async().await;
        let raw = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let _mock = server
            .mock("POST", "/gen")
            .with_status(200)
            .with_body(raw)
            .create_async()
            .await;

        let mut s = spec(Provider::Gemini);
        s.api_url = Some(format!("{}/gen", server.url()));

        let reply = HttpGateway::new()
            .unwrap()
            .call(&s, "hi", &CallLimits::default())
            .await;
        assert_eq!(reply, GatewayReply::ok(raw));
    }

    #[tokio::test]
    async fn test_missing_key_never_hits_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let mut s = spec(Provider::Anthropic);
        s.api_url = Some(format!("{}/messages", server.url()));

        let reply = HttpGateway::new()
            .unwrap()
            .call(&s, "hi", &CallLimits::default())
            .await;
        assert_eq!(reply.code, reply_codes::PRECONDITION);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        let mut s = spec(Provider::Custom);
        s.api_url = Some("http://127.0.0.1:1/v1/chat/completions".into());
        let limits = CallLimits {
            timeout: Duration::from_secs(5),
            ..CallLimits::default()
        };

        let reply = HttpGateway::new().unwrap().call(&s, "hi", &limits).await;
        assert_eq!(reply.code, reply_codes::TRANSPORT);
        assert!(reply.text.starts_with("request"));
    }
}
