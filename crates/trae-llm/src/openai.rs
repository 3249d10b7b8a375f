//! OpenAI-compatible chat completions gateway
//!
//! Covers the providers that speak the `/chat/completions` shape: OpenAI,
//! Doubao (Volcano Ark), OpenRouter and Ollama's compatibility endpoint.
//! Non-streaming only.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::decode::{declared_parameters, decode_arguments};
use crate::error::{LlmError, ModelError, ModelErrorKind};
use crate::gateway::{ModelGateway, ModelSettings};
use crate::message::{Message, Role, ToolCall, ToolDefinition};

/// Default base URL per provider
pub fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "doubao" => "https://ark.cn-beijing.volces.com/api/v3",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        _ => "https://api.openai.com/v1",
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop: &'a [String],
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

/// Append `api_version` as a path segment unless the URL already ends in it
fn with_api_version(base_url: &str, api_version: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');
    match api_version.map(|v| v.trim_matches('/')).filter(|v| !v.is_empty()) {
        Some(version) if !base.ends_with(&format!("/{version}")) => format!("{base}/{version}"),
        _ => base.to_string(),
    }
}

/// HTTP gateway for OpenAI-compatible providers
#[derive(Debug, Clone)]
pub struct OpenAiGateway {
    provider: String,
    base_url: String,
    supports_tools: bool,
    client: reqwest::Client,
}

impl OpenAiGateway {
    /// Create a gateway for the provider and endpoint in `settings`
    pub fn new(settings: &dyn ModelSettings) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ModelError::new(ModelErrorKind::Unknown, format!("failed to create HTTP client: {e}")))?;

        let base_url = with_api_version(
            settings
                .base_url()
                .unwrap_or_else(|| default_base_url(settings.provider())),
            settings.api_version(),
        );

        Ok(Self {
            provider: settings.provider().to_string(),
            base_url,
            supports_tools: settings.supports_tool_calling(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request<'a>(
        &self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
        settings: &'a dyn ModelSettings,
    ) -> ChatRequest<'a> {
        // Doubao rejects empty message content
        let pad_empty = self.provider == "doubao";
        let tools = if self.supports_tools { tools } else { &[] };

        let messages = messages
            .iter()
            .map(|m| WireMessage {
                role: m.role,
                content: if pad_empty && m.content.is_empty() { " " } else { m.content.as_str() },
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        call_type: c.call_type.clone(),
                        function: WireFunction {
                            name: c.function.name.clone(),
                            arguments: c.arguments().to_string(),
                        },
                    })
                    .collect(),
                tool_call_id: m.tool_call_id.as_deref(),
            })
            .collect();

        ChatRequest {
            model: settings.model(),
            messages,
            tools,
            parallel_tool_calls: (!tools.is_empty()).then(|| settings.parallel_tool_calls()),
            max_tokens: settings.max_tokens(),
            temperature: settings.temperature(),
            top_p: settings.top_p(),
            stop: settings.stop_sequences(),
        }
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        settings: &dyn ModelSettings,
    ) -> Result<Message, LlmError> {
        let request = self.build_request(messages, tools, settings);

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if !settings.api_key().is_empty() {
            builder = builder.bearer_auth(settings.api_key());
        }

        let resp = builder.send().await.map_err(transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body).into());
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            ModelError::new(ModelErrorKind::Unknown, format!("failed to parse {} response: {e}", self.provider))
        })?;

        into_message(parsed, tools).map_err(LlmError::from)
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn supports_tool_calling(&self) -> bool {
        self.supports_tools
    }

    #[instrument(skip_all, fields(provider = %self.provider, model = %settings.model(), messages = messages.len()))]
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        settings: &dyn ModelSettings,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError> {
        debug!(url = %self.endpoint(), tools = tools.len(), "Sending chat completion");
        tokio::select! {
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = self.send(messages, tools, settings) => result,
        }
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    let kind = if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        ModelErrorKind::TransientNetwork
    } else {
        ModelErrorKind::Unknown
    };
    let mut err = ModelError::new(kind, e.to_string());
    if let Some(status) = e.status() {
        err = err.with_status(status.as_u16());
    }
    err.into()
}

/// Categorise a non-2xx response from its status and error body
fn classify_failure(status: u16, body: &str) -> ModelError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();

    let kind_from_body = envelope.as_ref().and_then(|env| {
        let code = env.error.code.as_ref().and_then(Value::as_str);
        match (env.error.kind.as_deref(), code) {
            (_, Some("insufficient_quota")) | (Some("insufficient_quota"), _) => Some(ModelErrorKind::QuotaExceeded),
            (Some("authentication_error"), _) | (_, Some("invalid_api_key")) => Some(ModelErrorKind::Authentication),
            (Some("permission_error"), _) => Some(ModelErrorKind::Permission),
            (Some("invalid_request_error"), _) if status == 400 => Some(ModelErrorKind::InvalidRequest),
            _ => None,
        }
    });

    let message = match envelope {
        Some(env) if !env.error.message.is_empty() => env.error.message,
        _ if body.trim().is_empty() => format!("HTTP {status}"),
        _ => body.chars().take(500).collect(),
    };

    ModelError::new(kind_from_body.unwrap_or_else(|| ModelErrorKind::from_status(status)), message).with_status(status)
}

/// Convert the first choice into a message with decoded tool calls
fn into_message(response: ChatResponse, tools: &[ToolDefinition]) -> Result<Message, ModelError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::new(ModelErrorKind::Unknown, "no choices in response"))?;

    let mut seen = HashSet::new();
    let mut recovered = false;
    let mut calls = Vec::with_capacity(choice.message.tool_calls.len());

    for wire in choice.message.tool_calls {
        let allowed = declared_parameters(tools, &wire.function.name);
        let decoded = decode_arguments(&wire.function.arguments, &allowed);
        recovered |= decoded.recovered;

        let id = if wire.id.is_empty() || seen.contains(&wire.id) {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            wire.id
        };
        seen.insert(id.clone());

        calls.push(ToolCall::new(id, wire.function.name, decoded.arguments));
    }

    let mut message = Message::assistant_with_tools(choice.message.content.unwrap_or_default(), calls);
    if recovered {
        message = message.with_metadata("argument_recovery", json!(true));
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    fn gateway(provider: &str) -> OpenAiGateway {
        let settings = ModelConfig {
            provider: provider.to_string(),
            ..Default::default()
        };
        OpenAiGateway::new(&settings).unwrap()
    }

    #[test]
    fn test_default_base_url() {
        assert_eq!(gateway("openai").base_url(), "https://api.openai.com/v1");
        assert_eq!(gateway("doubao").endpoint(), "https://ark.cn-beijing.volces.com/api/v3/chat/completions");
    }

    #[test]
    fn test_api_version_in_endpoint() {
        let settings = ModelConfig {
            base_url: Some("https://api.openai.com".into()),
            api_version: Some("v1".into()),
            ..ModelConfig::default()
        };
        let gw = OpenAiGateway::new(&settings).unwrap();
        assert_eq!(gw.endpoint(), "https://api.openai.com/v1/chat/completions");

        // Already versioned URLs are left alone
        let settings = ModelConfig {
            base_url: Some("https://api.openai.com/v1/".into()),
            api_version: Some("v1".into()),
            ..ModelConfig::default()
        };
        let gw = OpenAiGateway::new(&settings).unwrap();
        assert_eq!(gw.endpoint(), "https://api.openai.com/v1/chat/completions");

        let settings = ModelConfig {
            api_version: Some("v1".into()),
            ..ModelConfig::default()
        };
        let gw = OpenAiGateway::new(&settings).unwrap();
        assert_eq!(gw.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_request_shape() {
        let gw = gateway("doubao");
        let settings = ModelConfig::default();
        let call = ToolCall::from_value("c1", "bash", json!({"command": "ls"}));
        let messages = vec![
            Message::user("hi"),
            Message::assistant_with_tools("", vec![call]),
            Message::tool("c1", "bash", "out"),
        ];
        let tools = vec![ToolDefinition::new("bash", "run", json!({"type": "object"}))];

        let value = serde_json::to_value(gw.build_request(&messages, &tools, &settings)).unwrap();
        assert_eq!(value["model"], "gpt-4o");
        assert_eq!(value["messages"][1]["content"], " ");
        assert_eq!(value["messages"][1]["tool_calls"][0]["function"]["arguments"], r#"{"command":"ls"}"#);
        assert_eq!(value["messages"][2]["tool_call_id"], "c1");
        assert_eq!(value["tools"][0]["function"]["name"], "bash");
        assert_eq!(value["parallel_tool_calls"], false);
    }

    #[test]
    fn test_classify_failure() {
        let err = classify_failure(429, r#"{"error": {"message": "You exceeded your current quota", "type": "insufficient_quota"}}"#);
        assert_eq!(err.kind, ModelErrorKind::QuotaExceeded);
        assert_eq!(err.status, Some(429));

        let err = classify_failure(429, r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#);
        assert_eq!(err.kind, ModelErrorKind::RateLimited);

        let err = classify_failure(401, "");
        assert_eq!(err.kind, ModelErrorKind::Authentication);
        assert_eq!(err.message, "HTTP 401");

        let err = classify_failure(502, "<html>bad gateway</html>");
        assert_eq!(err.kind, ModelErrorKind::TransientNetwork);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_into_message_assigns_unique_ids_and_flags_recovery() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "bash", "arguments": "{\"command\": \"ls\"}"}},
                        {"id": "a", "type": "function", "function": {"name": "bash", "arguments": "{\"command\": \"pwd\" oops"}},
                        {"function": {"name": "bash", "arguments": ""}}
                    ]
                }
            }]
        }))
        .unwrap();
        let tools = vec![ToolDefinition::new(
            "bash",
            "run",
            json!({"type": "object", "properties": {"command": {"type": "string"}}}),
        )];

        let msg = into_message(response, &tools).unwrap();
        assert_eq!(msg.content, "");
        assert_eq!(msg.tool_calls.len(), 3);
        let ids: HashSet<_> = msg.tool_calls.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(msg.tool_calls[1].function.arguments["command"], json!("pwd"));
        assert_eq!(msg.metadata.get("argument_recovery"), Some(&json!(true)));
    }

    #[test]
    fn test_into_message_without_choices() {
        let err = into_message(ChatResponse { choices: vec![] }, &[]).unwrap_err();
        assert!(err.message.contains("no choices"));
    }
}
