//! Reqwest-based client for OpenAI-compatible Chat Completions.
//!
//! Non-streaming: every agent turn needs the complete message (including all
//! tool calls) before it can act.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::tool_use::{ChatError, ChatMessage, ChatModel, ChatRequest, ChatResponse, ToolCall, Usage};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        let tool_calls = msg.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(i, tc)| WireToolCall {
                    id: tc.id.clone().unwrap_or_else(|| format!("call_{}", i)),
                    r#type: function_type(),
                    function: WireFunctionCall {
                        name: tc.function.name.clone(),
                        arguments: arguments_to_wire(&tc.function.arguments),
                    },
                })
                .collect()
        });
        // Assistant turns that only carry tool calls go out with null content
        let content = if msg.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(msg.content.clone())
        };
        Self {
            role: msg.role.clone(),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        }
    }
}

fn arguments_to_wire(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Arguments arrive as a JSON-encoded string; undecodable text is kept as a
/// string value so the agent can report it back to the model.
fn arguments_from_wire(raw: String) -> serde_json::Value {
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
}

/// Client for `/chat/completions`
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Create a client for `base_url` (with or without the trailing `/v1`)
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(&base_url.into()),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let messages: Vec<WireMessage> = request.messages.iter().map(WireMessage::from).collect();
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(tools) = &request.tools {
            body["tools"] = serde_json::to_value(tools)?;
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_completion_tokens"] = serde_json::json!(max_tokens);
        }

        let resp = self.http.post(url).headers(headers).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ChatError::Status {
                code: status.as_u16(),
                body: text,
            });
        }

        let completion: Completion = serde_json::from_str(&text)?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or(ChatError::EmptyResponse)?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                ToolCall::new(
                    Some(tc.id),
                    tc.function.name,
                    arguments_from_wire(tc.function.arguments),
                )
            })
            .collect();

        let content = choice.message.content.unwrap_or_default();
        let message = if tool_calls.is_empty() {
            ChatMessage::assistant(content)
        } else {
            ChatMessage::assistant_with_tool_calls(content, tool_calls)
        };

        Ok(ChatResponse {
            message,
            usage: completion.usage,
        })
    }
}
