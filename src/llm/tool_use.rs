//! Chat API types with tool calling support
//!
//! Provider-neutral message, tool and response types shared by every
//! [`ChatModel`] implementation, plus the client for Ollama's `/api/chat`
//! endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    /// Assistant turn that requested tool invocations
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role("assistant", content)
        }
    }

    /// Result of a tool invocation, linked to the call that requested it
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::with_role("tool", content)
        }
    }

    /// Tool calls carried by this message, empty when there are none
    pub fn requested_tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

/// A tool call from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id; Ollama does not send one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: Option<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id,
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition for the model
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

/// Function specification for a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One request to a chat model
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Option<Vec<Tool>>,
    /// Upper bound on generated tokens, provider default when `None`
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Provider-neutral reply
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub usage: Option<Usage>,
}

/// Error type for chat operations
#[derive(Debug)]
pub enum ChatError {
    Request(reqwest::Error),
    Parse(serde_json::Error),
    Status { code: u16, body: String },
    EmptyResponse,
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::Request(e) => write!(f, "Request error: {}", e),
            ChatError::Parse(e) => write!(f, "Parse error: {}", e),
            ChatError::Status { code, body } => write!(f, "HTTP {}: {}", code, body),
            ChatError::EmptyResponse => write!(f, "Empty response from model"),
        }
    }
}

impl std::error::Error for ChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChatError::Request(e) => Some(e),
            ChatError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Request(e)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Parse(e)
    }
}

/// A language model reachable through a chat endpoint
///
/// Agents, the planner and the summarizer receive an instance of this trait
/// at construction time; nothing in the crate reaches for a process-wide
/// client.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError>;
}

/// Response from Ollama's /api/chat
#[derive(Debug, Clone, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

/// Client for Ollama's /api/chat endpoint with tool support
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let tools_offered = request.tools.is_some();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": 0.0
            }
        });

        if let Some(max_tokens) = request.max_tokens {
            body["options"]["num_predict"] = serde_json::json!(max_tokens);
        }
        if let Some(t) = request.tools {
            body["tools"] = serde_json::to_value(t)?;
        }

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ChatError::Status {
                code: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        let parsed: OllamaChatResponse = serde_json::from_str(&text)?;
        let mut message = parsed.message;

        // Smaller local models often print the call as JSON instead of using
        // the native tool_calls field.
        if tools_offered && message.requested_tool_calls().is_empty() {
            let recovered = recover_tool_calls(&message.content);
            if !recovered.is_empty() {
                message.tool_calls = Some(recovered);
            }
        }

        Ok(ChatResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
                total_tokens: parsed.prompt_eval_count + parsed.eval_count,
            }),
        })
    }
}

/// Recover tool calls that a model wrote into its reply text
///
/// Accepts either a reply that is one call document, or prose with call
/// documents embedded as balanced `{...}` blocks.
pub fn recover_tool_calls(text: &str) -> Vec<ToolCall> {
    let text = text.trim();
    if let Some(call) = call_from_json(text) {
        return vec![call];
    }

    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut open_at = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    open_at = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    calls.extend(call_from_json(&text[open_at..=i]));
                }
            }
            _ => {}
        }
    }
    calls
}

fn call_from_json(candidate: &str) -> Option<ToolCall> {
    let value = serde_json::from_str::<serde_json::Value>(candidate)
        .ok()
        .or_else(|| {
            // Unescaped quotes inside the code field are the usual culprit
            let repaired = escape_code_quotes(candidate)?;
            serde_json::from_str(&repaired).ok()
        })?;
    call_from_value(&value)
}

/// Escape stray double quotes inside a `"code": "..."` field
fn escape_code_quotes(candidate: &str) -> Option<String> {
    const FIELD: &str = "\"code\": \"";
    let body_start = candidate.find(FIELD)? + FIELD.len();
    let body_len = candidate[body_start..].rfind("\"}}")?;
    let (head, rest) = candidate.split_at(body_start);
    let (body, tail) = rest.split_at(body_len);

    let body = body
        .replace("\\\"", "\u{FFFF}")
        .replace('"', "\\\"")
        .replace('\u{FFFF}', "\\\"");
    Some(format!("{}{}{}", head, body, tail))
}

fn call_from_value(value: &serde_json::Value) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?;
    let arguments = match (value.get("arguments"), value.get("parameters")) {
        (Some(args), _) => args.clone(),
        // Schema mixed with values: {"parameters": {"code": {"value": "..."}}}
        (None, Some(params)) => match params.get("code") {
            Some(code) if code.is_object() => {
                let code = code.get("value").and_then(|v| v.as_str()).unwrap_or_default();
                serde_json::json!({ "code": code })
            }
            _ => params.clone(),
        },
        (None, None) => return None,
    };
    Some(ToolCall::new(None, name, arguments))
}
