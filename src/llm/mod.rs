//! Language model integration
//!
//! This module provides the [`ChatModel`] seam used by every agent, with
//! clients for Ollama's `/api/chat` and OpenAI-compatible
//! `/chat/completions`, plus the token usage log.

pub mod openai;
pub mod tool_use;
pub mod usage;

pub use openai::{OpenAiClient, DEFAULT_OPENAI_BASE_URL};
pub use tool_use::{
    recover_tool_calls, ChatError, ChatMessage, ChatModel, ChatRequest, ChatResponse,
    FunctionCall, OllamaClient, Tool, ToolCall, ToolFunction, Usage,
};
pub use usage::{track_usage, UsageLog};
