//! Agent module for LLM-driven code execution
//!
//! This module provides the bounded tool-calling loop and the two agents
//! built on it:
//! - the code agent (DA), which builds a result table in a private namespace
//! - the analysis agent (DS), which answers questions over tables it is given
//!
//! # Architecture
//!
//! ```text
//! Subtask → AgentLoop → ChatModel (with execute_python_code)
//!                ↓
//!         Tool Call: execute_python_code
//!                ↓
//!         Sandbox::execute(namespace, code)
//!                ↓
//!         Outcome fed back as a tool message
//!                ↓
//!         result_df present? → Artifact
//!         no tool call?      → Answer
//!         max_steps reached? → BudgetExhausted
//! ```

pub mod analysis_agent;
pub mod code_agent;
pub mod controller;
pub mod prompts;

pub use analysis_agent::{AnalysisAgent, AnalysisOutput, ANALYSIS_AGENT_NAME};
pub use code_agent::{CodeAgent, CodeAgentOutput, CODE_AGENT_NAME};
pub use controller::{
    execute_python_code_tool, AgentError, AgentLoop, ExecuteArgs, LoopConfig, LoopResult,
    Termination, ToolCallRecord, EXECUTE_PYTHON_CODE,
};
pub use prompts::{build_focus, describe_namespace, TableMetadata};
