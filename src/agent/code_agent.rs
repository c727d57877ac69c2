//! Code agent (DA): turns one subtask into a result table
//!
//! Every invocation gets a private namespace that is dropped when the run
//! ends, so nothing leaks between steps.

use tracing::info;

use super::controller::{AgentError, AgentLoop, Termination, ToolCallRecord};
use crate::llm::ChatMessage;
use crate::sandbox::{Artifact, Namespace, Table};

pub const CODE_AGENT_NAME: &str = "DA agent";

const NO_TOOL_CALL_ERROR: &str = "Model did not call any tool; no code was executed.";

/// Output of a code agent run
#[derive(Debug, Clone)]
pub struct CodeAgentOutput {
    pub table: Option<Table>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub stdout: String,
    pub error: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl CodeAgentOutput {
    /// The output as an artifact; empty when no table was produced
    pub fn artifact(&self) -> Artifact {
        Artifact {
            table: self.table.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

pub struct CodeAgent {
    agent: AgentLoop,
    system_prompt: String,
}

impl CodeAgent {
    pub fn new(agent: AgentLoop, system_prompt: impl Into<String>) -> Self {
        Self {
            agent,
            system_prompt: system_prompt.into(),
        }
    }

    /// Run the subtask `prompt` with the dataset description `metadata`
    pub async fn run(&self, prompt: &str, metadata: &str) -> Result<CodeAgentOutput, AgentError> {
        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::system(metadata),
            ChatMessage::user(prompt),
        ];

        let mut namespace = Namespace::new();
        let result = self.agent.run(messages, &mut namespace).await?;

        let output = match result.termination {
            Termination::Answer(text) => CodeAgentOutput {
                table: None,
                metadata: serde_json::Map::new(),
                stdout: text,
                error: Some(NO_TOOL_CALL_ERROR.to_string()),
                tool_calls: result.tool_calls,
            },
            Termination::Artifact => {
                let artifact = result.artifact.unwrap_or_default();
                CodeAgentOutput {
                    table: artifact.table,
                    metadata: artifact.metadata,
                    stdout: result
                        .last_outcome
                        .map(|o| o.stdout)
                        .unwrap_or_default(),
                    error: None,
                    tool_calls: result.tool_calls,
                }
            }
            Termination::BudgetExhausted => CodeAgentOutput {
                table: None,
                metadata: serde_json::Map::new(),
                stdout: result.last_stdout,
                error: Some(result.last_error.unwrap_or_else(|| {
                    format!(
                        "Reached maximum steps ({}) without producing result_df.",
                        self.agent.config().max_steps
                    )
                })),
                tool_calls: result.tool_calls,
            },
        };

        info!(
            has_table = output.table.is_some(),
            error = output.error.as_deref().unwrap_or(""),
            "Code agent finished"
        );
        Ok(output)
    }
}
