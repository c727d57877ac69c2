//! Analysis agent (DS): answers a question over tables it is handed
//!
//! The caller builds and owns the namespace; the agent only borrows it for
//! the duration of the run.

use tracing::info;

use super::controller::{AgentError, AgentLoop, Termination, ToolCallRecord};
use super::prompts::{describe_namespace, TableMetadata};
use crate::llm::ChatMessage;
use crate::sandbox::{Artifact, ExecutionOutcome, Figure, Namespace};

pub const ANALYSIS_AGENT_NAME: &str = "DS agent";

pub const BUDGET_EXHAUSTED_ANSWER: &str =
    "The agent reached the maximum number of steps without producing a final answer.";

/// Output of an analysis agent run
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub answer: String,
    pub artifact: Option<Artifact>,
    /// Every figure produced during the run, oldest first
    pub figures: Vec<Figure>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub last_tool_output: Option<ExecutionOutcome>,
    pub budget_exhausted: bool,
}

pub struct AnalysisAgent {
    agent: AgentLoop,
    system_prompt: String,
}

impl AnalysisAgent {
    pub fn new(agent: AgentLoop, system_prompt: impl Into<String>) -> Self {
        Self {
            agent,
            system_prompt: system_prompt.into(),
        }
    }

    /// Answer `prompt` over the tables in `namespace`
    ///
    /// `table_metadata` is shown next to the matching tables; `metadata` is
    /// optional long-form dataset documentation.
    pub async fn run(
        &self,
        prompt: &str,
        namespace: &mut Namespace,
        table_metadata: &TableMetadata,
        metadata: Option<&str>,
    ) -> Result<AnalysisOutput, AgentError> {
        let mut user_content = format!(
            "USER QUESTION:\n{}\n\nAVAILABLE OBJECTS IN env:\n{}\n\n",
            prompt,
            describe_namespace(namespace, table_metadata)
        );
        if let Some(metadata) = metadata.filter(|m| !m.is_empty()) {
            user_content.push_str(&format!("ADDITIONAL LONG-FORM METADATA:\n{}\n", metadata));
        }

        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user(user_content),
        ];

        let result = self.agent.run(messages, namespace).await?;

        let (answer, artifact, budget_exhausted) = match result.termination {
            Termination::Answer(text) => (text, namespace.artifact(), false),
            Termination::Artifact => {
                let answer = if result.last_message.trim().is_empty() {
                    result.last_stdout.clone()
                } else {
                    result.last_message.clone()
                };
                (answer, result.artifact, false)
            }
            Termination::BudgetExhausted => (BUDGET_EXHAUSTED_ANSWER.to_string(), None, true),
        };

        info!(
            iterations = result.iterations,
            figures = result.figures.len(),
            has_artifact = artifact.is_some(),
            "Analysis agent finished"
        );

        Ok(AnalysisOutput {
            answer,
            artifact,
            figures: result.figures,
            tool_calls: result.tool_calls,
            last_tool_output: result.last_outcome,
            budget_exhausted,
        })
    }
}
