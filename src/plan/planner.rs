//! Planner: one model call that turns a question into a [`Plan`]

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, info_span, Instrument};

use super::Plan;
use crate::error::EngineError;
use crate::llm::{track_usage, ChatMessage, ChatModel, ChatRequest, UsageLog};
use crate::metrics::LLM_CALL_DURATION;

pub const PLANNER_AGENT_NAME: &str = "Orchestrator agent";

pub struct Planner {
    model: Arc<dyn ChatModel>,
    model_name: String,
    system_prompt: String,
    usage_log: Option<Arc<UsageLog>>,
}

impl Planner {
    pub fn new(
        model: Arc<dyn ChatModel>,
        model_name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            system_prompt: system_prompt.into(),
            usage_log: None,
        }
    }

    pub fn with_usage_log(mut self, usage_log: Option<Arc<UsageLog>>) -> Self {
        self.usage_log = usage_log;
        self
    }

    /// Ask the model for a plan answering `question` over the described data
    ///
    /// The reply must be the plan document itself; it is not repaired.
    pub async fn plan(&self, question: &str, metadata: &str) -> Result<Plan, EngineError> {
        let payload = format!("{}\n\nMETADATA: \n {} \n", question, metadata);
        let request = ChatRequest::new(
            &self.model_name,
            vec![
                ChatMessage::system(&self.system_prompt),
                ChatMessage::user(payload),
            ],
        );

        let span = info_span!("llm_call", agent = PLANNER_AGENT_NAME, model = %self.model_name, otel.name = "llm_call");
        let start = Instant::now();
        let response = self.model.chat(request).instrument(span).await?;
        LLM_CALL_DURATION
            .with_label_values(&[&self.model_name])
            .observe(start.elapsed().as_secs_f64());
        track_usage(
            self.usage_log.as_deref(),
            PLANNER_AGENT_NAME,
            &self.model_name,
            response.usage.as_ref(),
        )
        .await;

        debug!(raw = %response.message.content, "Planner reply");
        let plan = Plan::from_json(&response.message.content)?;
        info!(
            steps = plan.steps.len(),
            requires_clarification = plan.requires_clarification,
            "Plan received"
        );
        Ok(plan)
    }
}
