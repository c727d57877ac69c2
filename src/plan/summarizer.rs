//! Summarizer: reduces the analysis findings to the final narrative

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Serialize, Serializer};
use tracing::{info_span, Instrument};

use super::StepId;
use crate::llm::{track_usage, ChatError, ChatMessage, ChatModel, ChatRequest, UsageLog};
use crate::metrics::LLM_CALL_DURATION;

pub const SUMMARIZER_AGENT_NAME: &str = "Summarize agent";

/// Findings as `{"ds_step_<id>": answer}`, in step id order
struct ReportDocument<'a>(&'a BTreeMap<StepId, String>);

impl Serialize for ReportDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.0
                .iter()
                .map(|(id, answer)| (format!("ds_step_{}", id), answer)),
        )
    }
}

/// Pretty-printed findings document handed to the summarizer model
pub fn render_report(findings: &BTreeMap<StepId, String>) -> String {
    serde_json::to_string_pretty(&ReportDocument(findings)).unwrap_or_else(|_| "{}".to_string())
}

pub struct Summarizer {
    model: Arc<dyn ChatModel>,
    model_name: String,
    system_prompt: String,
    max_tokens: u32,
    usage_log: Option<Arc<UsageLog>>,
}

impl Summarizer {
    pub fn new(
        model: Arc<dyn ChatModel>,
        model_name: impl Into<String>,
        system_prompt: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            system_prompt: system_prompt.into(),
            max_tokens,
            usage_log: None,
        }
    }

    pub fn with_usage_log(mut self, usage_log: Option<Arc<UsageLog>>) -> Self {
        self.usage_log = usage_log;
        self
    }

    pub async fn summarize(
        &self,
        findings: &BTreeMap<StepId, String>,
        question: &str,
        metadata: Option<&str>,
    ) -> Result<String, ChatError> {
        let mut content = format!(
            "{}\n\nData Scientist Report(ds_report_dict):\n{}\n\n",
            question,
            render_report(findings)
        );
        if let Some(metadata) = metadata.filter(|m| !m.is_empty()) {
            content.push_str(&format!("Additional METADATA:\n{}\n", metadata));
        }

        let request = ChatRequest::new(
            &self.model_name,
            vec![
                ChatMessage::system(&self.system_prompt),
                ChatMessage::user(content),
            ],
        )
        .with_max_tokens(self.max_tokens);

        let span = info_span!("llm_call", agent = SUMMARIZER_AGENT_NAME, model = %self.model_name, otel.name = "llm_call");
        let start = Instant::now();
        let response = self.model.chat(request).instrument(span).await?;
        LLM_CALL_DURATION
            .with_label_values(&[&self.model_name])
            .observe(start.elapsed().as_secs_f64());
        track_usage(
            self.usage_log.as_deref(),
            SUMMARIZER_AGENT_NAME,
            &self.model_name,
            response.usage.as_ref(),
        )
        .await;

        Ok(response.message.content.trim().to_string())
    }
}
