//! Engine: wires configuration, clients, sandbox and agents together
//!
//! ```text
//! EngineConfig ─▶ ChatModel ─┬─▶ Planner
//!                            ├─▶ CodeAgent ─────┐
//!                            ├─▶ AnalysisAgent ─┼─▶ PlanExecutor
//!                            └─▶ Summarizer ────┘
//! PythonInterpreter ─▶ Sandbox ─▶ (both agents)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::agent::{
    build_focus, AgentLoop, AnalysisAgent, CodeAgent, LoopConfig, ANALYSIS_AGENT_NAME,
    CODE_AGENT_NAME,
};
use crate::config::{EngineConfig, Provider};
use crate::error::EngineError;
use crate::llm::{ChatModel, OllamaClient, OpenAiClient, UsageLog};
use crate::plan::{ExecutorConfig, PlanExecutor, PlanOutcome, Planner, Summarizer};
use crate::sandbox::{Interpreter, PythonInterpreter, Sandbox};

/// Build the chat client selected by `config`
pub fn build_chat_model(config: &EngineConfig) -> Result<Arc<dyn ChatModel>, EngineError> {
    let base_url = config.effective_base_url().to_string();
    let model: Arc<dyn ChatModel> = match config.provider {
        Provider::OpenAi => Arc::new(OpenAiClient::new(
            base_url,
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?),
        Provider::Ollama => Arc::new(OllamaClient::new(base_url)),
    };
    Ok(model)
}

/// Question-to-report pipeline
pub struct Engine {
    planner: Planner,
    executor: PlanExecutor,
}

impl Engine {
    /// Engine talking to the configured provider and running real Python
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let model = build_chat_model(config)?;
        let interpreter: Arc<dyn Interpreter> = Arc::new(PythonInterpreter::new(&config.python));
        info!(
            provider = ?config.provider,
            base_url = config.effective_base_url(),
            agent_model = %config.agent_model,
            planner_model = %config.planner_model,
            "Engine configured"
        );
        Ok(Self::with_components(config, model, interpreter))
    }

    /// Engine built around an explicit model client and interpreter
    pub fn with_components(
        config: &EngineConfig,
        model: Arc<dyn ChatModel>,
        interpreter: Arc<dyn Interpreter>,
    ) -> Self {
        let usage_log = config
            .usage_log
            .as_ref()
            .map(|path| Arc::new(UsageLog::new(path)));
        let sandbox = Sandbox::new(interpreter);

        let code_loop = AgentLoop::new(
            model.clone(),
            sandbox.clone(),
            LoopConfig {
                agent_name: CODE_AGENT_NAME.to_string(),
                model: config.agent_model.clone(),
                max_steps: config.code_agent_steps,
                max_tokens: None,
            },
        )
        .with_usage_log(usage_log.clone());

        let analysis_loop = AgentLoop::new(
            model.clone(),
            sandbox,
            LoopConfig {
                agent_name: ANALYSIS_AGENT_NAME.to_string(),
                model: config.agent_model.clone(),
                max_steps: config.analysis_agent_steps,
                max_tokens: None,
            },
        )
        .with_usage_log(usage_log.clone());

        let planner = Planner::new(model.clone(), &config.planner_model, &config.prompts.planner)
            .with_usage_log(usage_log.clone());
        let summarizer = Summarizer::new(
            model,
            &config.planner_model,
            &config.prompts.summarizer,
            config.output_token_limit,
        )
        .with_usage_log(usage_log);

        let executor = PlanExecutor::new(
            CodeAgent::new(code_loop, &config.prompts.code_agent),
            AnalysisAgent::new(analysis_loop, &config.prompts.analysis_agent),
            summarizer,
            ExecutorConfig {
                max_plan_steps: config.max_plan_steps,
                dependency_policy: config.dependency_policy,
            },
        );

        Self { planner, executor }
    }

    /// Answer `question`, optionally steered by a `focus` instruction
    pub async fn ask(
        &self,
        question: &str,
        focus: Option<&str>,
        metadata: &str,
    ) -> Result<PlanOutcome, EngineError> {
        let prompt = build_focus(question, focus);
        let plan = self.planner.plan(&prompt, metadata).await?;
        self.executor.execute(&plan, &prompt, metadata).await
    }
}
