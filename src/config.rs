//! Engine configuration
//!
//! Everything the engine needs is an explicit field here; nothing reads the
//! environment after [`EngineConfig::from_env`] returns.

use std::path::PathBuf;
use std::str::FromStr;

use crate::agent::prompts::{
    DEFAULT_ANALYSIS_AGENT_PROMPT, DEFAULT_CODE_AGENT_PROMPT, DEFAULT_PLANNER_PROMPT,
    DEFAULT_SUMMARIZER_PROMPT,
};
use crate::error::EngineError;
use crate::llm::DEFAULT_OPENAI_BASE_URL;
use crate::plan::DependencyPolicy;
use crate::sandbox::python::DEFAULT_PYTHON;

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Which chat API the engine talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    OpenAi,
    Ollama,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => DEFAULT_OPENAI_BASE_URL,
            Provider::Ollama => DEFAULT_OLLAMA_BASE_URL,
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "ollama" => Ok(Provider::Ollama),
            other => Err(format!("unknown provider '{}' (expected openai or ollama)", other)),
        }
    }
}

/// System prompts for every model-facing component
#[derive(Debug, Clone)]
pub struct Prompts {
    pub code_agent: String,
    pub analysis_agent: String,
    pub planner: String,
    pub summarizer: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            code_agent: DEFAULT_CODE_AGENT_PROMPT.to_string(),
            analysis_agent: DEFAULT_ANALYSIS_AGENT_PROMPT.to_string(),
            planner: DEFAULT_PLANNER_PROMPT.to_string(),
            summarizer: DEFAULT_SUMMARIZER_PROMPT.to_string(),
        }
    }
}

/// Configuration for the analysis engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub provider: Provider,
    /// API base URL; the provider default when `None`
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Model used by the code and analysis agents
    pub agent_model: String,
    /// Model used by the planner and the summarizer
    pub planner_model: String,
    /// Output token cap for the summarizer
    pub output_token_limit: u32,
    /// Plans with this many steps or more are rejected
    pub max_plan_steps: usize,
    /// Iteration budget of the code agent
    pub code_agent_steps: usize,
    /// Iteration budget of the analysis agent
    pub analysis_agent_steps: usize,
    pub dependency_policy: DependencyPolicy,
    /// CSV token usage log; disabled when `None`
    pub usage_log: Option<PathBuf>,
    /// Python executable for the sandbox
    pub python: String,
    /// HTTP timeout for model calls in seconds
    pub request_timeout_secs: u64,
    pub otlp_endpoint: Option<String>,
    pub prompts: Prompts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            base_url: None,
            api_key: None,
            agent_model: "gpt-4.1-mini".to_string(),
            planner_model: "gpt-4.1".to_string(),
            output_token_limit: 2000,
            max_plan_steps: 100,
            code_agent_steps: 3,
            analysis_agent_steps: 5,
            dependency_policy: DependencyPolicy::BestEffort,
            usage_log: Some(PathBuf::from("logs/token_usage.csv")),
            python: DEFAULT_PYTHON.to_string(),
            request_timeout_secs: 300,
            otlp_endpoint: None,
            prompts: Prompts::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `DATAPLAN_*` variables and `OPENAI_API_KEY`
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("DATAPLAN_PROVIDER") {
            config.provider = v.parse().map_err(EngineError::Config)?;
        }
        if let Some(v) = get("DATAPLAN_BASE_URL") {
            config.base_url = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            config.api_key = Some(v);
        }
        if let Some(v) = get("DATAPLAN_AGENT_MODEL") {
            config.agent_model = v;
        }
        if let Some(v) = get("DATAPLAN_PLANNER_MODEL") {
            config.planner_model = v;
        }
        if let Some(v) = get("DATAPLAN_OUTPUT_TOKEN_LIMIT") {
            config.output_token_limit = parse_number("DATAPLAN_OUTPUT_TOKEN_LIMIT", &v)?;
        }
        if let Some(v) = get("DATAPLAN_MAX_PLAN_STEPS") {
            config.max_plan_steps = parse_number("DATAPLAN_MAX_PLAN_STEPS", &v)?;
        }
        if let Some(v) = get("DATAPLAN_CODE_AGENT_STEPS") {
            config.code_agent_steps = parse_number("DATAPLAN_CODE_AGENT_STEPS", &v)?;
        }
        if let Some(v) = get("DATAPLAN_ANALYSIS_AGENT_STEPS") {
            config.analysis_agent_steps = parse_number("DATAPLAN_ANALYSIS_AGENT_STEPS", &v)?;
        }
        if let Some(v) = get("DATAPLAN_DEPENDENCY_POLICY") {
            config.dependency_policy = v.parse().map_err(EngineError::Config)?;
        }
        if let Some(v) = get("DATAPLAN_USAGE_LOG") {
            config.usage_log = match v.as_str() {
                "off" | "none" => None,
                _ => Some(PathBuf::from(v)),
            };
        }
        if let Some(v) = get("DATAPLAN_PYTHON") {
            config.python = v;
        }
        if let Some(v) = get("DATAPLAN_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(v);
        }

        Ok(config)
    }

    /// Base URL in effect for the configured provider
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, EngineError> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}
