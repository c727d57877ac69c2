//! Top-level error type for the analysis pipeline

use crate::llm::ChatError;
use crate::plan::PlanError;

/// Error type for engine operations
#[derive(Debug)]
pub enum EngineError {
    /// Planner or summarizer model call failed
    Model(ChatError),
    /// The plan was rejected before any step ran
    Plan(PlanError),
    /// Invalid configuration value
    Config(String),
    Io(std::io::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Model(e) => write!(f, "Model error: {}", e),
            EngineError::Plan(e) => write!(f, "Plan error: {}", e),
            EngineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            EngineError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Model(e) => Some(e),
            EngineError::Plan(e) => Some(e),
            EngineError::Config(_) => None,
            EngineError::Io(e) => Some(e),
        }
    }
}

impl From<ChatError> for EngineError {
    fn from(e: ChatError) -> Self {
        EngineError::Model(e)
    }
}

impl From<PlanError> for EngineError {
    fn from(e: PlanError) -> Self {
        EngineError::Plan(e)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}
