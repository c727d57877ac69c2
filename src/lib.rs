//! dataplan - plan-and-execute LLM agents over tabular data
//!
//! A planner turns a question into dependency-ordered steps, each step runs
//! bounded tool-calling agents whose only effect is Python code executed in
//! a sandboxed namespace, and a summarizer turns the findings into a report.
//!
//! # Modules
//!
//! - `llm` - `ChatModel` trait, Ollama and OpenAI clients, token usage log
//! - `sandbox` - namespaces, the `Interpreter` seam and the Python interpreter
//! - `agent` - the tool-calling loop, code agent (DA) and analysis agent (DS)
//! - `plan` - plan document, planner, executor and summarizer
//! - `engine` - wiring from configuration to a ready pipeline
//! - `metrics` - Prometheus metrics for observability
//! - `telemetry` - logging and OpenTelemetry trace export
//!
//! # Quick Start
//!
//! ```ignore
//! use dataplan::{Engine, EngineConfig};
//!
//! let config = EngineConfig::from_env()?;
//! let engine = Engine::from_config(&config)?;
//! let metadata = dataplan::metadata::load_metadata_text("data/metadata".as_ref())?;
//! let outcome = engine.ask("Which state gained the most returns?", None, &metadata).await?;
//! ```

pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod metadata;
pub mod metrics;
pub mod plan;
pub mod sandbox;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use plan::{Plan, PlanOutcome};
pub use sandbox::{Namespace, Sandbox};
