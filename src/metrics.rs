//! Prometheus metrics for agent runs, code execution and plans
//!
//! Everything registers into the default registry on first use.
//! [`gather_text`] renders it in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Loop Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished agent loop runs.
    ///
    /// Labels:
    /// - agent: "DA agent" or "DS agent"
    /// - outcome: "answer", "artifact" or "budget_exhausted"
    pub static ref AGENT_RUNS: CounterVec = register_counter_vec!(
        "dataplan_agent_runs_total",
        "Agent loop runs by agent and terminal state",
        &["agent", "outcome"]
    ).expect("failed to register AGENT_RUNS metric");

    /// Model round trips needed per agent run.
    pub static ref AGENT_ITERATIONS: HistogramVec = register_histogram_vec!(
        "dataplan_agent_iterations",
        "Model calls per agent loop run",
        &["agent"],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 10.0, 20.0]
    ).expect("failed to register AGENT_ITERATIONS metric");

    /// Tool invocations requested by the model, by tool name.
    pub static ref AGENT_TOOL_CALLS: CounterVec = register_counter_vec!(
        "dataplan_agent_tool_calls_total",
        "Tool calls requested by the model",
        &["tool"]
    ).expect("failed to register AGENT_TOOL_CALLS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Code executions by status ("success" or the fault kind class "error").
    pub static ref CODE_EXECUTIONS: CounterVec = register_counter_vec!(
        "dataplan_code_executions_total",
        "Sandbox executions by status",
        &["status"]
    ).expect("failed to register CODE_EXECUTIONS metric");

    /// Wall time of a sandbox execution in seconds.
    pub static ref CODE_EXECUTION_DURATION: Histogram = register_histogram!(
        "dataplan_code_execution_duration_seconds",
        "Sandbox execution wall time",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register CODE_EXECUTION_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // LLM Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Latency of one chat request, by model.
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "dataplan_llm_call_duration_seconds",
        "Chat request latency",
        &["model"],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    /// Tokens consumed, by agent and model.
    pub static ref LLM_TOKENS: CounterVec = register_counter_vec!(
        "dataplan_llm_tokens_total",
        "Total tokens reported by the provider",
        &["agent", "model"]
    ).expect("failed to register LLM_TOKENS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Plan Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Plans handled by the executor.
    ///
    /// Labels:
    /// - outcome: "completed", "clarification" or "rejected"
    pub static ref PLANS: CounterVec = register_counter_vec!(
        "dataplan_plans_total",
        "Plans by outcome",
        &["outcome"]
    ).expect("failed to register PLANS metric");

    /// Steps executed, by result ("ok" or "failed").
    pub static ref PLAN_STEPS: CounterVec = register_counter_vec!(
        "dataplan_plan_steps_total",
        "Executed plan steps",
        &["result"]
    ).expect("failed to register PLAN_STEPS metric");
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
