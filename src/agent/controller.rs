//! Agent Controller - the bounded tool-calling loop shared by every agent
//!
//! The controller drives a chat model through code generation/execution
//! cycles against one namespace, feeding every execution outcome back to the
//! model until it answers, produces a result table, or runs out of steps.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::llm::{
    track_usage, ChatError, ChatMessage, ChatModel, ChatRequest, Tool, ToolCall, ToolFunction,
    UsageLog,
};
use crate::metrics::{AGENT_ITERATIONS, AGENT_RUNS, AGENT_TOOL_CALLS, LLM_CALL_DURATION};
use crate::sandbox::{Artifact, ExecutionOutcome, Figure, Namespace, Sandbox};

/// Name of the only tool exposed to the model
pub const EXECUTE_PYTHON_CODE: &str = "execute_python_code";

/// Tool definition for `execute_python_code(code, verbose=false)`
pub fn execute_python_code_tool() -> Tool {
    Tool {
        tool_type: "function".to_string(),
        function: ToolFunction {
            name: EXECUTE_PYTHON_CODE.to_string(),
            description: "Execute Python code inside the agent's Python environment. \
                The environment persists across tool calls within the same agent run. \
                The code must be valid Python and must include all needed imports, \
                data loading, and variable definitions. \
                If producing a final result, store it in a variable named `result_df` \
                and optional metadata in `result_meta`."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "The full Python script to execute. \
                            The final output should be assigned to `result_df`, \
                            with optional metadata assigned to `result_meta`."
                    },
                    "verbose": {
                        "type": "boolean",
                        "description": "If true, the code and its output are logged at info level.",
                        "default": false
                    }
                },
                "required": ["code"]
            }),
        },
    }
}

/// Decoded arguments of an `execute_python_code` call
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecuteArgs {
    pub code: String,
    #[serde(default)]
    pub verbose: bool,
}

impl ExecuteArgs {
    /// Accepts both an argument object and a JSON-encoded string of one
    pub fn parse(arguments: &serde_json::Value) -> Result<Self, serde_json::Error> {
        match arguments {
            serde_json::Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        }
    }
}

/// Configuration for one agent loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Label used in logs, metrics and the usage log (e.g. "DA agent")
    pub agent_name: String,
    /// Model identifier sent with every request
    pub model: String,
    /// Maximum number of model calls before giving up
    pub max_steps: usize,
    /// Optional cap on generated tokens per call
    pub max_tokens: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            agent_name: "agent".to_string(),
            model: "gpt-4.1-mini".to_string(),
            max_steps: 3,
            max_tokens: None,
        }
    }
}

/// How a loop run ended
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    /// The model replied without tool calls; carries its text
    Answer(String),
    /// A successful execution left a non-empty `result_df` behind
    Artifact,
    /// `max_steps` model calls without reaching either of the above
    BudgetExhausted,
}

impl Termination {
    fn label(&self) -> &'static str {
        match self {
            Termination::Answer(_) => "answer",
            Termination::Artifact => "artifact",
            Termination::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Record of a single code execution requested by the model
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// 1-based iteration that requested the call
    pub step_index: usize,
    pub call_id: String,
    pub code: String,
    pub outcome: ExecutionOutcome,
}

/// Result of an agent loop run
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub termination: Termination,
    /// Set only for [`Termination::Artifact`]
    pub artifact: Option<Artifact>,
    /// Number of model calls made
    pub iterations: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    pub last_outcome: Option<ExecutionOutcome>,
    /// Most recent non-empty stdout
    pub last_stdout: String,
    /// Message of the most recent failed execution
    pub last_error: Option<String>,
    /// Text of the last assistant turn
    pub last_message: String,
    /// Figures from every execution, de-duplicated, oldest first
    pub figures: Vec<Figure>,
    /// Unique trace ID for this run
    pub trace_id: String,
}

/// Error type for agent operations
///
/// Exhausting the step budget is a normal [`Termination`], not an error.
#[derive(Debug)]
pub enum AgentError {
    /// The chat model could not be reached or answered garbage
    Model(ChatError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Model(e) => write!(f, "Model error: {}", e),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Model(e) => Some(e),
        }
    }
}

impl From<ChatError> for AgentError {
    fn from(e: ChatError) -> Self {
        AgentError::Model(e)
    }
}

#[derive(Default)]
struct LoopState {
    tool_calls: Vec<ToolCallRecord>,
    last_outcome: Option<ExecutionOutcome>,
    last_stdout: String,
    last_error: Option<String>,
    last_message: String,
    figures: Vec<Figure>,
    seen_figures: HashSet<String>,
}

impl LoopState {
    fn absorb(&mut self, outcome: &ExecutionOutcome) {
        if !outcome.stdout.is_empty() {
            self.last_stdout = outcome.stdout.clone();
        }
        if let Some(error) = &outcome.error {
            self.last_error = Some(error.message.clone());
        }
        for figure in &outcome.figures {
            if self.seen_figures.insert(figure.id.clone()) {
                self.figures.push(figure.clone());
            }
        }
    }

    fn finish(
        self,
        termination: Termination,
        artifact: Option<Artifact>,
        iterations: usize,
        trace_id: String,
    ) -> LoopResult {
        LoopResult {
            termination,
            artifact,
            iterations,
            tool_calls: self.tool_calls,
            last_outcome: self.last_outcome,
            last_stdout: self.last_stdout,
            last_error: self.last_error,
            last_message: self.last_message,
            figures: self.figures,
            trace_id,
        }
    }
}

/// Agent loop orchestrating a chat model and the sandbox
#[derive(Clone)]
pub struct AgentLoop {
    model: Arc<dyn ChatModel>,
    sandbox: Sandbox,
    usage_log: Option<Arc<UsageLog>>,
    config: LoopConfig,
}

impl AgentLoop {
    /// Create a new agent loop
    ///
    /// # Arguments
    /// * `model` - Chat model answering every iteration
    /// * `sandbox` - Where requested code runs
    /// * `config` - Loop configuration
    pub fn new(model: Arc<dyn ChatModel>, sandbox: Sandbox, config: LoopConfig) -> Self {
        Self {
            model,
            sandbox,
            usage_log: None,
            config,
        }
    }

    pub fn with_usage_log(mut self, usage_log: Option<Arc<UsageLog>>) -> Self {
        self.usage_log = usage_log;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop over `messages` against `namespace`
    ///
    /// Tool calls in one response run in order; the first successful call
    /// that leaves a non-empty `result_df` ends the run, skipping the rest
    /// of the batch.
    pub async fn run(
        &self,
        messages: Vec<ChatMessage>,
        namespace: &mut Namespace,
    ) -> Result<LoopResult, AgentError> {
        let trace_id = Uuid::now_v7().to_string();

        let root_span = info_span!(
            "agent_run",
            trace_id = %trace_id,
            agent = %self.config.agent_name,
            model = %self.config.model,
            max_steps = self.config.max_steps,
            otel.name = "agent_run"
        );

        async move {
            info!(trace_id = %trace_id, agent = %self.config.agent_name, "Starting agent run");

            let tools = vec![execute_python_code_tool()];
            let mut messages = messages;
            let mut state = LoopState::default();

            for iteration in 1..=self.config.max_steps {
                let llm_span = info_span!(
                    "llm_call",
                    trace_id = %trace_id,
                    iteration,
                    model = %self.config.model,
                    otel.name = "llm_call"
                );

                let mut request = ChatRequest::new(&self.config.model, messages.clone())
                    .with_tools(tools.clone());
                if let Some(max_tokens) = self.config.max_tokens {
                    request = request.with_max_tokens(max_tokens);
                }

                let call_start = Instant::now();
                let response = self.model.chat(request).instrument(llm_span).await?;
                let call_duration_secs = call_start.elapsed().as_secs_f64();

                LLM_CALL_DURATION
                    .with_label_values(&[&self.config.model])
                    .observe(call_duration_secs);
                track_usage(
                    self.usage_log.as_deref(),
                    &self.config.agent_name,
                    &self.config.model,
                    response.usage.as_ref(),
                )
                .await;
                debug!(
                    trace_id = %trace_id,
                    iteration,
                    duration_ms = call_duration_secs * 1000.0,
                    "LLM call completed"
                );

                let message = response.message;
                state.last_message = message.content.clone();

                let tool_calls: Vec<ToolCall> = message
                    .requested_tool_calls()
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(index, mut call)| {
                        if call.id.as_deref().map_or(true, str::is_empty) {
                            call.id = Some(format!("call_{}_{}", iteration, index));
                        }
                        call
                    })
                    .collect();

                if tool_calls.is_empty() {
                    info!(trace_id = %trace_id, iteration, "Model answered without tool calls");
                    self.record_run(&Termination::Answer(String::new()), iteration);
                    return Ok(state.finish(
                        Termination::Answer(message.content),
                        None,
                        iteration,
                        trace_id,
                    ));
                }

                messages.push(ChatMessage::assistant_with_tool_calls(
                    message.content,
                    tool_calls.clone(),
                ));

                for tool_call in tool_calls {
                    let call_id = tool_call.id.unwrap_or_default();
                    let tool_name = tool_call.function.name;
                    AGENT_TOOL_CALLS.with_label_values(&[&tool_name]).inc();

                    if tool_name != EXECUTE_PYTHON_CODE {
                        warn!(trace_id = %trace_id, tool = %tool_name, "Model requested an unknown tool");
                        let reply = serde_json::json!({
                            "success": false,
                            "error": format!("Unknown tool: {}", tool_name),
                        });
                        messages.push(ChatMessage::tool(call_id, tool_name, reply.to_string()));
                        continue;
                    }

                    let args = match ExecuteArgs::parse(&tool_call.function.arguments) {
                        Ok(args) => args,
                        Err(e) => {
                            warn!(trace_id = %trace_id, error = %e, "Malformed tool arguments");
                            let reply = serde_json::json!({
                                "success": false,
                                "error": format!("Invalid arguments for {}: {}", EXECUTE_PYTHON_CODE, e),
                            });
                            messages.push(ChatMessage::tool(call_id, tool_name, reply.to_string()));
                            continue;
                        }
                    };

                    let exec_span = info_span!(
                        "code_execution",
                        trace_id = %trace_id,
                        iteration,
                        call_id = %call_id,
                        code_len = args.code.len(),
                        otel.name = "code_execution"
                    );

                    if args.verbose {
                        info!(trace_id = %trace_id, code = %args.code, "Executing code");
                    } else {
                        debug!(trace_id = %trace_id, code = %args.code, "Executing code");
                    }

                    let outcome = self
                        .sandbox
                        .execute(namespace, &args.code)
                        .instrument(exec_span)
                        .await;

                    if args.verbose {
                        info!(
                            trace_id = %trace_id,
                            success = outcome.success,
                            stdout = %outcome.stdout,
                            stderr = %outcome.stderr,
                            "Execution finished"
                        );
                    } else {
                        debug!(
                            trace_id = %trace_id,
                            success = outcome.success,
                            stdout = %outcome.stdout,
                            stderr = %outcome.stderr,
                            "Execution finished"
                        );
                    }
                    if let Some(error) = &outcome.error {
                        warn!(trace_id = %trace_id, kind = %error.kind, error = %error.message, "Code execution failed");
                    }

                    state.absorb(&outcome);
                    messages.push(ChatMessage::tool(
                        call_id.clone(),
                        EXECUTE_PYTHON_CODE,
                        outcome.to_tool_payload().to_string(),
                    ));

                    let success = outcome.success;
                    state.tool_calls.push(ToolCallRecord {
                        step_index: iteration,
                        call_id,
                        code: args.code,
                        outcome: outcome.clone(),
                    });
                    state.last_outcome = Some(outcome);

                    if success {
                        if let Some(artifact) = namespace.artifact() {
                            info!(trace_id = %trace_id, iteration, "Result table produced");
                            self.record_run(&Termination::Artifact, iteration);
                            return Ok(state.finish(
                                Termination::Artifact,
                                Some(artifact),
                                iteration,
                                trace_id,
                            ));
                        }
                    }
                }
            }

            warn!(trace_id = %trace_id, max_steps = self.config.max_steps, "Step budget exhausted");
            self.record_run(&Termination::BudgetExhausted, self.config.max_steps);
            Ok(state.finish(
                Termination::BudgetExhausted,
                None,
                self.config.max_steps,
                trace_id,
            ))
        }
        .instrument(root_span)
        .await
    }

    fn record_run(&self, termination: &Termination, iterations: usize) {
        AGENT_RUNS
            .with_label_values(&[&self.config.agent_name, termination.label()])
            .inc();
        AGENT_ITERATIONS
            .with_label_values(&[&self.config.agent_name])
            .observe(iterations as f64);
    }
}
