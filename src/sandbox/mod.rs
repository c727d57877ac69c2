//! Execution sandbox for model-generated code
//!
//! ```text
//! Sandbox::execute(namespace, code)
//!        ↓
//!   seed standard aliases (if absent)
//!        ↓
//!   DisplaySuspension guard ── show() becomes a no-op
//!        ↓
//!   Interpreter::run → stdout/stderr into Capture
//!        ↓
//!   guard dropped (restored on every path, panics included)
//!        ↓
//!   collect open figures → ExecutionOutcome
//! ```
//!
//! `execute` never fails: faults in the fragment, missing interpreters and
//! panics all come back as an outcome with `success = false`.

pub mod display;
pub mod interpreter;
pub mod namespace;
pub mod python;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::metrics::{CODE_EXECUTIONS, CODE_EXECUTION_DURATION};

pub use display::DisplaySuspension;
pub use interpreter::{Capture, ExecutionError, Interpreter};
pub use namespace::{Artifact, Figure, Namespace, RenderMode, Table, Value, RESULT_META, RESULT_TABLE};
pub use python::PythonInterpreter;

/// Structured result of one sandbox execution
///
/// Built only through [`ExecutionOutcome::succeeded`] and
/// [`ExecutionOutcome::failed`]: a failed outcome has an error and no
/// figures, a successful one has figures and no error.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub figures: Vec<Figure>,
    pub error: Option<ExecutionError>,
}

impl ExecutionOutcome {
    pub fn succeeded(capture: Capture, duration: Duration, figures: Vec<Figure>) -> Self {
        Self {
            success: true,
            stdout: capture.stdout,
            stderr: capture.stderr,
            duration,
            figures,
            error: None,
        }
    }

    pub fn failed(capture: Capture, duration: Duration, error: ExecutionError) -> Self {
        Self {
            success: false,
            stdout: capture.stdout,
            stderr: capture.stderr,
            duration,
            figures: Vec::new(),
            error: Some(error),
        }
    }

    /// JSON form handed back to the model; figures become placeholders
    pub fn to_tool_payload(&self) -> serde_json::Value {
        let seconds = (self.duration.as_secs_f64() * 10_000.0).round() / 10_000.0;
        let mut payload = serde_json::json!({
            "success": self.success,
            "stdout": self.stdout,
            "stderr": self.stderr,
            "execution_time_seconds": seconds,
        });
        if self.success {
            payload["figures"] = self
                .figures
                .iter()
                .map(|f| serde_json::Value::String(format!("<figure: {}>", f.label)))
                .collect();
        }
        if let Some(error) = &self.error {
            payload["error"] = serde_json::json!(error.message);
            payload["error_type"] = serde_json::json!(error.kind);
            payload["traceback"] = serde_json::json!(error.trace);
        }
        payload
    }
}

/// Runs code fragments through an [`Interpreter`]
#[derive(Clone)]
pub struct Sandbox {
    interpreter: Arc<dyn Interpreter>,
}

impl Sandbox {
    pub fn new(interpreter: Arc<dyn Interpreter>) -> Self {
        Self { interpreter }
    }

    /// Execute `code` against `namespace`
    ///
    /// Bindings made by the fragment stay in the namespace, including those
    /// made before a fault.
    pub async fn execute(&self, namespace: &mut Namespace, code: &str) -> ExecutionOutcome {
        let start = Instant::now();

        for (alias, module) in self.interpreter.standard_aliases() {
            namespace.insert_if_absent(alias, Value::module(*module));
        }

        if code.trim().is_empty() {
            debug!("Empty fragment, nothing to execute");
            return ExecutionOutcome::succeeded(
                Capture::default(),
                start.elapsed(),
                namespace.open_figures().to_vec(),
            );
        }

        let mut capture = Capture::default();
        let mut suspended = DisplaySuspension::engage(namespace);
        let result = AssertUnwindSafe(self.interpreter.run(&mut suspended, code, &mut capture))
            .catch_unwind()
            .await;
        drop(suspended);
        let duration = start.elapsed();
        CODE_EXECUTION_DURATION.observe(duration.as_secs_f64());

        let outcome = match result {
            Ok(Ok(())) => {
                ExecutionOutcome::succeeded(capture, duration, namespace.open_figures().to_vec())
            }
            Ok(Err(error)) => ExecutionOutcome::failed(capture, duration, error),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(error = %message, "Interpreter panicked");
                ExecutionOutcome::failed(
                    capture,
                    duration,
                    ExecutionError::new("Panic", message, String::new()),
                )
            }
        };

        let status = if outcome.success { "success" } else { "error" };
        CODE_EXECUTIONS.with_label_values(&[status]).inc();
        debug!(
            success = outcome.success,
            duration_ms = duration.as_secs_f64() * 1000.0,
            figures = outcome.figures.len(),
            "Fragment executed"
        );

        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "interpreter panicked".to_string()
    }
}
