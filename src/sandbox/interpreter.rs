//! The evaluator seam behind the sandbox

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::namespace::Namespace;

/// Output captured while a fragment runs, isolated from the host streams
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    pub stdout: String,
    pub stderr: String,
}

/// A fault raised by a code fragment, classified by its runtime type name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Runtime type name, e.g. "KeyError"
    pub kind: String,
    pub message: String,
    /// Full trace as rendered by the runtime
    #[serde(default)]
    pub trace: String,
}

impl ExecutionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: trace.into(),
        }
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ExecutionError {}

/// Capability-scoped code evaluator
///
/// An interpreter runs one fragment against a namespace: it may read and
/// rebind symbols, open figures, and write to the capture buffers. It must
/// honour the namespace's render mode when the fragment asks to show plots.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Aliases every namespace gets before its first fragment: (name, module)
    fn standard_aliases(&self) -> &[(&'static str, &'static str)];

    async fn run(
        &self,
        namespace: &mut Namespace,
        code: &str,
        capture: &mut Capture,
    ) -> Result<(), ExecutionError>;
}
