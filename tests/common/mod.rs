//! Test doubles shared by the integration tests
//!
//! `ScriptedModel` replays canned assistant turns (or transport errors) and
//! records every request.
//! `ScriptInterpreter` runs a tiny line language instead of Python:
//!
//! ```text
//! print <text>          write a line to stdout
//! warn <text>           write a line to stderr
//! table <name> <rows>   bind a one-column table with <rows> rows
//! set <name> <json>     bind a JSON value
//! del <name>            remove a binding
//! figure <label>        open a figure
//! show                  show open figures
//! mode                  print the current render mode
//! raise <Kind> <msg>    fail with the given fault
//! panic <msg>           panic inside the interpreter
//! ```

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use dataplan::llm::{ChatError, ChatMessage, ChatModel, ChatRequest, ChatResponse, ToolCall, Usage};
use dataplan::sandbox::{Capture, ExecutionError, Figure, Interpreter, Namespace, Table, Value};

pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ChatMessage, ChatError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ChatMessage>) -> Arc<Self> {
        Self::from_results(replies.into_iter().map(Ok).collect())
    }

    /// Replies where some turns fail instead of answering
    pub fn from_results(replies: Vec<Result<ChatMessage, ChatError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        self.requests.lock().unwrap().push(request);
        let message = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ChatError::EmptyResponse))?;
        Ok(ChatResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: 7,
                completion_tokens: 3,
                total_tokens: 10,
            }),
        })
    }
}

/// Assistant turn without tool calls
pub fn answer(text: &str) -> ChatMessage {
    ChatMessage::assistant(text)
}

/// Assistant turn requesting one `execute_python_code` call
pub fn code_call(code: &str) -> ChatMessage {
    code_calls(&[code])
}

/// Assistant turn requesting several calls in one batch
pub fn code_calls(codes: &[&str]) -> ChatMessage {
    let calls = codes
        .iter()
        .map(|code| ToolCall::new(None, "execute_python_code", json!({ "code": code })))
        .collect();
    ChatMessage::assistant_with_tool_calls("", calls)
}

#[derive(Default)]
pub struct ScriptInterpreter {
    observed: Mutex<Vec<Vec<String>>>,
}

impl ScriptInterpreter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Non-module names bound at the start of every run, in call order
    pub fn observed_namespaces(&self) -> Vec<Vec<String>> {
        self.observed.lock().unwrap().clone()
    }
}

const ALIASES: &[(&str, &str)] = &[
    ("pd", "pandas"),
    ("np", "numpy"),
    ("plt", "matplotlib.pyplot"),
    ("sns", "seaborn"),
];

fn fault(kind: &str, message: &str) -> ExecutionError {
    ExecutionError::new(
        kind,
        message,
        format!("Traceback (most recent call last):\n{}: {}", kind, message),
    )
}

#[async_trait]
impl Interpreter for ScriptInterpreter {
    fn standard_aliases(&self) -> &[(&'static str, &'static str)] {
        ALIASES
    }

    async fn run(
        &self,
        namespace: &mut Namespace,
        code: &str,
        capture: &mut Capture,
    ) -> Result<(), ExecutionError> {
        let names = namespace
            .iter()
            .filter(|(_, v)| !v.is_module())
            .map(|(k, _)| k.to_string())
            .collect();
        self.observed.lock().unwrap().push(names);

        for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "print" => {
                    capture.stdout.push_str(rest);
                    capture.stdout.push('\n');
                }
                "warn" => {
                    capture.stderr.push_str(rest);
                    capture.stderr.push('\n');
                }
                "table" => {
                    let (name, rows) = rest.split_once(' ').unwrap_or((rest, "0"));
                    let rows: usize = rows
                        .parse()
                        .map_err(|_| fault("ValueError", "row count must be an integer"))?;
                    let table = Table::new(
                        vec!["value".to_string()],
                        (0..rows).map(|i| vec![json!(i)]).collect(),
                    );
                    namespace.insert(name, table);
                }
                "set" => {
                    let (name, raw) = rest.split_once(' ').unwrap_or((rest, "null"));
                    let value = serde_json::from_str(raw)
                        .map_err(|e| fault("SyntaxError", &e.to_string()))?;
                    namespace.insert(name, Value::json(value));
                }
                "del" => {
                    if namespace.remove(rest).is_none() {
                        return Err(fault("NameError", &format!("name '{}' is not defined", rest)));
                    }
                }
                "figure" => namespace.open_figure(Figure::new(rest, "iVBORw0KGgo=")),
                "show" => {
                    namespace.show();
                }
                "mode" => {
                    capture
                        .stdout
                        .push_str(&format!("{:?}\n", namespace.render_mode()));
                }
                "raise" => {
                    let (kind, message) = rest.split_once(' ').unwrap_or((rest, ""));
                    return Err(fault(kind, message));
                }
                "panic" => panic!("{}", rest),
                other => {
                    return Err(fault("SyntaxError", &format!("unknown command '{}'", other)));
                }
            }
        }
        Ok(())
    }
}
