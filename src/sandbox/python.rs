//! `python3` worker-process interpreter
//!
//! A namespace gets one long-lived worker on its first fragment. The worker
//! keeps the real Python globals (functions, imports, arbitrary objects) for
//! as long as the namespace lives; only tables and JSON values cross the
//! process boundary:
//!
//! ```text
//! Rust                                python3 -u -c WORKER
//!   │  {code, bindings, removed}\n  ──▶  stdin
//!   │                                    exec(code, globals)
//!   │  MARKER {response}\n          ◀──  stdout
//! ```
//!
//! A request carries only the bindings that changed on the Rust side since
//! the last exchange. A response carries `result_df`, `result_meta`, the names
//! still bound, and every figure pyplot still has open. If the worker dies
//! the fragment fails with a `ProtocolError` and the next fragment starts a
//! fresh worker.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::interpreter::{Capture, ExecutionError, Interpreter};
use super::namespace::{Figure, Namespace, RenderMode, Table, Value, RESULT_META, RESULT_TABLE};

pub const DEFAULT_PYTHON: &str = "python3";

/// Prefix of every response line on the worker's stdout
const RESPONSE_MARKER: &str = "__DATAPLAN_RESPONSE__";

const STANDARD_ALIASES: &[(&str, &str)] = &[
    ("pd", "pandas"),
    ("np", "numpy"),
    ("plt", "matplotlib.pyplot"),
    ("sns", "seaborn"),
];

const WORKER: &str = r#"
import base64, contextlib, importlib, io, json, math, sys, traceback, uuid

MARKER = "__DATAPLAN_RESPONSE__"
channel = sys.stdout

try:
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as _plt
except ImportError:
    _plt = None

try:
    import pandas as _pd
except ImportError:
    _pd = None

ns = {"__name__": "__main__"}
for name, module in json.loads(sys.argv[1]):
    try:
        ns[name] = importlib.import_module(module)
    except ImportError:
        pass

state = {"suspend": False, "displayed": []}

def _label(fig):
    if fig._suptitle is not None and fig._suptitle.get_text():
        return fig._suptitle.get_text()
    for ax in fig.axes:
        if ax.get_title():
            return ax.get_title()
    return "Figure %d" % fig.number

def _encode_figure(fig):
    if not hasattr(fig, "_dataplan_id"):
        fig._dataplan_id = str(uuid.uuid4())
    buf = io.BytesIO()
    fig.savefig(buf, format="png", bbox_inches="tight")
    return {
        "id": fig._dataplan_id,
        "label": _label(fig),
        "png_base64": base64.b64encode(buf.getvalue()).decode("ascii"),
    }

def _open_figures():
    if _plt is None:
        return []
    return [_encode_figure(_plt.figure(num)) for num in _plt.get_fignums()]

def _show(*args, **kwargs):
    if state["suspend"]:
        return
    state["displayed"].extend(_open_figures())
    _plt.close("all")

if _plt is not None:
    _plt.show = _show

def _safe(value):
    if isinstance(value, float):
        return value if math.isfinite(value) else None
    if isinstance(value, dict):
        return {str(k): _safe(v) for k, v in value.items()}
    if isinstance(value, (list, tuple, set)):
        return [_safe(v) for v in value]
    if value is None or isinstance(value, (bool, int, str)):
        return value
    if hasattr(value, "item"):
        return _safe(value.item())
    if hasattr(value, "tolist"):
        return _safe(value.tolist())
    if hasattr(value, "isoformat"):
        return value.isoformat()
    raise TypeError(type(value).__name__)

def _table(value):
    if _pd is None:
        return None
    if isinstance(value, _pd.Series):
        value = value.to_frame()
    if not isinstance(value, _pd.DataFrame):
        return None
    if not isinstance(value.index, _pd.RangeIndex):
        value = value.reset_index()
    rows = json.loads(value.to_json(orient="values", date_format="iso"))
    return {"columns": [str(c) for c in value.columns], "rows": rows}

def _decode(value):
    if value["type"] == "table":
        if _pd is None:
            return {"columns": value["columns"], "rows": value["rows"]}
        return _pd.DataFrame(value["rows"], columns=value["columns"])
    return value.get("value")

def _respond(response):
    try:
        line = json.dumps(response)
    except Exception as exc:
        line = json.dumps({
            "stdout": response["stdout"],
            "stderr": response["stderr"],
            "error": {"kind": "ProtocolError", "message": str(exc), "trace": ""},
            "names": response["names"],
        })
    channel.write(MARKER + line + "\n")
    channel.flush()

while True:
    line = sys.stdin.readline()
    if not line:
        break
    request = json.loads(line)
    for name in request.get("removed", []):
        ns.pop(name, None)
    for name, value in request.get("bindings", {}).items():
        ns[name] = _decode(value)
    state["suspend"] = request.get("suspend_display", False)
    state["displayed"] = []

    stdout, stderr = io.StringIO(), io.StringIO()
    error = None
    try:
        with contextlib.redirect_stdout(stdout), contextlib.redirect_stderr(stderr):
            exec(compile(request["code"], "<fragment>", "exec"), ns)
    except BaseException as exc:
        error = {"kind": type(exc).__name__, "message": str(exc), "trace": traceback.format_exc()}

    response = {
        "stdout": stdout.getvalue(),
        "stderr": stderr.getvalue(),
        "error": error,
        "displayed": state["displayed"],
        "names": [name for name in ns if not name.startswith("__")],
    }
    try:
        response["figures"] = _open_figures()
    except Exception as exc:
        response["stderr"] += "figure capture failed: %s\n" % exc
    try:
        table = _table(ns.get("result_df"))
        if table is not None:
            response["result_df"] = table
    except Exception as exc:
        response["stderr"] += "result_df capture failed: %s\n" % exc
    if "result_meta" in ns:
        try:
            response["result_meta"] = _safe(ns["result_meta"])
        except Exception:
            pass
    _respond(response)
"#;

#[derive(Serialize)]
struct Request<'a> {
    code: &'a str,
    suspend_display: bool,
    bindings: BTreeMap<&'a str, &'a Value>,
    removed: Vec<&'a str>,
}

impl<'a> Request<'a> {
    /// Request carrying only what changed since `synced`
    fn delta(
        namespace: &'a Namespace,
        synced: &'a BTreeMap<String, Value>,
        code: &'a str,
    ) -> Self {
        let bindings = namespace
            .iter()
            .filter(|(name, value)| !value.is_module() && synced.get(*name) != Some(*value))
            .collect();
        let removed = synced
            .keys()
            .map(String::as_str)
            .filter(|name| !namespace.contains(name))
            .collect();
        Self {
            code,
            suspend_display: namespace.render_mode() == RenderMode::Suspended,
            bindings,
            removed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    error: Option<ExecutionError>,
    #[serde(default)]
    figures: Vec<RenderedFigure>,
    #[serde(default)]
    displayed: Vec<RenderedFigure>,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    result_df: Option<Table>,
    #[serde(default)]
    result_meta: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RenderedFigure {
    #[serde(default)]
    id: Option<String>,
    label: String,
    png_base64: String,
}

impl From<RenderedFigure> for Figure {
    fn from(f: RenderedFigure) -> Self {
        match f.id {
            Some(id) => Figure::with_id(id, f.label, f.png_base64),
            None => Figure::new(f.label, f.png_base64),
        }
    }
}

/// Live worker process parked in a namespace
struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    /// Non-module bindings as of the last exchange
    synced: BTreeMap<String, Value>,
}

impl Worker {
    fn spawn(program: &str) -> Result<Self, ExecutionError> {
        let aliases = serde_json::to_string(STANDARD_ALIASES)
            .map_err(|e| protocol_error(format!("failed to encode aliases: {}", e), ""))?;
        let mut child = Command::new(program)
            .arg("-u")
            .arg("-c")
            .arg(WORKER)
            .arg(aliases)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::new(
                    "InterpreterUnavailable",
                    format!("failed to start {}: {}", program, e),
                    "",
                )
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| protocol_error("worker stdin is not piped", ""))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| protocol_error("worker stdout is not piped", ""))?;
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        debug!(program = %program, pid = ?child.id(), "Started Python worker");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr,
            synced: BTreeMap::new(),
        })
    }

    /// Send one request line and wait for its response line
    ///
    /// Lines written straight to the worker's stdout (bypassing the fragment's
    /// redirected streams) are appended to the captured stdout.
    async fn exchange(&mut self, request: &[u8], capture: &mut Capture) -> Result<Response, ExecutionError> {
        let sent: std::io::Result<()> = async {
            self.stdin.write_all(request).await?;
            self.stdin.write_all(b"\n").await?;
            self.stdin.flush().await
        }
        .await;
        if sent.is_err() {
            return Err(self.exited().await);
        }

        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) => match line.strip_prefix(RESPONSE_MARKER) {
                    Some(raw) => {
                        return serde_json::from_str(raw).map_err(|e| {
                            protocol_error(format!("undecodable worker response: {}", e), "")
                        })
                    }
                    None => {
                        capture.stdout.push_str(&line);
                        capture.stdout.push('\n');
                    }
                },
                Ok(None) => return Err(self.exited().await),
                Err(e) => {
                    return Err(protocol_error(format!("failed to read worker response: {}", e), ""))
                }
            }
        }
    }

    async fn exited(&mut self) -> ExecutionError {
        // no-op on an exited child, unblocks `wait` on one that only closed its pipes
        let _ = self.child.start_kill();
        let status = match self.child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        };
        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        protocol_error(format!("interpreter worker exited ({})", status), stderr)
    }

    fn snapshot(namespace: &Namespace) -> BTreeMap<String, Value> {
        namespace
            .iter()
            .filter(|(_, value)| !value.is_module())
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

/// Interpreter backed by a `python3` executable
///
/// pandas and matplotlib are used when importable; plain Python works
/// without them.
#[derive(Debug, Clone)]
pub struct PythonInterpreter {
    program: String,
}

impl Default for PythonInterpreter {
    fn default() -> Self {
        Self::new(DEFAULT_PYTHON)
    }
}

impl PythonInterpreter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Interpreter for PythonInterpreter {
    fn standard_aliases(&self) -> &[(&'static str, &'static str)] {
        STANDARD_ALIASES
    }

    async fn run(
        &self,
        namespace: &mut Namespace,
        code: &str,
        capture: &mut Capture,
    ) -> Result<(), ExecutionError> {
        let mut worker = match namespace.take_session::<Worker>() {
            Some(worker) => worker,
            None => Worker::spawn(&self.program)?,
        };

        let encoded = serde_json::to_vec(&Request::delta(namespace, &worker.synced, code));
        let payload = match encoded {
            Ok(payload) => payload,
            Err(e) => {
                namespace.set_session(worker);
                return Err(protocol_error(format!("failed to encode request: {}", e), ""));
            }
        };

        // A worker that fails an exchange is dropped (and killed) here
        let response = match worker.exchange(&payload, capture).await {
            Ok(response) => response,
            Err(error) => {
                warn!(program = %self.program, error = %error, "Python worker lost");
                return Err(error);
            }
        };

        debug!(
            program = %self.program,
            names = response.names.len(),
            figures = response.figures.len(),
            "Python fragment finished"
        );

        let result = apply_response(namespace, response, capture);
        worker.synced = Worker::snapshot(namespace);
        namespace.set_session(worker);
        result
    }
}

fn protocol_error(message: impl Into<String>, trace: impl Into<String>) -> ExecutionError {
    ExecutionError::new("ProtocolError", message, trace)
}

fn apply_response(
    namespace: &mut Namespace,
    response: Response,
    capture: &mut Capture,
) -> Result<(), ExecutionError> {
    capture.stdout.push_str(&response.stdout);
    capture.stderr.push_str(&response.stderr);

    let live: BTreeSet<&str> = response.names.iter().map(String::as_str).collect();
    let unbound: Vec<String> = namespace
        .iter()
        .filter(|(name, value)| !value.is_module() && !live.contains(name))
        .map(|(name, _)| name.to_string())
        .collect();
    for name in unbound {
        namespace.remove(&name);
    }

    match response.result_df {
        Some(table) => {
            namespace.insert(RESULT_TABLE, table);
        }
        None => {
            namespace.remove(RESULT_TABLE);
        }
    }
    match response.result_meta {
        Some(meta) => {
            namespace.insert(RESULT_META, Value::json(meta));
        }
        None => {
            namespace.remove(RESULT_META);
        }
    }

    for figure in response.displayed {
        namespace.record_displayed(figure.into());
    }
    namespace.sync_open_figures(response.figures.into_iter().map(Figure::from).collect());

    match response.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
