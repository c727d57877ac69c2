//! Namespace: the mutable symbol table a code fragment runs against
//!
//! Besides named values the namespace owns the figures that are still open,
//! the figures already flushed to the display, and the current render mode.
//! An interpreter may also park a session in it (e.g. a live worker process);
//! the session lives exactly as long as the namespace.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Reserved name for a fragment's final tabular result
pub const RESULT_TABLE: &str = "result_df";

/// Reserved name for optional structured metadata about the result
pub const RESULT_META: &str = "result_meta";

/// A rectangular result: column names plus row-major JSON cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    /// A table with no rows carries no result
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A value bound in a namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Table(Table),
    Json { value: serde_json::Value },
    /// Standard library alias, e.g. `pd` → `pandas`
    Module { module: String },
}

impl Value {
    pub fn json(value: serde_json::Value) -> Self {
        Value::Json { value }
    }

    pub fn module(module: impl Into<String>) -> Self {
        Value::Module {
            module: module.into(),
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_module(&self) -> bool {
        matches!(self, Value::Module { .. })
    }
}

impl From<Table> for Value {
    fn from(table: Table) -> Self {
        Value::Table(table)
    }
}

/// A rendered plot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    /// Unique per figure, used to de-duplicate across tool calls
    pub id: String,
    pub label: String,
    /// PNG bytes, base64 encoded
    pub png_base64: String,
}

impl Figure {
    pub fn new(label: impl Into<String>, png_base64: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::now_v7().to_string(), label, png_base64)
    }

    /// Figure whose identity is tracked by the interpreter
    pub fn with_id(
        id: impl Into<String>,
        label: impl Into<String>,
        png_base64: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            png_base64: png_base64.into(),
        }
    }
}

/// Whether `show` flushes figures to the display or leaves them open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderMode {
    #[default]
    Immediate,
    Suspended,
}

/// Typed result of an agent run: a table plus metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Artifact {
    pub table: Option<Table>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Artifact {
    pub fn new(table: Table, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            table: Some(table),
            metadata,
        }
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }
}

#[derive(Default)]
pub struct Namespace {
    bindings: BTreeMap<String, Value>,
    open_figures: Vec<Figure>,
    displayed: Vec<Figure>,
    render_mode: RenderMode,
    session: Option<Mutex<Box<dyn Any + Send>>>,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("bindings", &self.bindings)
            .field("open_figures", &self.open_figures.len())
            .field("displayed", &self.displayed.len())
            .field("render_mode", &self.render_mode)
            .field("session", &self.session.is_some())
            .finish()
    }
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the parked interpreter session if it is a `T`
    ///
    /// A session of another type stays parked.
    pub fn take_session<T: Any + Send>(&mut self) -> Option<T> {
        let boxed = self.session.take()?.into_inner().ok()?;
        match boxed.downcast::<T>() {
            Ok(session) => Some(*session),
            Err(other) => {
                self.session = Some(Mutex::new(other));
                None
            }
        }
    }

    /// Park `session` here, replacing (and dropping) any previous one
    pub fn set_session<T: Any + Send>(&mut self, session: T) {
        self.session = Some(Mutex::new(Box::new(session)));
    }

    /// Drop the parked session
    pub fn clear_session(&mut self) {
        self.session = None;
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.bindings.insert(name.into(), value.into())
    }

    /// Bind `name` only if it is not bound yet; returns whether it was inserted
    pub fn insert_if_absent(&mut self, name: &str, value: Value) -> bool {
        if self.bindings.contains_key(name) {
            return false;
        }
        self.bindings.insert(name.to_string(), value);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(|k| k.as_str())
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.bindings
            .iter()
            .filter_map(|(k, v)| v.as_table().map(|t| (k.as_str(), t)))
    }

    pub fn render_mode(&self) -> RenderMode {
        self.render_mode
    }

    /// Switch render mode, returning the previous one
    pub(crate) fn set_render_mode(&mut self, mode: RenderMode) -> RenderMode {
        std::mem::replace(&mut self.render_mode, mode)
    }

    pub fn open_figure(&mut self, figure: Figure) {
        self.open_figures.push(figure);
    }

    /// Figures created and not yet shown or closed, oldest first
    pub fn open_figures(&self) -> &[Figure] {
        &self.open_figures
    }

    pub fn close_figures(&mut self) -> Vec<Figure> {
        std::mem::take(&mut self.open_figures)
    }

    /// Replace the open figures with the interpreter's current view of them
    pub fn sync_open_figures(&mut self, figures: Vec<Figure>) {
        self.open_figures = figures;
    }

    /// Figures flushed to the display, oldest first
    pub fn displayed(&self) -> &[Figure] {
        &self.displayed
    }

    pub(crate) fn record_displayed(&mut self, figure: Figure) {
        self.displayed.push(figure);
    }

    /// Display all open figures and close them
    ///
    /// No-op while rendering is suspended; returns how many were flushed.
    pub fn show(&mut self) -> usize {
        if self.render_mode == RenderMode::Suspended {
            return 0;
        }
        let flushed = self.close_figures();
        let count = flushed.len();
        self.displayed.extend(flushed);
        count
    }

    /// The artifact bound under the reserved names, if its table has rows
    ///
    /// Metadata that is not a JSON object is replaced by an empty map.
    pub fn artifact(&self) -> Option<Artifact> {
        let table = self.get(RESULT_TABLE)?.as_table()?;
        if table.is_empty() {
            return None;
        }
        let metadata = self
            .get(RESULT_META)
            .and_then(Value::as_json)
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        Some(Artifact::new(table.clone(), metadata))
    }
}
