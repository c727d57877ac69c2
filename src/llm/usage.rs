//! Append-only CSV log of token usage, one row per model call.

use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::tool_use::Usage;
use crate::metrics::LLM_TOKENS;

const BASE_COLUMNS: [&str; 4] = ["timestamp", "agent_name", "model", "total_tokens"];

/// CSV sink for per-call token counts
///
/// The header is written when the file is first created; later rows are
/// appended as-is.
#[derive(Debug)]
pub struct UsageLog {
    path: PathBuf,
    // serialises appends from agents sharing one log
    lock: Mutex<()>,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row
    ///
    /// # Arguments
    /// * `agent_name` - e.g. "DA agent", "Orchestrator agent"
    /// * `model` - model identifier used for the call
    /// * `usage` - provider token counts; an empty cell when absent
    /// * `extra` - optional additional columns, in order
    pub async fn record(
        &self,
        agent_name: &str,
        model: &str,
        usage: Option<&Usage>,
        extra: &[(&str, String)],
    ) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file_exists = fs::try_exists(&self.path).await.unwrap_or(false);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut out = String::new();
        if !file_exists {
            let header: Vec<String> = BASE_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .chain(extra.iter().map(|(k, _)| k.to_string()))
                .map(|c| escape_field(&c))
                .collect();
            out.push_str(&header.join(","));
            out.push('\n');
        }

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let total = usage.map(|u| u.total_tokens.to_string()).unwrap_or_default();
        let row: Vec<String> = [timestamp, agent_name.to_string(), model.to_string(), total]
            .into_iter()
            .chain(extra.iter().map(|(_, v)| v.clone()))
            .map(|v| escape_field(&v))
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');

        file.write_all(out.as_bytes()).await?;
        file.flush().await
    }
}

/// Record a model call in metrics and, when configured, the usage log
///
/// Logging failures are reported and swallowed; they never end a run.
pub async fn track_usage(
    log: Option<&UsageLog>,
    agent_name: &str,
    model: &str,
    usage: Option<&Usage>,
) {
    if let Some(u) = usage {
        LLM_TOKENS
            .with_label_values(&[agent_name, model])
            .inc_by(u.total_tokens as f64);
    }
    if let Some(log) = log {
        if let Err(e) = log.record(agent_name, model, usage, &[]).await {
            warn!(path = %log.path().display(), error = %e, "Failed to append usage log");
        }
    }
}

fn escape_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
