use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use dataplan::config::{EngineConfig, Provider};
use dataplan::engine::Engine;
use dataplan::metadata::load_metadata_text;
use dataplan::plan::{DependencyPolicy, PlanOutcome};
use dataplan::{metrics, telemetry};

#[derive(Parser, Debug)]
#[command(
    name = "dataplan",
    about = "Answer analytical questions with planned, sandboxed Python agents",
    version
)]
struct Cli {
    /// The question to answer.
    #[arg(value_name = "QUESTION")]
    question: String,

    /// Extra instruction steering planning and summary (audience, years, metrics...).
    #[arg(long)]
    focus: Option<String>,

    /// Directory of Markdown files describing the datasets.
    #[arg(long = "metadata-dir", default_value = "data/metadata")]
    metadata_dir: PathBuf,

    /// Chat API provider (openai|ollama).
    #[arg(long, value_parser = parse_provider)]
    provider: Option<Provider>,

    /// API base URL.
    #[arg(long = "base-url")]
    base_url: Option<String>,

    /// Model for the code and analysis agents.
    #[arg(long)]
    model: Option<String>,

    /// Model for the planner and summarizer.
    #[arg(long = "planner-model")]
    planner_model: Option<String>,

    /// Reject plans with this many steps or more.
    #[arg(long = "max-plan-steps")]
    max_plan_steps: Option<usize>,

    /// What to do when a dependency produced no table (best-effort|strict).
    #[arg(long = "dependency-policy", value_parser = parse_policy)]
    dependency_policy: Option<DependencyPolicy>,

    /// Python executable used by the sandbox.
    #[arg(long)]
    python: Option<String>,

    /// CSV file receiving one row per model call.
    #[arg(long = "usage-log")]
    usage_log: Option<PathBuf>,

    /// Do not write the usage log.
    #[arg(long = "no-usage-log", conflicts_with = "usage_log")]
    no_usage_log: bool,

    /// Export traces to this OTLP gRPC endpoint.
    #[arg(long = "otlp-endpoint")]
    otlp_endpoint: Option<String>,

    /// Log as JSON lines.
    #[arg(long = "json-logs")]
    json_logs: bool,

    /// Print Prometheus metrics to stderr before exiting.
    #[arg(long)]
    metrics: bool,
}

fn parse_provider(s: &str) -> Result<Provider, String> {
    s.parse()
}

fn parse_policy(s: &str) -> Result<DependencyPolicy, String> {
    s.parse()
}

impl Cli {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(provider) = self.provider {
            config.provider = provider;
        }
        if let Some(url) = &self.base_url {
            config.base_url = Some(url.clone());
        }
        if let Some(model) = &self.model {
            config.agent_model = model.clone();
        }
        if let Some(model) = &self.planner_model {
            config.planner_model = model.clone();
        }
        if let Some(max) = self.max_plan_steps {
            config.max_plan_steps = max;
        }
        if let Some(policy) = self.dependency_policy {
            config.dependency_policy = policy;
        }
        if let Some(python) = &self.python {
            config.python = python.clone();
        }
        if let Some(path) = &self.usage_log {
            config.usage_log = Some(path.clone());
        }
        if self.no_usage_log {
            config.usage_log = None;
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            config.otlp_endpoint = Some(endpoint.clone());
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dataplan: {}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    if let Err(e) = telemetry::init_tracing("dataplan", config.otlp_endpoint.as_deref(), cli.json_logs) {
        eprintln!("dataplan: failed to initialize tracing: {}", e);
    }

    let code = run(&cli, &config).await;

    if cli.metrics {
        eprintln!("{}", metrics::gather_text());
    }
    telemetry::shutdown_tracing();
    code
}

async fn run(cli: &Cli, config: &EngineConfig) -> ExitCode {
    let metadata = match load_metadata_text(&cli.metadata_dir) {
        Ok(text) => text,
        Err(e) => {
            error!(dir = %cli.metadata_dir.display(), error = %e, "Failed to load metadata");
            eprintln!("dataplan: cannot read metadata from {}: {}", cli.metadata_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let engine = match Engine::from_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("dataplan: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match engine.ask(&cli.question, cli.focus.as_deref(), &metadata).await {
        Ok(PlanOutcome::Clarification { question }) => {
            println!("Clarification needed: {}", question);
            ExitCode::from(2)
        }
        Ok(PlanOutcome::Completed(report)) => {
            for step in &report.steps {
                if let Some(err) = &step.error {
                    eprintln!("step {} ({}): {}", step.step_id, step.goal, err);
                }
            }
            info!(
                steps = report.steps.len(),
                artifacts = report.artifacts.len(),
                figures = report.figures.len(),
                "Report ready"
            );
            println!("{}", report.summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            eprintln!("dataplan: {}", e);
            ExitCode::FAILURE
        }
    }
}
