//! Logging and OpenTelemetry tracing setup
//!
//! Console logs always go to stderr so stdout stays free for the report.
//! When an OTLP endpoint is configured, spans (`agent_run`, `llm_call`,
//! `code_execution`, `plan_execution`, `plan_step`) are exported as well.
//!
//! ```text
//! dataplan → OTLP (gRPC) → OTel Collector → Tempo / Jaeger
//! ```

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,dataplan=debug";

/// Initialize logging, plus trace export when `otlp_endpoint` is given
///
/// # Arguments
/// * `service_name` - Name for the service in traces
/// * `otlp_endpoint` - OTLP gRPC endpoint, e.g. `http://localhost:4317`
/// * `json_logs` - Emit console logs as JSON lines
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
    json_logs: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let otel_layer = match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])))
                .install_batch(runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::debug!(
        service = service_name,
        otlp = otlp_endpoint.unwrap_or("disabled"),
        "Tracing initialized"
    );

    Ok(())
}

/// Flush pending spans to the collector
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
