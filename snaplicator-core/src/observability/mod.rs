//! Observability infrastructure: tracing and metrics.
//!
//! Logging goes through `tracing`; durations and counters through the
//! `metrics` facade. Nothing here holds per-operation state: step timings
//! live in a [`StepRecorder`] owned by each orchestrator call.

use crate::error::{Result, SnapError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;
pub mod steps;

pub use steps::StepRecorder;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set. Logs go to stderr so command
/// output on stdout stays machine-readable.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| SnapError::config(format!("Invalid log level {:?}: {}", level, e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| SnapError::Internal(format!("Failed to initialize tracing: {}", e)))?;

    tracing::debug!("Observability initialized");
    Ok(())
}

/// Install an in-process Prometheus recorder and register metric metadata.
///
/// The returned handle renders the exposition text on demand.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SnapError::Internal(format!("Failed to install metrics recorder: {}", e)))?;
    metrics::register_core_metrics();
    Ok(handle)
}
