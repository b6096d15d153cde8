//! Logging setup for Anonchat Server.
//!
//! Structured logs go through `tracing`; this module installs the global
//! subscriber. OpenTelemetry metrics recorded by `anonchat-core` use the
//! global meter provider and stay no-ops until an exporter is installed.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,anonchat_server=debug,anonchat_core=debug";

/// Initialize the global tracing subscriber.
///
/// # Configuration
///
/// - `RUST_LOG`: Log filter (default: `info,anonchat_server=debug,anonchat_core=debug`)
/// - `format`: pretty console output or one JSON object per line
pub fn init(format: LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let pretty_layer = matches!(format, LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
    });

    let json_layer = matches!(format, LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .json()
            .with_current_span(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty_layer)
        .with(json_layer)
        .try_init()?;

    tracing::info!(format = %format, "Telemetry initialized");

    Ok(())
}

/// Shutdown telemetry.
///
/// Call this before application exit so the final log lines are emitted.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
