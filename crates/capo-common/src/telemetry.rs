//! Logging initialization
//!
//! JSON structured logs through `tracing-subscriber`, filtered by `RUST_LOG`
//! with a provider-friendly default.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "info,capo=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to install the global subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,
    /// Emit JSON instead of human-readable lines
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "capo-operator".to_string(),
            json: true,
        }
    }
}

/// Install the global tracing subscriber
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}
