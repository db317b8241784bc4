//! Process-wide `tracing` setup.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use pairline_settings::LoggingSettings;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level {0:?}")]
    InvalidLevel(String),
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "pairline_client" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self, TelemetryError> {
        let log_level = parse_level(&settings.level)?;
        let module_levels = settings
            .modules
            .iter()
            .map(|(module, level)| Ok((module.clone(), parse_level(level)?)))
            .collect::<Result<Vec<_>, TelemetryError>>()?;
        Ok(Self {
            log_level,
            module_levels,
            json: settings.json,
        })
    }
}

fn parse_level(raw: &str) -> Result<Level, TelemetryError> {
    raw.parse()
        .map_err(|_| TelemetryError::InvalidLevel(raw.to_string()))
}

/// Filter directive equivalent to the configured levels, e.g.
/// `info,pairline_client=debug`.
pub fn build_filter_directive(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter_str = build_filter_directive(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))
}
