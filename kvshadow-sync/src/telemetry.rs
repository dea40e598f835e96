//! Tracing subscriber initialisation.

use kvshadow_core::{ConfigError, KvShadowResult};
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "kvshadow_sync=info,kvshadow_storage=info,warn";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line, human-readable output.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(ConfigError::InvalidValue {
                field: "KVSHADOW_LOG_FORMAT".to_string(),
                value: other.to_string(),
                reason: "expected 'json' or 'pretty'".to_string(),
            }),
        }
    }
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Filter directives. `None` falls back to [`DEFAULT_LOG_FILTER`].
    pub filter: Option<String>,
}

impl TelemetryConfig {
    /// Read `KVSHADOW_LOG_FORMAT` (`json` | `pretty`) and `RUST_LOG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let format = match std::env::var("KVSHADOW_LOG_FORMAT") {
            Ok(raw) => raw.parse()?,
            Err(_) => LogFormat::default(),
        };
        Ok(Self {
            format,
            filter: std::env::var("RUST_LOG").ok().filter(|s| !s.trim().is_empty()),
        })
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        let directives = self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
        EnvFilter::try_new(directives).map_err(|e| ConfigError::InvalidValue {
            field: "RUST_LOG".to_string(),
            value: directives.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call returns a config error.
pub fn init_tracing(config: &TelemetryConfig) -> KvShadowResult<()> {
    let filter = config.env_filter()?;
    let (json, pretty) = match config.format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer().pretty())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "tracing_subscriber".to_string(),
            value: format!("{:?}", config.format),
            reason: format!("failed to init subscriber: {}", e),
        })?;

    tracing::info!(format = ?config.format, "Tracing initialized");
    Ok(())
}
