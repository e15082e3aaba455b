//! Logging Setup
//!
//! `TigerStyle`: Optional subscriber installation with graceful failure.
//! Never panics when a global subscriber already exists.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vellum_storage::telemetry::{init_logging, LogFormat, LoggingConfig};
//!
//! // Defaults: RUST_LOG (or "info"), human-readable output
//! init_logging(&LoggingConfig::default()).expect("logging init");
//!
//! // Or configure explicitly
//! let config = LoggingConfig::builder()
//!     .filter("vellum_storage=debug")
//!     .format(LogFormat::Json)
//!     .build();
//! let _ = init_logging(&config);
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG` - Filter directives (default: "info")
//! - `VELLUM_LOG_FORMAT` - `pretty` or `json` (default: "pretty")

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const LOG_FILTER_DEFAULT: &str = "info";

/// Logging configuration errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Filter directives could not be parsed
    #[error("invalid log filter `{filter}`: {reason}")]
    InvalidFilter {
        /// The rejected directives
        filter: String,
        /// Parser message
        reason: String,
    },

    /// Subscriber installation failed
    #[error("logging initialization failed: {reason}")]
    InitFailed {
        /// The reason for the failure
        reason: String,
    },
}

/// Result type for logging setup
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directives
    pub filter: String,

    /// Output format
    pub format: LogFormat,

    /// Include span targets in output
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LoggingConfig {
    /// Read `RUST_LOG` and `VELLUM_LOG_FORMAT`, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            filter: std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_FILTER_DEFAULT.to_string()),
            format: std::env::var("VELLUM_LOG_FORMAT")
                .ok()
                .and_then(|raw| LogFormat::parse(&raw))
                .unwrap_or_default(),
            with_target: true,
        }
    }

    /// Create a new builder for `LoggingConfig`
    #[must_use]
    pub fn builder() -> LoggingConfigBuilder {
        LoggingConfigBuilder::default()
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        if self.filter.trim().is_empty() {
            return Err(TelemetryError::InvalidFilter {
                filter: self.filter.clone(),
                reason: "filter cannot be empty".to_string(),
            });
        }
        EnvFilter::try_new(&self.filter).map_err(|e| TelemetryError::InvalidFilter {
            filter: self.filter.clone(),
            reason: e.to_string(),
        })
    }
}

/// Builder for `LoggingConfig`
#[derive(Debug, Default)]
pub struct LoggingConfigBuilder {
    filter: Option<String>,
    format: Option<LogFormat>,
    with_target: Option<bool>,
}

impl LoggingConfigBuilder {
    /// Set the filter directives
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the output format
    #[must_use]
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Include or omit targets
    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = Some(with_target);
        self
    }

    /// Build the `LoggingConfig`
    #[must_use]
    pub fn build(self) -> LoggingConfig {
        let default = LoggingConfig::default();
        LoggingConfig {
            filter: self.filter.unwrap_or(default.filter),
            format: self.format.unwrap_or(default.format),
            with_target: self.with_target.unwrap_or(default.with_target),
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidFilter` for unparsable directives and
/// `TelemetryError::InitFailed` if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let installed = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| TelemetryError::InitFailed {
        reason: e.to_string(),
    })?;

    tracing::debug!(filter = %config.filter, format = ?config.format, "logging initialized");
    Ok(())
}
