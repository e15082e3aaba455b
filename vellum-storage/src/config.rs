//! Configuration - Retry, Paging and Backend Settings
//!
//! `TigerStyle`: Defaults come from named constants; every value is
//! validated before use and invalid input is an error, never a panic.
//!
//! # Environment
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `VELLUM_RETRY_POLICY` | `constant`, `linear` or `exponential` |
//! | `VELLUM_RETRY_MAX_ATTEMPTS` | attempts per optimistic write |
//! | `VELLUM_RETRY_INTERVAL_MS` | base backoff interval |
//! | `VELLUM_RETRY_RATE` | linear / exponential rate |
//! | `VELLUM_RETRY_MAX_DELAY_MS` | backoff cap |
//! | `VELLUM_KEY_PAGE_SIZE` | key enumeration page size |
//! | `VELLUM_DOCUMENT_ENDPOINT` | SurrealDB endpoint (`mem://`, `ws://...`) |
//! | `VELLUM_DOCUMENT_NAMESPACE` / `VELLUM_DOCUMENT_DATABASE` | SurrealDB scope |
//! | `VELLUM_POSTGRES_URL` | relational connection string |
//! | `VELLUM_POSTGRES_MAX_CONNECTIONS` | relational pool size |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use vellum_core::constants::{
    DOCUMENT_DATABASE_DEFAULT, DOCUMENT_ENDPOINT_DEFAULT, DOCUMENT_NAMESPACE_DEFAULT,
    KEY_PAGE_SIZE_COUNT_DEFAULT, KEY_PAGE_SIZE_COUNT_MAX, POSTGRES_CONNECTIONS_COUNT_DEFAULT,
    RETRY_ATTEMPTS_COUNT_DEFAULT, RETRY_ATTEMPTS_COUNT_MAX, RETRY_DELAY_MS_CEILING,
    RETRY_DELAY_MS_MAX_DEFAULT, RETRY_INTERVAL_MS_DEFAULT, RETRY_RATE_DEFAULT,
};

use crate::retry::{ConstantRetry, ExponentialRetry, LinearRetry, RetryStrategy};
use crate::storage::{StorageError, StorageResult};

// =============================================================================
// Retry
// =============================================================================

/// Backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Fixed interval
    Constant,
    /// `interval * rate * attempt`
    Linear,
    /// `interval * rate^attempt`
    #[default]
    Exponential,
}

impl FromStr for RetryPolicy {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "constant" => Ok(Self::Constant),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(StorageError::invalid_argument(format!(
                "unknown retry policy `{other}`"
            ))),
        }
    }
}

/// Settings for the retry strategy every optimistic engine uses.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// Backoff shape
    pub policy: RetryPolicy,
    /// Attempts per optimistic write, including the first
    pub max_attempts: u32,
    /// Base interval in milliseconds
    pub interval_ms: u64,
    /// Linear / exponential rate; ignored by `Constant`
    pub rate: f64,
    /// Backoff cap in milliseconds; ignored by `Constant`
    pub max_delay_ms: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            max_attempts: RETRY_ATTEMPTS_COUNT_DEFAULT,
            interval_ms: RETRY_INTERVAL_MS_DEFAULT,
            rate: RETRY_RATE_DEFAULT,
            max_delay_ms: Some(RETRY_DELAY_MS_MAX_DEFAULT),
        }
    }
}

impl RetrySettings {
    /// Check ranges without building.
    ///
    /// # Errors
    /// Returns `InvalidArgument` naming the first out-of-range field.
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_attempts == 0 || self.max_attempts > RETRY_ATTEMPTS_COUNT_MAX {
            return Err(StorageError::invalid_argument(format!(
                "max_attempts must be in [1, {RETRY_ATTEMPTS_COUNT_MAX}], got {}",
                self.max_attempts
            )));
        }
        if self.interval_ms > RETRY_DELAY_MS_CEILING {
            return Err(StorageError::invalid_argument(format!(
                "interval_ms must be <= {RETRY_DELAY_MS_CEILING}, got {}",
                self.interval_ms
            )));
        }
        let rate_floor = match self.policy {
            RetryPolicy::Constant => return Ok(()),
            RetryPolicy::Linear => 0.0,
            RetryPolicy::Exponential => 1.0,
        };
        if !self.rate.is_finite() || self.rate < rate_floor || self.rate == 0.0 {
            return Err(StorageError::invalid_argument(format!(
                "rate {} is invalid for {:?} retry",
                self.rate, self.policy
            )));
        }
        Ok(())
    }

    /// Build the configured strategy.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if validation fails.
    pub fn build(&self) -> StorageResult<Arc<dyn RetryStrategy>> {
        self.validate()?;

        let interval = Duration::from_millis(self.interval_ms);
        let max_delay = self.max_delay_ms.map(Duration::from_millis);

        Ok(match self.policy {
            RetryPolicy::Constant => Arc::new(ConstantRetry::new(self.max_attempts, interval)),
            RetryPolicy::Linear => {
                let retry = LinearRetry::new(self.max_attempts, interval, self.rate);
                match max_delay {
                    Some(cap) => Arc::new(retry.with_max_delay(cap)),
                    None => Arc::new(retry),
                }
            }
            RetryPolicy::Exponential => {
                let retry = ExponentialRetry::new(self.max_attempts, interval, self.rate);
                match max_delay {
                    Some(cap) => Arc::new(retry.with_max_delay(cap)),
                    None => Arc::new(retry),
                }
            }
        })
    }
}

// =============================================================================
// Backends
// =============================================================================

/// Where the document store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSettings {
    /// SurrealDB endpoint
    pub endpoint: String,
    /// Namespace
    pub namespace: String,
    /// Database
    pub database: String,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self::memory()
    }
}

impl DocumentSettings {
    /// In-process store.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            endpoint: DOCUMENT_ENDPOINT_DEFAULT.to_string(),
            namespace: DOCUMENT_NAMESPACE_DEFAULT.to_string(),
            database: DOCUMENT_DATABASE_DEFAULT.to_string(),
        }
    }
}

/// Where the relational store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    /// `postgres://` connection string
    pub url: String,
    /// Pool size
    pub max_connections: u32,
}

impl PostgresSettings {
    /// Connect to `url` with the default pool size.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: POSTGRES_CONNECTIONS_COUNT_DEFAULT,
        }
    }
}

// =============================================================================
// StorageConfig
// =============================================================================

/// Everything needed to connect backends and build engines.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Retry strategy settings
    pub retry: RetrySettings,
    /// Page size for lazy key enumeration
    pub key_page_size: usize,
    /// Document store, when enabled
    pub document: Option<DocumentSettings>,
    /// Relational store, when enabled
    pub postgres: Option<PostgresSettings>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            key_page_size: KEY_PAGE_SIZE_COUNT_DEFAULT,
            document: None,
            postgres: None,
        }
    }
}

impl StorageConfig {
    /// Create with defaults: local backend only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Set the key enumeration page size.
    #[must_use]
    pub fn with_key_page_size(mut self, key_page_size: usize) -> Self {
        self.key_page_size = key_page_size;
        self
    }

    /// Enable the document store.
    #[must_use]
    pub fn with_document(mut self, document: DocumentSettings) -> Self {
        self.document = Some(document);
        self
    }

    /// Enable the relational store.
    #[must_use]
    pub fn with_postgres(mut self, postgres: PostgresSettings) -> Self {
        self.postgres = Some(postgres);
        self
    }

    /// Check every setting.
    ///
    /// # Errors
    /// Returns `InvalidArgument` naming the first invalid setting.
    pub fn validate(&self) -> StorageResult<()> {
        self.retry.validate()?;
        if self.key_page_size == 0 || self.key_page_size > KEY_PAGE_SIZE_COUNT_MAX {
            return Err(StorageError::invalid_argument(format!(
                "key_page_size must be in [1, {KEY_PAGE_SIZE_COUNT_MAX}], got {}",
                self.key_page_size
            )));
        }
        if let Some(document) = &self.document {
            if document.endpoint.is_empty()
                || document.namespace.is_empty()
                || document.database.is_empty()
            {
                return Err(StorageError::invalid_argument(
                    "document endpoint, namespace and database must be set",
                ));
            }
        }
        if let Some(postgres) = &self.postgres {
            if !(postgres.url.starts_with("postgres://")
                || postgres.url.starts_with("postgresql://"))
            {
                return Err(StorageError::invalid_argument(
                    "postgres url must start with postgres:// or postgresql://",
                ));
            }
            if postgres.max_connections == 0 {
                return Err(StorageError::invalid_argument(
                    "postgres max_connections must be positive",
                ));
            }
        }
        Ok(())
    }

    /// Read `VELLUM_*` variables over the defaults.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for unparsable or out-of-range values.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`StorageConfig::from_env`], reading through `lookup`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for unparsable or out-of-range values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StorageResult<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("VELLUM_RETRY_POLICY") {
            config.retry.policy = raw.parse()?;
        }
        if let Some(raw) = lookup("VELLUM_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_var("VELLUM_RETRY_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("VELLUM_RETRY_INTERVAL_MS") {
            config.retry.interval_ms = parse_var("VELLUM_RETRY_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("VELLUM_RETRY_RATE") {
            config.retry.rate = parse_var("VELLUM_RETRY_RATE", &raw)?;
        }
        if let Some(raw) = lookup("VELLUM_RETRY_MAX_DELAY_MS") {
            config.retry.max_delay_ms = Some(parse_var("VELLUM_RETRY_MAX_DELAY_MS", &raw)?);
        }
        if let Some(raw) = lookup("VELLUM_KEY_PAGE_SIZE") {
            config.key_page_size = parse_var("VELLUM_KEY_PAGE_SIZE", &raw)?;
        }

        if let Some(endpoint) = lookup("VELLUM_DOCUMENT_ENDPOINT") {
            let defaults = DocumentSettings::memory();
            config.document = Some(DocumentSettings {
                endpoint,
                namespace: lookup("VELLUM_DOCUMENT_NAMESPACE").unwrap_or(defaults.namespace),
                database: lookup("VELLUM_DOCUMENT_DATABASE").unwrap_or(defaults.database),
            });
        }

        if let Some(url) = lookup("VELLUM_POSTGRES_URL") {
            let mut postgres = PostgresSettings::new(url);
            if let Some(raw) = lookup("VELLUM_POSTGRES_MAX_CONNECTIONS") {
                postgres.max_connections = parse_var("VELLUM_POSTGRES_MAX_CONNECTIONS", &raw)?;
            }
            config.postgres = Some(postgres);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> StorageResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| StorageError::invalid_argument(format!("{name}=`{raw}`: {e}")))
}
