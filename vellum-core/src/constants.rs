//! TigerStyle Constants
//!
//! All limits use big-endian naming: `CATEGORY_SPECIFICS_UNIT_LIMIT`
//! Example: `RETRY_ATTEMPTS_COUNT_DEFAULT` (not `DEFAULT_RETRY_ATTEMPTS`)
//!
//! Every constant includes units in the name:
//! - _`COUNT_MAX/DEFAULT` for quantity limits
//! - _MS for milliseconds
//! - _`BYTES_MAX` for size limits

// =============================================================================
// Retry Limits
// =============================================================================

/// Default maximum number of attempts for an optimistic write cycle
pub const RETRY_ATTEMPTS_COUNT_DEFAULT: u32 = 10;

/// Upper bound accepted for the attempt cap
pub const RETRY_ATTEMPTS_COUNT_MAX: u32 = 1_000;

/// Default base interval between attempts
pub const RETRY_INTERVAL_MS_DEFAULT: u64 = 10;

/// Default growth rate for linear and exponential backoff
pub const RETRY_RATE_DEFAULT: f64 = 2.0;

/// Default cap applied to linear and exponential delays
pub const RETRY_DELAY_MS_MAX_DEFAULT: u64 = 1_000;

/// Hard ceiling on any single backoff delay (1 minute)
pub const RETRY_DELAY_MS_CEILING: u64 = 60_000;

// =============================================================================
// Record Limits
// =============================================================================

/// Maximum size of an encoded key payload
pub const KEY_CONTENT_BYTES_MAX: usize = 64 * 1024; // 64KB

/// Maximum size of an encoded value payload
pub const VALUE_CONTENT_BYTES_MAX: usize = 16 * 1024 * 1024; // 16MB

/// Maximum length of a logical type name
pub const TYPE_NAME_BYTES_MAX: usize = 512;

// =============================================================================
// Enumeration Limits
// =============================================================================

/// Default number of keys fetched per page during lazy key enumeration
pub const KEY_PAGE_SIZE_COUNT_DEFAULT: usize = 256;

/// Maximum number of keys fetched per page
pub const KEY_PAGE_SIZE_COUNT_MAX: usize = 10_000;

// =============================================================================
// Backend Connection Limits
// =============================================================================

/// Default Postgres pool size
pub const POSTGRES_CONNECTIONS_COUNT_DEFAULT: u32 = 10;

/// Default document store namespace
pub const DOCUMENT_NAMESPACE_DEFAULT: &str = "vellum";

/// Default document store database
pub const DOCUMENT_DATABASE_DEFAULT: &str = "storage";

/// Default document store endpoint (in-process)
pub const DOCUMENT_ENDPOINT_DEFAULT: &str = "mem://";

// =============================================================================
// DST (Deterministic Simulation Testing) Limits
// =============================================================================

/// Maximum number of simulation steps
pub const DST_SIMULATION_STEPS_MAX: u64 = 1_000_000;

/// Maximum probability for fault injection (1.0 = 100%)
pub const DST_FAULT_PROBABILITY_MAX: f64 = 1.0;

/// Maximum time advance per step in milliseconds
pub const DST_TIME_ADVANCE_MS_MAX: u64 = 86_400_000; // 24 hours
