//! Storage Errors
//!
//! `TigerStyle`: Explicit error types with context.
//!
//! Backend conflict signals (duplicate key, foreign-key violation,
//! version mismatch) never reach this enum: each backend classifies them as
//! a lost race and the write cycle retries. Only exhausted retries and
//! genuine failures surface here.

use thiserror::Error;

/// Errors from storage operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Optimistic write lost every race it was allowed to retry
    #[error("concurrency conflict: {operation} gave up after {attempts} attempts")]
    ConcurrencyConflict {
        /// Operation that gave up
        operation: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Caller supplied an argument outside the accepted domain
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong
        message: String,
    },

    /// No provider registered for a value type
    #[error("no {kind} provider configured for value type `{value_type}`")]
    NotConfigured {
        /// Logical value type name
        value_type: String,
        /// Provider flavor (plain, historical, partitioned) or backend name
        kind: String,
    },

    /// Operation cancelled through its cancellation token
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// Operation that observed the cancellation
        operation: String,
    },

    /// Connection error
    #[error("connection error: {message}")]
    Connection {
        /// Connection error message
        message: String,
    },

    /// Query error
    #[error("query error: {message}")]
    Query {
        /// Query error message
        message: String,
    },

    /// Value or key could not be encoded
    #[error("serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },

    /// Stored payload could not be decoded
    #[error("deserialization error: {message}")]
    Deserialization {
        /// Error message
        message: String,
    },

    /// Simulated fault (for DST)
    #[error("simulated fault: {fault_type}")]
    SimulatedFault {
        /// Type of simulated fault
        fault_type: String,
    },

    /// Internal error
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl StorageError {
    /// Create a concurrency conflict error.
    #[must_use]
    pub fn conflict(operation: impl Into<String>, attempts: u32) -> Self {
        Self::ConcurrencyConflict {
            operation: operation.into(),
            attempts,
        }
    }

    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a not-configured error.
    #[must_use]
    pub fn not_configured(value_type: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::NotConfigured {
            value_type: value_type.into(),
            kind: kind.into(),
        }
    }

    /// Create a cancellation error.
    #[must_use]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a query error.
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a deserialization error.
    #[must_use]
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization {
            message: message.into(),
        }
    }

    /// Create a simulated fault error.
    #[must_use]
    pub fn simulated_fault(fault_type: impl Into<String>) -> Self {
        Self::SimulatedFault {
            fault_type: fault_type.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a transient error (the caller may retry the call).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::Connection { .. } | Self::SimulatedFault { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
