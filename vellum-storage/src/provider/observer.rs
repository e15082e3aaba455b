//! Write Observers
//!
//! `TigerStyle`: Per-attempt and per-outcome reporting is injected into the
//! write cycle instead of formatted inline.

use std::fmt::Debug;

use crate::storage::KeyRecord;

/// How one attempt of a write cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A value already existed and was returned unchanged
    Found,
    /// The first version was written
    Added,
    /// A successor version was written
    Updated,
    /// A delete applied
    Removed,
    /// Another writer won the race; the cycle may retry
    Conflict,
    /// The retry budget ran out
    Exhausted,
    /// The backend or a factory failed
    Failed,
}

impl AttemptOutcome {
    /// Outcome name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "found",
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Conflict => "conflict",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
        }
    }
}

/// Receives write-cycle events.
pub trait WriteObserver: Send + Sync + Debug {
    /// Attempt number `attempt` of `operation` is starting.
    fn on_attempt(&self, _operation: &str, _key: &KeyRecord, _attempt: u32) {}

    /// Attempt number `attempt` of `operation` ended with `outcome`.
    fn on_outcome(&self, operation: &str, key: &KeyRecord, attempt: u32, outcome: AttemptOutcome);
}

/// Reports write-cycle events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl WriteObserver for TracingObserver {
    fn on_attempt(&self, operation: &str, key: &KeyRecord, attempt: u32) {
        tracing::trace!(operation, key_id = %key.id, value_type = %key.value_type, attempt, "write attempt");
    }

    fn on_outcome(&self, operation: &str, key: &KeyRecord, attempt: u32, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Found
            | AttemptOutcome::Added
            | AttemptOutcome::Updated
            | AttemptOutcome::Removed => {
                tracing::debug!(
                    operation,
                    key_id = %key.id,
                    value_type = %key.value_type,
                    attempt,
                    outcome = outcome.as_str(),
                    "write settled"
                );
            }
            AttemptOutcome::Conflict => {
                tracing::debug!(
                    operation,
                    key_id = %key.id,
                    value_type = %key.value_type,
                    attempt,
                    "lost write race, retrying"
                );
            }
            AttemptOutcome::Exhausted | AttemptOutcome::Failed => {
                tracing::warn!(
                    operation,
                    key_id = %key.id,
                    value_type = %key.value_type,
                    attempt,
                    outcome = outcome.as_str(),
                    "write gave up"
                );
            }
        }
    }
}
