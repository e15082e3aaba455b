//! FaultInjector - Seeded Storage Faults
//!
//! `TigerStyle`: faults are registered up front, rolled from a seeded
//! stream, and counted so tests can assert how many fired.
//!
//! Storage primitives name themselves `<flavor>.<primitive>`
//! (`plain.write`, `historical.append`, ...). A fault's filter is matched
//! as a substring, so `"append"` targets every append and `"plain."`
//! targets every plain primitive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::rng::DeterministicRng;
use crate::constants::DST_FAULT_PROBABILITY_MAX;

/// What an injected fault does to a storage primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    /// The read fails
    StorageReadFail,
    /// The write fails before touching state
    StorageWriteFail,
    /// The delete fails before touching state
    StorageDeleteFail,
    /// The conditional write reports a lost race and writes nothing
    StorageConflict,
}

impl FaultType {
    /// Stable name used in logs and error messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StorageReadFail => "storage_read_fail",
            Self::StorageWriteFail => "storage_write_fail",
            Self::StorageDeleteFail => "storage_delete_fail",
            Self::StorageConflict => "storage_conflict",
        }
    }

    /// A lost race, as opposed to a failure.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StorageConflict)
    }
}

/// One registered fault.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    fault_type: FaultType,
    probability: f64,
    filter: Option<String>,
    cap: Option<u64>,
}

impl FaultConfig {
    /// Fire `fault_type` with `probability` on every primitive.
    ///
    /// # Panics
    /// Panics if `probability` lies outside `[0, DST_FAULT_PROBABILITY_MAX]`.
    #[must_use]
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        assert!(
            (0.0..=DST_FAULT_PROBABILITY_MAX).contains(&probability),
            "fault probability {probability} outside [0, {DST_FAULT_PROBABILITY_MAX}]"
        );
        Self {
            fault_type,
            probability,
            filter: None,
            cap: None,
        }
    }

    /// Restrict to primitives whose name contains `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Stop firing after `cap` injections.
    ///
    /// # Panics
    /// Panics if `cap` is zero.
    #[must_use]
    pub fn with_max_injections(mut self, cap: u64) -> Self {
        assert!(cap > 0, "injection cap must be positive");
        self.cap = Some(cap);
        self
    }
}

#[derive(Debug)]
struct Armed {
    config: FaultConfig,
    fired: AtomicU64,
}

impl Armed {
    fn eligible(&self, operation: &str) -> bool {
        let targeted = self
            .config
            .filter
            .as_deref()
            .map_or(true, |filter| operation.contains(filter));
        let under_cap = self
            .config
            .cap
            .map_or(true, |cap| self.fired.load(Ordering::SeqCst) < cap);
        targeted && under_cap
    }
}

/// Shared, seeded source of storage faults.
///
/// Built once through [`FaultInjectorBuilder`] and shared via `Arc`.
#[derive(Debug)]
pub struct FaultInjector {
    rng: Mutex<DeterministicRng>,
    armed: Vec<Armed>,
}

impl FaultInjector {
    /// Roll for `operation`.
    ///
    /// Faults are tried in registration order; the first eligible one whose
    /// roll succeeds fires.
    pub fn should_inject(&self, operation: &str) -> Option<FaultType> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let armed = self
            .armed
            .iter()
            .filter(|armed| armed.eligible(operation))
            .find(|armed| rng.next_bool(armed.config.probability))?;

        armed.fired.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(operation, fault = armed.config.fault_type.as_str(), "fault injected");
        Some(armed.config.fault_type)
    }

    /// How often faults of `fault_type` have fired.
    #[must_use]
    pub fn injections(&self, fault_type: FaultType) -> u64 {
        self.armed
            .iter()
            .filter(|armed| armed.config.fault_type == fault_type)
            .map(|armed| armed.fired.load(Ordering::SeqCst))
            .sum()
    }

    /// How often any fault has fired.
    #[must_use]
    pub fn total_injections(&self) -> u64 {
        self.armed.iter().map(|armed| armed.fired.load(Ordering::SeqCst)).sum()
    }
}

/// Registers faults before the injector is shared.
#[derive(Debug)]
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    configs: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    /// Start with no faults, rolling from `rng`.
    #[must_use]
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            configs: Vec::new(),
        }
    }

    /// Register a fault.
    #[must_use]
    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Freeze the registrations.
    #[must_use]
    pub fn build(self) -> FaultInjector {
        FaultInjector {
            rng: Mutex::new(self.rng),
            armed: self
                .configs
                .into_iter()
                .map(|config| Armed {
                    config,
                    fired: AtomicU64::new(0),
                })
                .collect(),
        }
    }
}
