//! Vellum Core - Constants and Deterministic Simulation
//!
//! TigerStyle: every limit is a named constant, every source of
//! nondeterminism (randomness, time, faults) is injectable.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Vellum Core                    │
//! ├─────────────────────────────────────────────┤
//! │  Constants            │ Retry, paging, DST  │
//! ├─────────────────────────────────────────────┤
//! │  DeterministicRng     │ Seeded ChaCha20     │
//! │  SimClock             │ Controllable time   │
//! │  FaultInjector        │ Storage faults      │
//! │  PropertyTest         │ Invariant checking  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use vellum_core::dst::{DeterministicRng, FaultConfig, FaultInjectorBuilder, FaultType};
//!
//! let faults = Arc::new(
//!     FaultInjectorBuilder::new(DeterministicRng::new(42))
//!         .with_fault(FaultConfig::new(FaultType::StorageConflict, 1.0).with_max_injections(2))
//!         .build(),
//! );
//! assert_eq!(faults.should_inject("plain.insert"), Some(FaultType::StorageConflict));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod dst;

pub use constants::*;
pub use dst::{
    DeterministicRng, FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType, PropertyTest,
    PropertyTestFailure, PropertyTestResult, PropertyTestable, SimClock, SimConfig,
};
