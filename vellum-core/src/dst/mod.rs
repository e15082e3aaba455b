//! DST - Deterministic Simulation Testing
//!
//! Everything nondeterministic in a storage test is injected from here:
//! the random workload, the clock that stamps audits, and the faults that
//! make conditional writes lose their race.
//!
//! ```rust
//! use vellum_core::dst::{DeterministicRng, SimClock, SimConfig};
//!
//! let config = SimConfig::with_seed(42);
//! let mut rng = DeterministicRng::new(config.seed());
//! let clock = SimClock::at_ms(1_000);
//!
//! let key = rng.next_key("acct", 4);
//! clock.advance_ms(rng.next_usize(1, 50) as u64);
//! assert!(key.starts_with("acct-"));
//! assert!(clock.now_ms() > 1_000);
//! ```
//!
//! A failing randomized run prints its seed; replay it with
//! `VELLUM_DST_SEED=<seed> cargo test`.

mod clock;
mod config;
mod fault;
mod property;
mod rng;

pub use clock::SimClock;
pub use config::{SimConfig, SIM_SEED_ENV};
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use property::{PropertyTest, PropertyTestFailure, PropertyTestResult, PropertyTestable};
pub use rng::DeterministicRng;
