//! PropertyTest - Random Operation Sequences Against Invariants
//!
//! `TigerStyle`: a system under test generates its own next operation from
//! the seeded stream, applies it, and re-checks its invariants. A failure
//! report carries the seed, the operation and the state needed to replay it.
//!
//! ```
//! use vellum_core::dst::{DeterministicRng, PropertyTest, PropertyTestable, SimClock};
//!
//! /// Appends grow the latest version; nothing shrinks it.
//! struct Latest(u64);
//!
//! impl PropertyTestable for Latest {
//!     type Operation = u64;
//!
//!     fn generate_operation(&self, rng: &mut DeterministicRng) -> u64 {
//!         rng.next_usize(1, 3) as u64
//!     }
//!
//!     fn apply_operation(&mut self, appended: &u64, _clock: &SimClock) {
//!         self.0 += appended;
//!     }
//!
//!     fn check_invariants(&self) -> Result<(), String> {
//!         Ok(())
//!     }
//! }
//!
//! assert!(PropertyTest::new(5).with_max_operations(50).run(Latest(0)).is_success());
//! ```

use std::fmt::Debug;

use super::clock::SimClock;
use super::rng::DeterministicRng;
use crate::constants::{DST_SIMULATION_STEPS_MAX, DST_TIME_ADVANCE_MS_MAX};

/// Operations per run unless overridden.
const PROPERTY_OPERATIONS_COUNT_DEFAULT: u64 = 100;

/// Largest random clock advance between operations unless overridden.
const PROPERTY_TIME_ADVANCE_MS_DEFAULT: u64 = 1_000;

/// A stateful system driven by random operations.
pub trait PropertyTestable {
    /// One step of the workload.
    type Operation: Debug + Clone;

    /// Choose the next step given the current state.
    fn generate_operation(&self, rng: &mut DeterministicRng) -> Self::Operation;

    /// Execute one step.
    fn apply_operation(&mut self, op: &Self::Operation, clock: &SimClock);

    /// Every invariant of the current state.
    ///
    /// # Errors
    /// Describes the first invariant found broken.
    fn check_invariants(&self) -> Result<(), String>;

    /// State summary for failure reports.
    fn describe_state(&self) -> String {
        String::from("(no state description)")
    }
}

/// Where a run broke.
#[derive(Debug)]
pub struct PropertyTestFailure {
    /// Zero-based index of the offending operation
    pub operation_index: u64,
    /// `Debug` rendering of that operation
    pub operation: String,
    /// The broken invariant
    pub message: String,
    /// `describe_state` after the operation
    pub state_description: String,
}

/// Outcome of a run.
#[derive(Debug)]
pub struct PropertyTestResult {
    /// Operations applied, including a failing one
    pub operations_executed: u64,
    /// Seed to replay with
    pub seed: u64,
    /// Present when an invariant broke
    pub failure: Option<PropertyTestFailure>,
}

impl PropertyTestResult {
    /// No invariant broke.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Panic with a replay report if an invariant broke.
    ///
    /// # Panics
    /// Panics when the run failed.
    pub fn assert_success(self) {
        let Some(failure) = self.failure else {
            return;
        };
        panic!(
            "Property test failed (replay with seed {seed})\n\
             operation #{index}: {op}\n\
             violated: {message}\n\
             state: {state}",
            seed = self.seed,
            index = failure.operation_index,
            op = failure.operation,
            message = failure.message,
            state = failure.state_description,
        );
    }
}

/// Runner configuration.
#[derive(Debug, Clone, Copy)]
pub struct PropertyTest {
    seed: u64,
    max_operations: u64,
    time_advance_ms_max: u64,
}

impl PropertyTest {
    /// A runner replaying from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_operations: PROPERTY_OPERATIONS_COUNT_DEFAULT,
            time_advance_ms_max: PROPERTY_TIME_ADVANCE_MS_DEFAULT,
        }
    }

    /// Operations to apply.
    ///
    /// # Panics
    /// Panics if `max` exceeds `DST_SIMULATION_STEPS_MAX`.
    #[must_use]
    pub fn with_max_operations(mut self, max: u64) -> Self {
        assert!(
            max <= DST_SIMULATION_STEPS_MAX,
            "{max} operations exceeds DST_SIMULATION_STEPS_MAX"
        );
        self.max_operations = max;
        self
    }

    /// Largest random clock advance between operations; 0 freezes time.
    ///
    /// # Panics
    /// Panics if `ms` exceeds `DST_TIME_ADVANCE_MS_MAX`.
    #[must_use]
    pub fn with_time_advance_ms_max(mut self, ms: u64) -> Self {
        assert!(
            ms <= DST_TIME_ADVANCE_MS_MAX,
            "{ms}ms advance exceeds DST_TIME_ADVANCE_MS_MAX"
        );
        self.time_advance_ms_max = ms;
        self
    }

    /// Drive `system` and report the first broken invariant.
    ///
    /// Invariants are checked before the first operation and after each one.
    #[must_use]
    pub fn run<T: PropertyTestable>(self, mut system: T) -> PropertyTestResult {
        let mut rng = DeterministicRng::new(self.seed);
        let clock = SimClock::new();

        if let Err(message) = system.check_invariants() {
            return self.report(0, 0, "(before first operation)".into(), message, &system);
        }

        for index in 0..self.max_operations {
            if self.time_advance_ms_max > 0 {
                let ceiling = usize::try_from(self.time_advance_ms_max).unwrap_or(usize::MAX);
                clock.advance_ms(rng.next_usize(0, ceiling) as u64);
            }

            let op = system.generate_operation(&mut rng);
            system.apply_operation(&op, &clock);

            if let Err(message) = system.check_invariants() {
                return self.report(index + 1, index, format!("{op:?}"), message, &system);
            }
        }

        self.report_success()
    }

    /// [`PropertyTest::run`], panicking on failure.
    ///
    /// # Panics
    /// Panics when an invariant breaks.
    pub fn run_and_assert<T: PropertyTestable>(self, system: T) {
        self.run(system).assert_success();
    }

    fn report_success(self) -> PropertyTestResult {
        PropertyTestResult {
            operations_executed: self.max_operations,
            seed: self.seed,
            failure: None,
        }
    }

    fn report<T: PropertyTestable>(
        self,
        executed: u64,
        operation_index: u64,
        operation: String,
        message: String,
        system: &T,
    ) -> PropertyTestResult {
        PropertyTestResult {
            operations_executed: executed,
            seed: self.seed,
            failure: Some(PropertyTestFailure {
                operation_index,
                operation,
                message,
                state_description: system.describe_state(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Live versions `[lowest, highest]` of one key; trimming cuts a prefix.
    struct Chain {
        live: Option<(u64, u64)>,
        highest: u64,
        corrupt_at: Option<u64>,
    }

    impl Chain {
        fn healthy() -> Self {
            Self { live: None, highest: 0, corrupt_at: None }
        }
    }

    #[derive(Debug, Clone)]
    enum Step {
        Append,
        TrimThrough(u64),
    }

    impl PropertyTestable for Chain {
        type Operation = Step;

        fn generate_operation(&self, rng: &mut DeterministicRng) -> Step {
            match self.live {
                Some((_, high)) if rng.next_bool(0.3) => {
                    Step::TrimThrough(rng.next_usize(1, high as usize) as u64)
                }
                _ => Step::Append,
            }
        }

        fn apply_operation(&mut self, step: &Step, _clock: &SimClock) {
            match *step {
                Step::Append => {
                    self.highest += 1;
                    let low = self.live.map_or(self.highest, |(low, _)| low);
                    self.live = Some((low, self.highest));
                }
                Step::TrimThrough(through) => {
                    self.live = self
                        .live
                        .filter(|(_, high)| through < *high)
                        .map(|(low, high)| (low.max(through + 1), high));
                }
            }
            if self.corrupt_at == Some(self.highest) {
                self.live = Some((self.highest + 1, self.highest));
            }
        }

        fn check_invariants(&self) -> Result<(), String> {
            match self.live {
                Some((low, high)) if low > high => Err(format!("hole: live range {low}..={high}")),
                _ => Ok(()),
            }
        }

        fn describe_state(&self) -> String {
            format!("live {:?}, highest {}", self.live, self.highest)
        }
    }

    #[test]
    fn test_prefix_trimming_keeps_chain_contiguous() {
        let result = PropertyTest::new(42).with_max_operations(500).run(Chain::healthy());

        assert!(result.is_success());
        assert_eq!(result.operations_executed, 500);
    }

    #[test]
    fn test_broken_invariant_is_reported() {
        let chain = Chain { corrupt_at: Some(3), ..Chain::healthy() };
        let result = PropertyTest::new(42)
            .with_max_operations(500)
            .with_time_advance_ms_max(0)
            .run(chain);

        let failure = result.failure.expect("corruption must be caught");
        assert!(failure.message.starts_with("hole"));
        assert!(failure.state_description.contains("highest 3"));
    }

    #[test]
    #[should_panic(expected = "replay with seed 1")]
    fn test_assert_names_seed() {
        let chain = Chain { corrupt_at: Some(1), ..Chain::healthy() };
        PropertyTest::new(1).run_and_assert(chain);
    }

    #[test]
    #[should_panic(expected = "exceeds DST_SIMULATION_STEPS_MAX")]
    fn test_operation_budget_bounded() {
        let _ = PropertyTest::new(1).with_max_operations(DST_SIMULATION_STEPS_MAX + 1);
    }
}
