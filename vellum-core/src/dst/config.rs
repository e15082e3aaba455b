//! SimConfig - Seed and Step Budget for a Simulated Run
//!
//! `TigerStyle`: a run is fully described by its seed; a randomly chosen
//! seed is logged so the run can be replayed with `VELLUM_DST_SEED`.

use rand::Rng;

use crate::constants::DST_SIMULATION_STEPS_MAX;

/// Environment variable holding a replay seed.
pub const SIM_SEED_ENV: &str = "VELLUM_DST_SEED";

/// Seed plus operation budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    seed: u64,
    steps_max: u64,
}

impl SimConfig {
    /// Fixed seed, full step budget.
    ///
    /// ```
    /// use vellum_core::dst::SimConfig;
    ///
    /// let config = SimConfig::with_seed(2024).with_steps_max(300);
    /// assert_eq!((config.seed(), config.steps_max()), (2024, 300));
    /// ```
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            steps_max: DST_SIMULATION_STEPS_MAX,
        }
    }

    /// Seed from `VELLUM_DST_SEED`, or a fresh one that gets logged.
    ///
    /// # Panics
    /// Panics if `VELLUM_DST_SEED` is set to something other than a `u64`.
    #[must_use]
    pub fn from_env_or_random() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`SimConfig::from_env_or_random`] over an arbitrary variable source.
    ///
    /// # Panics
    /// Panics if the seed variable is present but unparsable.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let Some(raw) = lookup(SIM_SEED_ENV) else {
            let seed = rand::thread_rng().gen::<u64>();
            tracing::info!(seed, "random DST seed; replay with {SIM_SEED_ENV}={seed}");
            return Self::with_seed(seed);
        };

        match raw.trim().parse::<u64>() {
            Ok(seed) => Self::with_seed(seed),
            Err(_) => panic!("{SIM_SEED_ENV} is not a u64: {raw:?}"),
        }
    }

    /// Replay seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Operation budget.
    #[must_use]
    pub fn steps_max(&self) -> u64 {
        self.steps_max
    }

    /// Shrink the operation budget.
    ///
    /// # Panics
    /// Panics unless `1 <= steps_max <= DST_SIMULATION_STEPS_MAX`.
    #[must_use]
    pub fn with_steps_max(mut self, steps_max: u64) -> Self {
        assert!(
            (1..=DST_SIMULATION_STEPS_MAX).contains(&steps_max),
            "steps_max {steps_max} outside 1..=DST_SIMULATION_STEPS_MAX"
        );
        self.steps_max = steps_max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_from_lookup() {
        let config = SimConfig::from_lookup(|name| {
            (name == SIM_SEED_ENV).then(|| " 31337 ".to_string())
        });
        assert_eq!(config, SimConfig::with_seed(31337));
    }

    #[test]
    fn test_missing_seed_keeps_full_budget() {
        let config = SimConfig::from_lookup(|_| None);
        assert_eq!(config.steps_max(), DST_SIMULATION_STEPS_MAX);
    }

    #[test]
    #[should_panic(expected = "is not a u64")]
    fn test_garbage_seed_panics() {
        let _ = SimConfig::from_lookup(|_| Some("seven".to_string()));
    }

    #[test]
    #[should_panic(expected = "outside 1..=DST_SIMULATION_STEPS_MAX")]
    fn test_zero_budget_panics() {
        let _ = SimConfig::with_seed(1).with_steps_max(0);
    }
}
