//! Concurrency planning for the transcode pipeline.
//!
//! Derives the encoder process cap from CPU core count and configuration.

use crate::config::Config;

/// How many encoders may run at once, and on how many cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyPlan {
    /// Logical CPU cores detected at startup.
    pub total_cores: u32,
    /// Maximum number of ffmpeg processes running at once across all projects
    pub max_concurrent_transcodes: u32,
}

impl ConcurrencyPlan {
    /// Build the plan: an explicit configured cap wins, clamped to
    /// [1, 16]; zero derives one encoder per four detected cores,
    /// clamped to [1, 4].
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = num_cpus::get() as u32;

        let max_concurrent_transcodes = match cfg.limits.max_concurrent_transcodes {
            0 => derive_max_transcodes(total_cores),
            explicit => explicit.clamp(1, 16),
        };

        Self {
            total_cores,
            max_concurrent_transcodes,
        }
    }
}

/// Derive the encoder cap from core count
/// - one ffmpeg per four cores
/// - never below 1, never above 4
fn derive_max_transcodes(cores: u32) -> u32 {
    (cores / 4).clamp(1, 4)
}

/// Convenience wrapper over [`ConcurrencyPlan::derive`].
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // For any core count, the auto-derived cap grants one encoder per four
    // cores and stays within [1, 4].
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_auto_derived_cap_stays_in_bounds(
            cores in 1u32..256,
        ) {
            let cap = derive_max_transcodes(cores);

            prop_assert!(cap >= 1 && cap <= 4);

            let expected = (cores / 4).clamp(1, 4);
            prop_assert_eq!(cap, expected);
        }
    }

    // For any explicit non-zero configured cap, the plan uses it up to the
    // hard ceiling of 16.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_explicit_cap_is_honored_up_to_ceiling(
            explicit in 1u32..64,
        ) {
            let mut cfg = Config::default();
            cfg.limits.max_concurrent_transcodes = explicit;

            let plan = derive_plan(&cfg);
            prop_assert_eq!(plan.max_concurrent_transcodes, explicit.min(16));
        }
    }

    #[test]
    fn test_derive_boundaries() {
        assert_eq!(derive_max_transcodes(1), 1);
        assert_eq!(derive_max_transcodes(4), 1);
        assert_eq!(derive_max_transcodes(8), 2);
        assert_eq!(derive_max_transcodes(16), 4);
        assert_eq!(derive_max_transcodes(64), 4);
    }

    #[test]
    fn test_explicit_cap_clamped_to_ceiling() {
        let mut cfg = Config::default();
        cfg.limits.max_concurrent_transcodes = 64;
        assert_eq!(derive_plan(&cfg).max_concurrent_transcodes, 16);

        cfg.limits.max_concurrent_transcodes = 16;
        assert_eq!(derive_plan(&cfg).max_concurrent_transcodes, 16);
    }

    #[test]
    fn test_auto_cap_never_zero() {
        let cfg = Config::default();
        let plan = derive_plan(&cfg);
        assert!(plan.max_concurrent_transcodes >= 1);
    }
}
