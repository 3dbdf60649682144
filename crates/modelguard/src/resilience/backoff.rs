//! Retry delay computation with additive jitter.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Delay growth strategy between retries of the same model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Every retry waits the base delay.
    #[default]
    Constant,
    /// Delay doubles per attempt, capped at the configured maximum.
    Exponential,
}

impl BackoffStrategy {
    /// Parse a strategy name. Unknown names fall back to constant rather
    /// than failing: a misspelled config must not turn retries off.
    pub fn from_name(name: &str) -> Self {
        match name {
            "exponential" => BackoffStrategy::Exponential,
            _ => BackoffStrategy::Constant,
        }
    }
}

impl<'de> Deserialize<'de> for BackoffStrategy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(BackoffStrategy::from_name(&name))
    }
}

/// Computes retry delays. Pure: all randomness comes from the caller's RNG.
pub struct BackoffCalculator;

impl BackoffCalculator {
    /// Non-jittered delay for a 0-based attempt index.
    pub fn base_delay(
        strategy: BackoffStrategy,
        base: Duration,
        max_delay: Duration,
        attempt: u32,
    ) -> Duration {
        match strategy {
            BackoffStrategy::Exponential => {
                let base_ms = base.as_millis() as u64;
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                let delay_ms = base_ms
                    .saturating_mul(factor)
                    .min(max_delay.as_millis() as u64);
                Duration::from_millis(delay_ms)
            }
            BackoffStrategy::Constant => base,
        }
    }

    /// Full delay including uniform jitter in `[0, 0.5 × delay]`.
    ///
    /// Jitter is strictly additive: callers never sleep less than the
    /// computed base delay.
    pub fn delay_with_jitter<R: Rng + ?Sized>(
        rng: &mut R,
        strategy: BackoffStrategy,
        base: Duration,
        max_delay: Duration,
        attempt: u32,
    ) -> Duration {
        let delay = Self::base_delay(strategy, base, max_delay, attempt);
        if delay.is_zero() {
            return delay;
        }
        let jitter_ms = rng.random_range(0.0..=0.5) * delay.as_millis() as f64;
        delay + Duration::from_millis(jitter_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_constant_strategy_ignores_attempt_index() {
        let base = Duration::from_millis(250);
        for attempt in [0, 1, 7, 31] {
            assert_eq!(
                BackoffCalculator::base_delay(
                    BackoffStrategy::Constant,
                    base,
                    Duration::from_secs(30),
                    attempt
                ),
                base
            );
        }
    }

    #[test]
    fn test_exponential_progression_and_cap() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_millis(250);
        let delay = |attempt| {
            BackoffCalculator::base_delay(BackoffStrategy::Exponential, base, cap, attempt)
        };
        assert_eq!(delay(0), Duration::from_millis(100));
        assert_eq!(delay(1), Duration::from_millis(200));
        assert_eq!(delay(2), Duration::from_millis(250));
        assert_eq!(delay(40), Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_strategy_name_is_constant() {
        assert_eq!(BackoffStrategy::from_name("fibonacci"), BackoffStrategy::Constant);
        assert_eq!(BackoffStrategy::from_name(""), BackoffStrategy::Constant);
        assert_eq!(
            BackoffStrategy::from_name("exponential"),
            BackoffStrategy::Exponential
        );

        let parsed: BackoffStrategy = serde_json::from_str("\"decorrelated\"").unwrap();
        assert_eq!(parsed, BackoffStrategy::Constant);
    }

    proptest! {
        #[test]
        fn prop_exponential_is_monotone_and_capped(
            base_ms in 1u64..5_000,
            cap_ms in 1u64..120_000,
            a in 0u32..64,
            b in 0u32..64,
        ) {
            let base = Duration::from_millis(base_ms);
            let cap = Duration::from_millis(cap_ms);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let d_lo = BackoffCalculator::base_delay(BackoffStrategy::Exponential, base, cap, lo);
            let d_hi = BackoffCalculator::base_delay(BackoffStrategy::Exponential, base, cap, hi);
            prop_assert!(d_lo <= d_hi);
            prop_assert!(d_hi <= cap);
        }

        #[test]
        fn prop_jitter_stays_within_bounds(
            base_ms in 1u64..5_000,
            attempt in 0u32..16,
            seed in any::<u64>(),
        ) {
            let base = Duration::from_millis(base_ms);
            let cap = Duration::from_secs(60);
            let mut rng = StdRng::seed_from_u64(seed);

            let plain = BackoffCalculator::base_delay(BackoffStrategy::Exponential, base, cap, attempt);
            let jittered = BackoffCalculator::delay_with_jitter(
                &mut rng,
                BackoffStrategy::Exponential,
                base,
                cap,
                attempt,
            );
            prop_assert!(jittered >= plain);
            prop_assert!(jittered.as_millis() <= plain.as_millis() + plain.as_millis() / 2 + 1);
        }

        #[test]
        fn prop_jitter_is_deterministic_for_a_seed(seed in any::<u64>()) {
            let base = Duration::from_millis(400);
            let cap = Duration::from_secs(60);
            let d1 = BackoffCalculator::delay_with_jitter(
                &mut StdRng::seed_from_u64(seed),
                BackoffStrategy::Exponential,
                base,
                cap,
                2,
            );
            let d2 = BackoffCalculator::delay_with_jitter(
                &mut StdRng::seed_from_u64(seed),
                BackoffStrategy::Exponential,
                base,
                cap,
                2,
            );
            prop_assert_eq!(d1, d2);
        }
    }
}
