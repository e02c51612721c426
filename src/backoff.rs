//! Reconnect backoff policy
//!
//! The delay for failure streak `n` is `initial × multiplier^n`, clamped to
//! `max`. It depends only on the streak length, so it is the same whatever
//! failed (connect, subscribe, backlog or receive).
//!
//! Delays never decrease as the streak grows, whatever the fields hold: a
//! multiplier below 1.0 (or NaN) grows by 1.0, and an initial delay above
//! `max` is clamped to `max`. [`BackoffPolicy::validate`] reports such
//! policies for callers that want to reject them instead.

use std::time::Duration;

/// Delay between reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub initial: Duration,
    /// Upper bound for any delay
    pub max: Duration,
    /// Growth factor per consecutive failure (`>= 1.0`)
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay regardless of the failure streak
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
        }
    }

    pub fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }

    /// Delay to wait after `failures` consecutive failures (0 for the first)
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.growth().powi(exponent);

        if !secs.is_finite() || secs < 0.0 || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Multiplier actually applied; never below 1.0
    fn growth(&self) -> f64 {
        if self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        }
    }

    /// Check the policy produces non-decreasing, capped delays
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() {
            return Err("multiplier must be finite".to_string());
        }
        if self.multiplier < 1.0 {
            return Err(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.initial > self.max {
            return Err(format!(
                "initial delay {:?} exceeds max delay {:?}",
                self.initial, self.max
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::exponential(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
        );
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_secs(1));
        assert_eq!(policy.delay(1000), Duration::from_secs(1));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_fixed_policy() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(60));
        for failures in [0, 1, 5, 100] {
            assert_eq!(policy.delay(failures), Duration::from_secs(60));
        }
    }

    #[test]
    fn test_zero_delay_policy() {
        let policy = BackoffPolicy::fixed(Duration::ZERO);
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(10), Duration::ZERO);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        let shrinking =
            BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1), 0.5);
        assert!(shrinking.validate().is_err());

        let inverted =
            BackoffPolicy::exponential(Duration::from_secs(5), Duration::from_secs(1), 2.0);
        assert!(inverted.validate().is_err());

        let nan = BackoffPolicy::exponential(
            Duration::from_millis(100),
            Duration::from_secs(1),
            f64::NAN,
        );
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_negative_multiplier_does_not_oscillate() {
        let policy =
            BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(10), -2.0);
        let delays: Vec<_> = (0..5).map(|n| policy.delay(n)).collect();
        assert_eq!(delays, vec![Duration::from_millis(100); 5]);
    }

    #[test]
    fn test_shrinking_multiplier_holds_initial_delay() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(10), 0.5);
        for failures in [0, 1, 2, 3, 50] {
            assert_eq!(policy.delay(failures), Duration::from_secs(1));
        }

        let nan =
            BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1), f64::NAN);
        assert_eq!(nan.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn test_initial_above_max_is_capped() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(5), Duration::from_secs(1), 2.0);
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn prop_delay_monotonic_and_capped(
            initial_ms in 0u64..10_000,
            extra_ms in 0u64..100_000,
            multiplier in 1.0f64..8.0,
            failures in 0u32..200,
        ) {
            let policy = BackoffPolicy::exponential(
                Duration::from_millis(initial_ms),
                Duration::from_millis(initial_ms + extra_ms),
                multiplier,
            );
            prop_assert!(policy.validate().is_ok());

            let current = policy.delay(failures);
            let next = policy.delay(failures + 1);
            prop_assert!(current <= policy.max);
            prop_assert!(next >= current);
        }

        #[test]
        fn prop_delay_monotonic_for_any_fields(
            initial_ms in 0u64..10_000,
            max_ms in 0u64..100_000,
            multiplier in -8.0f64..8.0,
            failures in 0u32..200,
        ) {
            let policy = BackoffPolicy::exponential(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                multiplier,
            );

            let current = policy.delay(failures);
            prop_assert!(current <= policy.max);
            prop_assert!(policy.delay(failures + 1) >= current);
        }
    }
}
