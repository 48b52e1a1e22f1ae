//! # Restart delay policy.
//!
//! [`BackoffPolicy`] decides how long the supervisor waits between cleaning up a
//! crashed process and spawning its replacement. It is parameterized by:
//! - [`BackoffPolicy::first`] the delay before the first restart;
//! - [`BackoffPolicy::factor`] the multiplicative growth per restart;
//! - [`BackoffPolicy::max`] the cap.
//!
//! The delay for restart index `n` (0-based) is `first × factor^n`, clamped to `max`,
//! then jitter is applied. The default is a constant 3s (`factor = 1.0`).
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(3),
//!     max: Duration::from_secs(30),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(3));
//! assert_eq!(backoff.next(1), Duration::from_secs(6));
//! assert_eq!(backoff.next(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Delay policy applied before each restart.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    pub first: Duration,
    /// Maximum delay.
    pub max: Duration,
    /// Multiplicative growth factor (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied on top of the computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant 3s delay, capped at 30s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(3),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Returns a constant policy that always waits `delay`.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay for the given restart index (0-based).
    ///
    /// Non-finite or negative intermediate values clamp to [`BackoffPolicy::max`].
    pub fn next(&self, restart_index: u32) -> Duration {
        let exp = restart_index.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_constant_three_seconds() {
        let policy = BackoffPolicy::default();
        for n in 0..20 {
            assert_eq!(policy.next(n), Duration::from_secs(3), "restart #{n}");
        }
    }

    #[test]
    fn exponential_growth_is_capped() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(500),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.next(0), Duration::from_millis(500));
        assert_eq!(policy.next(1), Duration::from_secs(1));
        assert_eq!(policy.next(2), Duration::from_secs(2));
        assert_eq!(policy.next(4), Duration::from_secs(5));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(60),
            max: Duration::from_secs(10),
            factor: 1.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.next(0), Duration::from_secs(10));
    }

    #[test]
    fn equal_jitter_stays_within_half_and_full() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..BackoffPolicy::constant(Duration::from_secs(2))
        };
        for n in 0..50 {
            let d = policy.next(n);
            assert!(d >= Duration::from_secs(1), "{d:?}");
            assert!(d <= Duration::from_secs(2), "{d:?}");
        }
    }
}
