//! # Bounded restart policy.
//!
//! [`RestartPolicy`] is the static rule: how many restarts are allowed and how
//! long to wait before each one. [`RestartTracker`] is the mutable counter the
//! control loop owns, together with the last known health status.
//!
//! ```text
//! crash ──► RestartTracker::on_crash()
//!             ├─ count >= max  ─► Exhausted          (terminal)
//!             └─ otherwise     ─► Restart{attempt, delay}, count += 1
//!
//! startup marker ──► RestartTracker::mark_healthy()       (count kept)
//!
//! probe ──► RestartTracker::on_health(ok)
//!             ├─ ok && !healthy ─► Restored{reset_from}   (count := 0)
//!             ├─ !ok            ─► Unhealthy
//!             └─ ok && healthy  ─► Unchanged
//! ```
//!
//! One successful probe after a failure is taken as proof of stability; there is
//! no separate "N consecutive successes" window. A restart that reports ready is
//! healthy from the start, so passing probes alone never clear the count and a
//! service that keeps crashing still runs into the bound.

use std::time::Duration;

use crate::policies::backoff::BackoffPolicy;

/// Static restart rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RestartPolicy {
    /// Maximum number of restarts before giving up.
    pub max_restarts: u32,
    /// Delay before each restart.
    pub backoff: BackoffPolicy,
}

impl Default for RestartPolicy {
    /// 10 restarts, constant 3s delay.
    fn default() -> Self {
        Self {
            max_restarts: 10,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Outcome of [`RestartTracker::on_crash`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart after `delay`; `attempt` is the new restart count (1-based).
    Restart { attempt: u32, delay: Duration },
    /// The budget is used up.
    Exhausted { restarts: u32 },
}

/// Outcome of [`RestartTracker::on_health`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthTransition {
    /// Healthy again after being unhealthy. `reset_from` holds the restart
    /// count that was cleared, if it was non-zero.
    Restored { reset_from: Option<u32> },
    /// The probe failed.
    Unhealthy,
    /// Still healthy.
    Unchanged,
}

/// Mutable restart counter plus the last known health flag.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    policy: RestartPolicy,
    count: u32,
    healthy: bool,
}

impl RestartTracker {
    /// Creates a tracker with a zero count and unknown (unhealthy) status.
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            count: 0,
            healthy: false,
        }
    }

    /// Current restart count.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Last known health status.
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// The static policy.
    #[inline]
    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Resets counter and health, as done at `start()`.
    pub fn reset(&mut self) {
        self.count = 0;
        self.healthy = false;
    }

    /// Marks the health as unknown, e.g. after the process was torn down.
    pub fn forget_health(&mut self) {
        self.healthy = false;
    }

    /// Records that the process reported readiness. The count is kept.
    pub fn mark_healthy(&mut self) {
        self.healthy = true;
    }

    /// Registers a crash and decides whether to restart.
    pub fn on_crash(&mut self) -> RestartDecision {
        self.healthy = false;
        if self.count >= self.policy.max_restarts {
            return RestartDecision::Exhausted {
                restarts: self.count,
            };
        }
        let delay = self.policy.backoff.next(self.count);
        self.count += 1;
        RestartDecision::Restart {
            attempt: self.count,
            delay,
        }
    }

    /// Registers a probe result and applies the reset rule.
    pub fn on_health(&mut self, ok: bool) -> HealthTransition {
        match (ok, self.healthy) {
            (true, true) => HealthTransition::Unchanged,
            (true, false) => {
                self.healthy = true;
                let reset_from = (self.count > 0).then_some(self.count);
                self.count = 0;
                HealthTransition::Restored { reset_from }
            }
            (false, _) => {
                self.healthy = false;
                HealthTransition::Unhealthy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(max: u32) -> RestartTracker {
        RestartTracker::new(RestartPolicy {
            max_restarts: max,
            backoff: BackoffPolicy::constant(Duration::from_secs(3)),
        })
    }

    #[test]
    fn restarts_up_to_bound_then_exhausts() {
        let mut t = tracker(2);
        assert_eq!(
            t.on_crash(),
            RestartDecision::Restart {
                attempt: 1,
                delay: Duration::from_secs(3)
            }
        );
        assert_eq!(
            t.on_crash(),
            RestartDecision::Restart {
                attempt: 2,
                delay: Duration::from_secs(3)
            }
        );
        assert_eq!(t.on_crash(), RestartDecision::Exhausted { restarts: 2 });
        assert_eq!(t.on_crash(), RestartDecision::Exhausted { restarts: 2 });
        assert_eq!(t.count(), 2);
    }

    #[test]
    fn zero_budget_is_immediately_exhausted() {
        let mut t = tracker(0);
        assert_eq!(t.on_crash(), RestartDecision::Exhausted { restarts: 0 });
    }

    #[test]
    fn failure_then_success_resets_count() {
        let mut t = tracker(5);
        t.on_crash();
        t.on_crash();
        assert_eq!(t.on_health(false), HealthTransition::Unhealthy);
        assert!(!t.is_healthy());
        assert_eq!(
            t.on_health(true),
            HealthTransition::Restored { reset_from: Some(2) }
        );
        assert!(t.is_healthy());
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn ready_restart_keeps_count_until_a_check_fails() {
        let mut t = tracker(5);
        t.on_crash();
        t.mark_healthy();
        assert_eq!(t.on_health(true), HealthTransition::Unchanged);
        assert_eq!(t.count(), 1);

        t.on_crash();
        t.mark_healthy();
        assert_eq!(t.count(), 2);
        assert_eq!(t.on_health(false), HealthTransition::Unhealthy);
        assert_eq!(
            t.on_health(true),
            HealthTransition::Restored { reset_from: Some(2) }
        );
    }

    #[test]
    fn repeated_successes_keep_count_at_zero() {
        let mut t = tracker(5);
        t.on_crash();
        t.on_health(true);
        assert_eq!(t.on_health(true), HealthTransition::Unchanged);
        assert_eq!(t.on_health(true), HealthTransition::Unchanged);
        assert_eq!(t.count(), 0);
    }

    #[test]
    fn restored_without_prior_restarts_reports_no_reset() {
        let mut t = tracker(5);
        assert_eq!(
            t.on_health(true),
            HealthTransition::Restored { reset_from: None }
        );
    }

    #[test]
    fn exponential_backoff_uses_previous_count() {
        let mut t = RestartTracker::new(RestartPolicy {
            max_restarts: 3,
            backoff: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(60),
                factor: 2.0,
                jitter: Default::default(),
            },
        });
        let delays: Vec<_> = (0..3)
            .map(|_| match t.on_crash() {
                RestartDecision::Restart { delay, .. } => delay,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }
}
