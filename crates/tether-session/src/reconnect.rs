//! Reconnect policy and scheduling.
//!
//! [`BackoffPolicy`] is the pure delay function:
//! `delay(attempt) = min(base * 2^attempt, max)`. [`ReconnectScheduler`]
//! holds the consecutive-attempt counter and the single pending deadline.
//! The driver owns one scheduler and consults it on every retriable closure.

use std::time::Duration;

use tether_settings::ReconnectSettings;
use tokio::time::Instant;

/// Exponential backoff with a ceiling and an attempt budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    enabled: bool,
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl BackoffPolicy {
    /// Build a policy from explicit parameters.
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            enabled: true,
            base,
            max: max.max(base),
            max_attempts,
        }
    }

    /// Build a policy from settings.
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ..Self::new(
                Duration::from_millis(settings.base_delay_ms),
                Duration::from_millis(settings.max_delay_ms),
                settings.max_attempts,
            )
        }
    }

    /// Delay before attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(base_ms.saturating_mul(factor));
        delay.min(self.max)
    }

    /// Number of consecutive attempts allowed before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether automatic reconnection is enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Outcome of asking the scheduler for the next attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schedule {
    /// An attempt is armed.
    Armed {
        /// 0-based attempt number.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// The attempt budget is spent.
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
    },
    /// Automatic reconnection is turned off.
    Disabled,
}

/// Consecutive-attempt counter plus the pending reconnect deadline.
#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: BackoffPolicy,
    attempt: u32,
    deadline: Option<Instant>,
}

impl ReconnectScheduler {
    /// Create an idle scheduler.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            deadline: None,
        }
    }

    /// Arm the next attempt relative to `now`.
    pub fn schedule(&mut self, now: Instant) -> Schedule {
        if !self.policy.is_enabled() {
            return Schedule::Disabled;
        }
        if self.attempt >= self.policy.max_attempts() {
            self.deadline = None;
            return Schedule::Exhausted {
                attempts: self.attempt,
            };
        }
        let attempt = self.attempt;
        let delay = self.policy.delay(attempt);
        self.deadline = Some(now + delay);
        self.attempt += 1;
        Schedule::Armed { attempt, delay }
    }

    /// Consume the deadline if it has passed. Returns `true` when an attempt
    /// should start now.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(at) if at <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the pending deadline, keeping the counter.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Drop the pending deadline and zero the counter.
    pub fn reset(&mut self) {
        self.deadline = None;
        self.attempt = 0;
    }

    /// Pending deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Attempts made since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(3), Duration::from_secs(30), 8)
    }

    #[test]
    fn delay_doubles_until_ceiling() {
        let p = policy();
        assert_eq!(p.delay(0), Duration::from_secs(3));
        assert_eq!(p.delay(1), Duration::from_secs(6));
        assert_eq!(p.delay(2), Duration::from_secs(12));
        assert_eq!(p.delay(3), Duration::from_secs(24));
        assert_eq!(p.delay(4), Duration::from_secs(30));
        assert_eq!(p.delay(63), Duration::from_secs(30));
        assert_eq!(p.delay(200), Duration::from_secs(30));
    }

    #[test]
    fn from_settings_uses_configured_values() {
        let p = BackoffPolicy::from_settings(&ReconnectSettings::default());
        assert_eq!(p.delay(0), Duration::from_secs(3));
        assert_eq!(p.max_attempts(), 8);
        assert!(p.is_enabled());
    }

    #[test]
    fn max_below_base_is_lifted() {
        let p = BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(1), 3);
        assert_eq!(p.delay(0), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_counts_attempts_then_exhausts() {
        let mut s = ReconnectScheduler::new(BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2,
        ));
        let now = Instant::now();
        assert_eq!(
            s.schedule(now),
            Schedule::Armed {
                attempt: 0,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(s.deadline(), Some(now + Duration::from_millis(100)));
        assert_eq!(
            s.schedule(now),
            Schedule::Armed {
                attempt: 1,
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(s.schedule(now), Schedule::Exhausted { attempts: 2 });
        assert_eq!(s.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restarts_from_base_delay() {
        let mut s = ReconnectScheduler::new(policy());
        let now = Instant::now();
        let _ = s.schedule(now);
        let _ = s.schedule(now);
        s.reset();
        assert_eq!(s.attempt(), 0);
        assert_eq!(
            s.schedule(now),
            Schedule::Armed {
                attempt: 0,
                delay: Duration::from_secs(3)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn take_due_fires_once() {
        let mut s = ReconnectScheduler::new(policy());
        let now = Instant::now();
        let _ = s.schedule(now);
        assert!(!s.take_due(now));
        let later = now + Duration::from_secs(3);
        assert!(s.take_due(later));
        assert!(!s.take_due(later));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_keeps_counter() {
        let mut s = ReconnectScheduler::new(policy());
        let _ = s.schedule(Instant::now());
        s.cancel();
        assert_eq!(s.deadline(), None);
        assert_eq!(s.attempt(), 1);
    }

    #[test]
    fn disabled_policy_never_arms() {
        let settings = ReconnectSettings {
            enabled: false,
            ..ReconnectSettings::default()
        };
        let mut s = ReconnectScheduler::new(BackoffPolicy::from_settings(&settings));
        assert_eq!(s.schedule(Instant::now()), Schedule::Disabled);
        assert_eq!(s.deadline(), None);
    }

    proptest::proptest! {
        #[test]
        fn delay_is_monotonic_and_bounded(
            base_ms in 1u64..10_000,
            max_ms in 1u64..120_000,
            attempt in 0u32..100,
        ) {
            let p = BackoffPolicy::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
                8,
            );
            let d = p.delay(attempt);
            proptest::prop_assert!(d <= Duration::from_millis(max_ms.max(base_ms)));
            proptest::prop_assert!(d >= Duration::from_millis(base_ms));
            proptest::prop_assert!(p.delay(attempt + 1) >= d);
        }
    }
}
