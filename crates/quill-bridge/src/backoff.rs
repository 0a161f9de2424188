//! Adaptive poll interval
//!
//! The interval starts at `base`, grows geometrically once the observed
//! status has been unchanged for `patience` consecutive polls, never
//! exceeds `max`, and snaps back to `base` on any change.

use quill_core::config::PollerConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub patience: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &PollerConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_interval_ms),
            max: Duration::from_millis(config.max_interval_ms),
            multiplier: config.multiplier,
            patience: config.patience,
        }
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            current: self.base,
            unchanged: 0,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&PollerConfig::default())
    }
}

/// Running backoff state for one wait
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    unchanged: u32,
}

impl Backoff {
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record one observation and return the delay before the next poll
    pub fn observe(&mut self, changed: bool) -> Duration {
        if changed {
            self.unchanged = 0;
            self.current = self.policy.base;
            return self.current;
        }

        self.unchanged = self.unchanged.saturating_add(1);
        if self.unchanged >= self.policy.patience {
            let nanos = self.current.as_nanos() as f64 * self.policy.multiplier.max(1.0);
            self.current = Duration::from_nanos(nanos.round() as u64).min(self.policy.max);
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_holds_base_until_patience_runs_out() {
        let mut backoff = BackoffPolicy::default().start();
        let delays: Vec<Duration> = (0..4).map(|_| backoff.observe(false)).collect();
        assert_eq!(delays, vec![ms(200); 4]);

        assert_eq!(backoff.observe(false), ms(300));
        assert_eq!(backoff.observe(false), ms(450));
    }

    #[test]
    fn test_capped_at_max() {
        let mut backoff = BackoffPolicy::default().start();
        for _ in 0..50 {
            backoff.observe(false);
        }
        assert_eq!(backoff.current(), ms(2_000));
    }

    #[test]
    fn test_change_resets_to_base() {
        let mut backoff = BackoffPolicy::default().start();
        for _ in 0..10 {
            backoff.observe(false);
        }
        assert!(backoff.current() > ms(200));

        assert_eq!(backoff.observe(true), ms(200));
        // Patience starts over after a reset
        assert_eq!(backoff.observe(false), ms(200));
    }

    #[test]
    fn test_from_config() {
        let config = PollerConfig {
            base_interval_ms: 50,
            max_interval_ms: 75,
            multiplier: 2.0,
            patience: 1,
            default_wait_timeout_ms: 1_000,
        };
        let mut backoff = BackoffPolicy::from_config(&config).start();
        assert_eq!(backoff.observe(false), ms(75));
    }
}
