//! Circuit breaker for the upstream document API
//!
//! Repeated upstream failures open the circuit so callers fail fast
//! instead of stacking slow requests behind a dead service.

use quill_core::{Clock, SystemClock};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Too many failures - reject requests immediately
    Open,
    /// Cooldown elapsed - allow a probe request
    HalfOpen,
}

/// Consecutive-failure circuit breaker
///
/// # Example
///
/// ```
/// use quill_upstream::CircuitBreaker;
///
/// let cb = CircuitBreaker::default();
/// cb.record_failure();
/// cb.record_failure();
/// cb.record_failure();
/// assert!(!cb.can_execute());
/// ```
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    /// Unix millis of the most recent failure
    last_failure: AtomicI64,
    threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Open after `threshold` consecutive failures, probe again after `cooldown`
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self::with_clock(threshold, cooldown, Arc::new(SystemClock))
    }

    pub fn with_clock(threshold: u32, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            last_failure: AtomicI64::new(0),
            threshold,
            cooldown,
            clock,
        }
    }

    fn elapsed_since_failure_ms(&self) -> u64 {
        let now = self.clock.now().timestamp_millis();
        let last = self.last_failure.load(Ordering::Relaxed);
        u64::try_from(now.saturating_sub(last)).unwrap_or(0)
    }

    pub fn state(&self) -> CircuitState {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            return CircuitState::Closed;
        }
        if self.elapsed_since_failure_ms() >= self.cooldown.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.last_failure
            .store(self.clock.now().timestamp_millis(), Ordering::Relaxed);
    }

    /// True unless the circuit is open
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Milliseconds until a probe is allowed, 0 if not open
    pub fn time_until_retry(&self) -> u64 {
        match self.state() {
            CircuitState::Open => {
                (self.cooldown.as_millis() as u64).saturating_sub(self.elapsed_since_failure_ms())
            }
            _ => 0,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}
