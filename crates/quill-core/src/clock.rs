//! Time source abstraction
//!
//! Queue deadlines, cache expiry and poll backoff all read time through
//! [`Clock`] so they can be driven deterministically in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{QuillError, Result};

/// Source of wall-clock time and sleeping
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the system time and the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually advanced clock for tests
///
/// `sleep` advances the clock by the requested duration instead of waiting,
/// and records every requested delay so backoff schedules can be asserted.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    /// Delays requested through `sleep`, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// `now + after`, or a validation error when the sum is out of range
pub fn deadline_after(now: DateTime<Utc>, after: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            QuillError::Validation(format!("Duration of {}ms is out of range", after.as_millis()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::default();
        let start = clock.now();

        clock.sleep(Duration::from_millis(200)).await;
        clock.sleep(Duration::from_millis(300)).await;

        assert_eq!((clock.now() - start).num_milliseconds(), 500);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(200), Duration::from_millis(300)]
        );
    }

    #[test]
    fn test_deadline_after_rejects_overflow() {
        let now = Utc::now();
        let deadline = deadline_after(now, Duration::from_millis(1_500)).unwrap();
        assert_eq!((deadline - now).num_milliseconds(), 1_500);

        let err = deadline_after(now, Duration::from_millis(10_000_000_000_000_000)).unwrap_err();
        assert!(matches!(err, QuillError::Validation(_)));
        assert!(deadline_after(now, Duration::MAX).is_err());
    }

    #[tokio::test]
    async fn test_system_clock_sleeps() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_millis(10)).await;
        assert!((clock.now() - start).num_milliseconds() >= 9);
    }
}
