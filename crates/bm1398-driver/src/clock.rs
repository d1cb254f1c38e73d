//! Time source and polling
//!
//! Every settle delay and poll loop in the driver goes through a [`Clock`].
//! On hardware that is [`SystemClock`]; tests use [`VirtualClock`], whose
//! `sleep` advances time instantly so a full chain bring-up (several
//! seconds of settle delays) runs in microseconds and its timing can be
//! asserted exactly.

use crate::error::Result;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source with blocking sleep.
pub trait Clock: Send + Sync + Debug {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time via [`Instant`] and [`std::thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated time. `sleep` returns immediately after advancing the clock.
#[derive(Debug, Default)]
pub struct VirtualClock {
    nanos: AtomicU64,
}

impl VirtualClock {
    /// Clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Poll `condition` every `interval` until it returns `true` or `timeout`
/// has elapsed.
///
/// The condition is always checked at least once and once more after the
/// deadline passes, so a condition that becomes true during the final sleep
/// is not reported as a timeout.
///
/// Returns `Ok(true)` if the condition was met and `Ok(false)` on timeout.
///
/// # Errors
///
/// Propagates the first error returned by `condition`.
pub fn poll_until<F>(clock: &dyn Clock, interval: Duration, timeout: Duration, mut condition: F) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    let start = clock.now();
    loop {
        if condition()? {
            return Ok(true);
        }
        if clock.now().saturating_sub(start) >= timeout {
            return Ok(false);
        }
        clock.sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_sleep_advances_time() {
        let clock = VirtualClock::new();
        clock.sleep(Duration::from_millis(700));
        clock.sleep(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(710));
    }

    #[test]
    fn poll_succeeds_after_some_attempts() {
        let clock = VirtualClock::new();
        let mut calls = 0;
        let met = poll_until(&clock, Duration::from_millis(1), Duration::from_secs(1), || {
            calls += 1;
            Ok(calls == 5)
        })
        .unwrap();
        assert!(met);
        assert_eq!(calls, 5);
        assert_eq!(clock.now(), Duration::from_millis(4));
    }

    #[test]
    fn poll_times_out() {
        let clock = VirtualClock::new();
        let met = poll_until(&clock, Duration::from_millis(1), Duration::from_millis(10), || Ok(false)).unwrap();
        assert!(!met);
        assert_eq!(clock.now(), Duration::from_millis(10));
    }

    #[test]
    fn poll_propagates_errors() {
        let clock = VirtualClock::new();
        let res = poll_until(&clock, Duration::from_millis(1), Duration::from_millis(10), || {
            Err(crate::DriverError::validation("boom"))
        });
        assert!(res.is_err());
    }
}
