//! Clock abstraction.
//!
//! Every place in the execution core that needs "now" (driver quantum
//! deadlines, exchange client backoff, scale-writer timing, task heartbeat
//! timestamps) takes a `Arc<dyn TimeProvider>` instead of calling
//! `Instant::now()`/`SystemTime::now()` directly, so tests can advance a
//! [`MockProvider`] deterministically instead of racing a wall clock.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::clone_on_ref_ptr
)]

use std::{
    fmt::Debug,
    ops::Add,
    sync::atomic::{AtomicI64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;

/// A point in time, represented as nanoseconds since the Unix epoch.
///
/// Using a fixed-point integer rather than [`std::time::Instant`] makes the
/// value `Copy`, comparable, and serializable, which the rest of the core
/// relies on (e.g. task heartbeat stats, backoff jitter seeding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(i64);

impl Time {
    /// The Unix epoch.
    pub const ZERO: Self = Self(0);

    /// Construct from milliseconds since the Unix epoch.
    pub fn from_timestamp_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Construct from nanoseconds since the Unix epoch.
    pub fn from_timestamp_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Nanoseconds since the Unix epoch.
    pub fn timestamp_nanos(&self) -> i64 {
        self.0
    }

    /// Duration elapsed between `earlier` and `self`. Saturates to
    /// [`Duration::ZERO`] if `self` is not after `earlier`.
    pub fn checked_duration_since(&self, earlier: Self) -> Option<Duration> {
        let delta = self.0 - earlier.0;
        if delta < 0 {
            None
        } else {
            Some(Duration::from_nanos(delta as u64))
        }
    }

    /// Like [`Self::checked_duration_since`] but saturates to zero instead
    /// of returning `None`.
    pub fn duration_since(&self, earlier: Self) -> Duration {
        self.checked_duration_since(earlier).unwrap_or_default()
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(rhs.as_nanos() as i64))
    }
}

/// A source of [`Time`], injected wherever "now" is needed.
///
/// Implementations must be cheap to call repeatedly: the driver scheduler
/// samples `now()` once per quantum boundary.
pub trait TimeProvider: Debug + Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Real wall-clock time.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemProvider;

impl SystemProvider {
    /// Construct a new provider backed by [`SystemTime::now`].
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_nanos() as i64;
        Time::from_timestamp_nanos(nanos)
    }
}

/// A [`TimeProvider`] with a time that only moves when told to, for
/// deterministic tests of quantum/backoff/scale-writer timing logic.
#[derive(Debug)]
pub struct MockProvider {
    now: Mutex<Time>,
    // monotonically increasing counter used only to make `Debug` stable
    // across clones in tests that print it.
    _generation: AtomicI64,
}

impl MockProvider {
    /// Create a new provider fixed at `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: Mutex::new(start),
            _generation: AtomicI64::new(0),
        }
    }

    /// Set the current time to an explicit value. Must be monotonically
    /// non-decreasing; callers that need to rewind should construct a new
    /// `MockProvider`.
    pub fn set(&self, time: Time) {
        let mut now = self.now.lock();
        assert!(time >= *now, "MockProvider time must not move backwards");
        *now = time;
        self._generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Advance the current time by `delta`.
    pub fn inc(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now = *now + delta;
        self._generation.fetch_add(1, Ordering::Relaxed);
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_advances_monotonically() {
        let provider = MockProvider::new(Time::from_timestamp_millis(0));
        assert_eq!(provider.now(), Time::from_timestamp_millis(0));

        provider.inc(Duration::from_millis(500));
        assert_eq!(provider.now(), Time::from_timestamp_millis(500));

        provider.set(Time::from_timestamp_millis(1_000));
        assert_eq!(provider.now(), Time::from_timestamp_millis(1_000));
    }

    #[test]
    #[should_panic(expected = "must not move backwards")]
    fn mock_provider_rejects_rewind() {
        let provider = MockProvider::new(Time::from_timestamp_millis(1_000));
        provider.set(Time::from_timestamp_millis(0));
    }

    #[test]
    fn duration_since_saturates_when_not_after() {
        let t0 = Time::from_timestamp_millis(0);
        let t1 = Time::from_timestamp_millis(100);
        assert_eq!(t1.duration_since(t0), Duration::from_millis(100));
        assert_eq!(t0.duration_since(t1), Duration::ZERO);
    }

    #[test]
    fn system_provider_moves_forward() {
        let provider = SystemProvider::new();
        let a = provider.now();
        std::thread::sleep(Duration::from_millis(5));
        let b = provider.now();
        assert!(b >= a);
    }
}
