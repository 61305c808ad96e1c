//! A small, dependency-light metrics facade.
//!
//! The execution core is instrumented with counters, gauges, and duration
//! histograms at a handful of points (bytes buffered in a memory manager,
//! pages pushed through an output buffer, driver quanta executed, exchange
//! client retries, scheduling rounds). This crate provides just enough of a
//! `Registry` to register and read those instruments back out in tests; it
//! does not attempt to be a full observability pipeline (no exporters, no
//! aggregation windows) since that is explicitly out of this core's scope.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

/// A monotonic counter of `u64` events.
#[derive(Debug, Default)]
pub struct U64Counter(AtomicU64);

impl U64Counter {
    /// Increment the counter by `delta`.
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value.
    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge that can move up or down.
#[derive(Debug, Default)]
pub struct U64Gauge(AtomicI64);

impl U64Gauge {
    /// Set the gauge to an absolute value.
    pub fn set(&self, value: u64) {
        self.0.store(value as i64, Ordering::Relaxed);
    }

    /// Apply a signed delta to the gauge.
    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value. Panics if the gauge has gone negative, which would
    /// indicate a caller bug (more decrements than increments).
    pub fn fetch(&self) -> u64 {
        let v = self.0.load(Ordering::Relaxed);
        assert!(v >= 0, "gauge underflowed to {v}");
        v as u64
    }
}

/// A histogram of observed durations, summarized as count/sum only (no
/// bucket tracking) since the core only needs aggregate throughput, not
/// latency percentiles, at its instrumentation points.
#[derive(Debug, Default)]
pub struct DurationHistogram {
    count: AtomicU64,
    sum_nanos: AtomicU64,
}

impl DurationHistogram {
    /// Record one observation.
    pub fn record(&self, duration: std::time::Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Number of observations recorded.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observations.
    pub fn sum(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.sum_nanos.load(Ordering::Relaxed))
    }
}

/// A named instrument registry, roughly analogous to a `prometheus::Registry`
/// but storing the instrument handles directly so callers clone `Arc`s
/// instead of re-resolving by name on every update.
#[derive(Debug, Default)]
pub struct Registry {
    counters: Mutex<HashMap<&'static str, Arc<U64Counter>>>,
    gauges: Mutex<HashMap<&'static str, Arc<U64Gauge>>>,
    histograms: Mutex<HashMap<&'static str, Arc<DurationHistogram>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a named counter.
    pub fn counter(&self, name: &'static str) -> Arc<U64Counter> {
        Arc::clone(
            self.counters
                .lock()
                .entry(name)
                .or_insert_with(|| Arc::new(U64Counter::default())),
        )
    }

    /// Get or create a named gauge.
    pub fn gauge(&self, name: &'static str) -> Arc<U64Gauge> {
        Arc::clone(
            self.gauges
                .lock()
                .entry(name)
                .or_insert_with(|| Arc::new(U64Gauge::default())),
        )
    }

    /// Get or create a named duration histogram.
    pub fn histogram(&self, name: &'static str) -> Arc<DurationHistogram> {
        Arc::clone(
            self.histograms
                .lock()
                .entry(name)
                .or_insert_with(|| Arc::new(DurationHistogram::default())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let reg = Registry::new();
        let c = reg.counter("pages_emitted");
        c.inc(1);
        c.inc(2);
        assert_eq!(reg.counter("pages_emitted").fetch(), 3);
    }

    #[test]
    fn gauge_tracks_deltas() {
        let reg = Registry::new();
        let g = reg.gauge("bytes_buffered");
        g.add(100);
        g.add(-40);
        assert_eq!(g.fetch(), 60);
    }

    #[test]
    #[should_panic(expected = "underflowed")]
    fn gauge_panics_on_underflow() {
        let reg = Registry::new();
        let g = reg.gauge("bytes_buffered");
        g.add(-1);
        g.fetch();
    }

    #[test]
    fn histogram_tracks_count_and_sum() {
        let reg = Registry::new();
        let h = reg.histogram("quantum_duration");
        h.record(std::time::Duration::from_millis(10));
        h.record(std::time::Duration::from_millis(20));
        assert_eq!(h.count(), 2);
        assert_eq!(h.sum(), std::time::Duration::from_millis(30));
    }
}
