//! Global atomic counters for grading runs.
//!
//! Counters are bumped silently where things happen. Call [`Metrics::flush`]
//! to report them as one `tracing::info!` event, e.g. when a batch ends.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    oracle_calls: AtomicU64,
    oracle_failures: AtomicU64,
    visual_tasks: AtomicU64,
    visual_failures: AtomicU64,
    totals_corrections: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            oracle_calls: AtomicU64::new(0),
            oracle_failures: AtomicU64::new(0),
            visual_tasks: AtomicU64::new(0),
            visual_failures: AtomicU64::new(0),
            totals_corrections: AtomicU64::new(0),
        }
    }

    pub fn inc_oracle_calls(&self) {
        self.oracle_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "oracle_calls", "counter incremented");
    }

    pub fn inc_oracle_failures(&self) {
        self.oracle_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "oracle_failures", "counter incremented");
    }

    pub fn inc_visual_tasks(&self) {
        self.visual_tasks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "visual_tasks", "counter incremented");
    }

    pub fn inc_visual_failures(&self) {
        self.visual_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "visual_failures", "counter incremented");
    }

    pub fn inc_totals_corrections(&self) {
        self.totals_corrections.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "totals_corrections", "counter incremented");
    }

    /// Emit all current values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            oracle_calls = self.oracle_calls(),
            oracle_failures = self.oracle_failures(),
            visual_tasks = self.visual_tasks(),
            visual_failures = self.visual_failures(),
            totals_corrections = self.totals_corrections(),
        );
    }

    pub fn oracle_calls(&self) -> u64 {
        self.oracle_calls.load(Ordering::Relaxed)
    }

    pub fn oracle_failures(&self) -> u64 {
        self.oracle_failures.load(Ordering::Relaxed)
    }

    pub fn visual_tasks(&self) -> u64 {
        self.visual_tasks.load(Ordering::Relaxed)
    }

    pub fn visual_failures(&self) -> u64 {
        self.visual_failures.load(Ordering::Relaxed)
    }

    pub fn totals_corrections(&self) -> u64 {
        self.totals_corrections.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.oracle_calls.store(0, Ordering::Relaxed);
        self.oracle_failures.store(0, Ordering::Relaxed);
        self.visual_tasks.store(0, Ordering::Relaxed);
        self.visual_failures.store(0, Ordering::Relaxed);
        self.totals_corrections.store(0, Ordering::Relaxed);
    }
}
