//! Global atomic counters for labcheck observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Counters::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global counters singleton.
pub static COUNTERS: Counters = Counters::new();

/// Lightweight atomic counters. No allocation, no locking.
pub struct Counters {
    checks_executed: AtomicU64,
    cache_hits: AtomicU64,
    reconnects: AtomicU64,
    connect_failures: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            checks_executed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
        }
    }

    /// A check actually ran (cache hits do not count).
    pub fn inc_checks_executed(&self) {
        self.checks_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "checks_executed", "counter incremented");
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    /// A pooled session failed its health check.
    pub fn inc_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "reconnects", "counter incremented");
    }

    /// Acquisition gave up after exhausting retries.
    pub fn inc_connect_failures(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "connect_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            checks_executed = self.checks_executed(),
            cache_hits = self.cache_hits(),
            reconnects = self.reconnects(),
            connect_failures = self.connect_failures(),
        );
    }

    pub fn checks_executed(&self) -> u64 {
        self.checks_executed.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.checks_executed.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
        self.connect_failures.store(0, Ordering::Relaxed);
    }
}
