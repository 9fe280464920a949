//! Request statistics.
//!
//! [`Counters`] are monotonically increasing within a session and only go
//! back to zero through an explicit [`reset`](Counters::reset). A [`Stats`]
//! value is a read-only snapshot that also carries the current in-flight
//! and cache entry counts.
//!
//! [`StatsReporter`] periodically logs the snapshot and publishes it as
//! `metrics` gauges for dashboards and debugging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::Optimizer;
use crate::telemetry;

/// Live counters shared by every call through one optimizer.
#[derive(Debug, Default)]
pub struct Counters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    throttled: AtomicU64,
    coalesced: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters. `in_flight` and `cache_entries` are left at zero
    /// for the caller to fill in.
    pub fn snapshot(&self) -> Stats {
        Stats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: 0,
            cache_entries: 0,
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.cache_hits,
            &self.cache_misses,
            &self.throttled,
            &self.coalesced,
            &self.failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Calls made through `request` (including cache hits and prefetches).
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Requests held at least once by the throttle gate.
    pub throttled: u64,
    /// Callers that joined an in-flight request.
    pub coalesced: u64,
    /// Calls that surfaced an error to their caller.
    pub failed: u64,
    /// Fingerprints currently awaiting a transport reply.
    pub in_flight: u64,
    /// Entries held by the cache store.
    pub cache_entries: u64,
}

impl Stats {
    /// Fraction of cacheable lookups served from cache.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

/// Background task that reports [`Stats`] at a fixed interval.
///
/// Stops when dropped.
pub struct StatsReporter {
    handle: JoinHandle<()>,
}

impl StatsReporter {
    /// Start reporting every `interval`. Must be called within a tokio runtime.
    pub fn spawn(optimizer: Optimizer, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if optimizer.is_disposed() {
                    break;
                }
                publish(&optimizer.stats());
            }
        });
        Self { handle }
    }

    /// Whether the reporter has stopped (optimizer disposed).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn publish(stats: &Stats) {
    debug!(
        total = stats.total_requests,
        hits = stats.cache_hits,
        misses = stats.cache_misses,
        throttled = stats.throttled,
        coalesced = stats.coalesced,
        failed = stats.failed,
        in_flight = stats.in_flight,
        cache_entries = stats.cache_entries,
        "request stats"
    );
    metrics::gauge!(telemetry::IN_FLIGHT).set(stats.in_flight as f64);
    metrics::gauge!(telemetry::CACHE_ENTRIES).set(stats.cache_entries as f64);
}
