//! Response cache keyed on request fingerprint.
//!
//! # Freshness
//!
//! Every entry carries its own freshness window. The check happens at
//! [`get`](CacheStore::get) time: an entry older than its window is treated
//! as absent and evicted on that read. There is no background sweep and no
//! stale-while-revalidate; a stale read always leads to a transport call.
//!
//! # Capacity
//!
//! Storage is a moka LRU bounded by `cache_capacity`. Moka's own TTL is not
//! used because freshness is per entry and follows the injected [`Clock`].
//!
//! # Invalidation
//!
//! [`invalidate`](CacheStore::invalidate) removes entries whose fingerprint
//! equals the argument or whose source URL lies under it, matched on path
//! segment boundaries (see [`under_prefix`]). Nothing else is touched.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::types::{Fingerprint, Response, under_prefix};

/// A cached response with its freshness metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    /// Normalized source URL, matched by prefix invalidation.
    pub url: String,
    pub response: Response,
    pub stored_at: Instant,
    pub freshness: Duration,
}

impl CacheEntry {
    /// Whether the entry may still be served at `now`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.freshness
    }
}

/// In-memory response cache.
pub struct CacheStore {
    entries: Cache<Fingerprint, CacheEntry>,
    default_freshness_ms: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Create a store bounded to `capacity` entries.
    pub fn new(capacity: u64, default_freshness: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Cache::new(capacity),
            default_freshness_ms: AtomicU64::new(default_freshness.as_millis() as u64),
            clock,
        }
    }

    /// Look up a fresh entry.
    ///
    /// Returns `None` on miss. A stale entry is evicted and reported as a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.get(fingerprint)?;
        if entry.is_fresh_at(self.clock.now()) {
            Some(entry)
        } else {
            self.entries.invalidate(fingerprint);
            None
        }
    }

    /// Insert (or overwrite) an entry.
    ///
    /// `freshness` overrides the default window for this entry only.
    pub fn put(
        &self,
        fingerprint: Fingerprint,
        url: impl Into<String>,
        response: Response,
        freshness: Option<Duration>,
    ) {
        let freshness = freshness.unwrap_or_else(|| self.default_freshness());
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            url: url.into(),
            response,
            stored_at: self.clock.now(),
            freshness,
        };
        self.entries.insert(fingerprint, entry);
    }

    /// Remove entries matching an exact fingerprint or a URL prefix.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, key_or_prefix: &str) -> usize {
        let doomed: Vec<Arc<Fingerprint>> = self
            .entries
            .iter()
            .filter(|(fingerprint, entry)| {
                fingerprint.as_str() == key_or_prefix || under_prefix(&entry.url, key_or_prefix)
            })
            .map(|(fingerprint, _)| fingerprint)
            .collect();
        for fingerprint in &doomed {
            self.entries.invalidate(fingerprint.as_ref());
        }
        doomed.len()
    }

    /// Evict all entries.
    pub fn clear(&self) {
        for (fingerprint, _) in self.entries.iter() {
            self.entries.invalidate(fingerprint.as_ref());
        }
    }

    /// Number of entries currently stored (fresh or not yet evicted).
    pub fn len(&self) -> u64 {
        self.entries.iter().count() as u64
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_freshness(&self) -> Duration {
        Duration::from_millis(self.default_freshness_ms.load(Ordering::Relaxed))
    }

    /// Change the TTL used for entries stored from now on.
    pub fn set_default_freshness(&self, freshness: Duration) {
        self.default_freshness_ms
            .store(freshness.as_millis() as u64, Ordering::Relaxed);
    }
}
