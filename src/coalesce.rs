//! In-flight request coalescing.
//!
//! The first caller for a fingerprint spawns the work as a runtime task and
//! registers its shared outcome. Callers arriving before it settles attach
//! as subscribers and await the same outcome instead of sending their own
//! transport call.
//!
//! The task owns the work, not the callers: dropping any subscriber (even
//! the one that started it) neither cancels the call nor its cache write.
//! The registry entry is removed by the task itself as it settles, before
//! any subscriber sees the outcome, so a call that starts after settlement
//! always begins a fresh round trip.
//!
//! [`detach`](InFlightCoalescer::detach) unregisters calls without
//! cancelling them. Callers already attached still get the outcome; new
//! callers start their own call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use crate::types::{Fingerprint, Response, under_prefix};
use crate::{HuginnError, Result};

type SharedOutcome = Shared<BoxFuture<'static, Result<Response>>>;
type Registry = Arc<Mutex<HashMap<Fingerprint, InFlightEntry>>>;

struct InFlightEntry {
    id: u64,
    url: String,
    outcome: SharedOutcome,
    subscribers: usize,
}

/// How a caller ended up attached to an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Started the transport call.
    Leader,
    /// Joined a call that was already in flight.
    Subscriber,
}

/// A caller's handle on an in-flight request.
#[must_use = "an InFlight does nothing for the caller unless waited on"]
pub struct InFlight {
    role: Role,
    outcome: SharedOutcome,
}

impl InFlight {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Wait for the shared outcome.
    pub async fn wait(self) -> Result<Response> {
        self.outcome.await
    }
}

/// Registry of requests currently awaiting a transport reply.
#[derive(Default)]
pub struct InFlightCoalescer {
    entries: Registry,
    next_id: AtomicU64,
}

/// Removes the registry entry when the owning task ends, including on
/// panic or abort. An entry registered under the same fingerprint after a
/// [`detach`](InFlightCoalescer::detach) is left alone.
struct SettleGuard {
    registry: Registry,
    fingerprint: Fingerprint,
    id: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let mut entries = lock(&self.registry);
        if entries.get(&self.fingerprint).is_some_and(|e| e.id == self.id) {
            entries.remove(&self.fingerprint);
        }
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<Fingerprint, InFlightEntry>> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

impl InFlightCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight request for `fingerprint`, or start one with
    /// `starter`.
    ///
    /// `url` is the normalized request URL, matched by
    /// [`detach`](Self::detach). `starter` is only invoked when no request
    /// is in flight. Must be called from within a tokio runtime.
    pub fn join_or_start<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        url: &str,
        starter: F,
    ) -> InFlight
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(&fingerprint) {
            entry.subscribers += 1;
            return InFlight {
                role: Role::Subscriber,
                outcome: entry.outcome.clone(),
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = SettleGuard {
            registry: Arc::clone(&self.entries),
            fingerprint: fingerprint.clone(),
            id,
        };
        let work = starter();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        let outcome = handle
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(HuginnError::Transport(format!("in-flight task failed: {e}")))
                })
            })
            .boxed()
            .shared();

        entries.insert(
            fingerprint,
            InFlightEntry {
                id,
                url: url.to_owned(),
                outcome: outcome.clone(),
                subscribers: 1,
            },
        );
        InFlight {
            role: Role::Leader,
            outcome,
        }
    }

    /// Unregister calls whose fingerprint equals `key_or_prefix` or whose
    /// URL lies under it. The calls keep running for the callers already
    /// attached.
    ///
    /// Returns the number of calls detached.
    pub fn detach(&self, key_or_prefix: &str) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|fingerprint, entry| {
            fingerprint.as_str() != key_or_prefix && !under_prefix(&entry.url, key_or_prefix)
        });
        before - entries.len()
    }

    /// Number of fingerprints currently in flight.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Callers attached to the request for `fingerprint`, if in flight.
    pub fn subscribers(&self, fingerprint: &Fingerprint) -> Option<usize> {
        lock(&self.entries).get(fingerprint).map(|e| e.subscribers)
    }
}
