//! The request optimizer.
//!
//! [`Optimizer`] is the single entry point for application traffic. Each
//! call runs through:
//!
//! 1. **Cache**: a fresh entry for a read is returned without touching the
//!    network.
//! 2. **Coalescing**: a call identical to one already in flight waits for
//!    that call's outcome.
//! 3. **Throttle**: the endpoint's window and any 429 backoff decide when
//!    the transport call may go out.
//! 4. **Retry**: transient failures are retried with exponential delay.
//! 5. **Fallback**: if the optimized path still fails transiently, a single
//!    direct transport call is made (see [`Strategy`]).
//!
//! A successful read is cached; a successful mutation invalidates the
//! cache entries under its endpoint key.
//!
//! Every invalidation bumps a generation counter and detaches matching
//! in-flight calls. A read that started before the bump neither serves
//! later callers nor writes its response to the cache, so no read issued
//! after a completed write observes pre-write data.

mod builder;
mod send;
mod strategy;

pub use builder::{Huginn, HuginnBuilder};
pub use strategy::Strategy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::coalesce::{InFlightCoalescer, Role};
use crate::prefetch::{PrefetchHandle, PrefetchRule, PrefetchScheduler};
use crate::stats::{Counters, Stats};
use crate::throttle::ThrottleController;
use crate::transport::Transport;
use crate::types::{
    Fingerprint, Method, RequestOptions, Response, TransportRequest, endpoint_key, normalize_url,
};
use crate::{ConfigUpdate, HuginnError, OptimizerConfig, Result, telemetry};

pub(crate) struct Inner {
    transport: Arc<dyn Transport>,
    config: RwLock<Arc<OptimizerConfig>>,
    cache: CacheStore,
    throttle: ThrottleController,
    in_flight: InFlightCoalescer,
    counters: Counters,
    prefetch: PrefetchScheduler,
    /// Bumped on every invalidation. Cache writes check it under this lock.
    generation: Mutex<u64>,
    disposed: AtomicBool,
}

/// Cache-, throttle- and coalescing-aware front for a [`Transport`].
///
/// Cheap to clone; clones share all state. Build one with
/// [`Huginn::builder()`].
#[derive(Clone)]
pub struct Optimizer {
    inner: Arc<Inner>,
}

impl Optimizer {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        config: OptimizerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = CacheStore::new(
            config.cache_capacity,
            config.default_freshness(),
            Arc::clone(&clock),
        );
        Self {
            inner: Arc::new(Inner {
                transport,
                config: RwLock::new(Arc::new(config)),
                cache,
                throttle: ThrottleController::new(clock),
                in_flight: InFlightCoalescer::new(),
                counters: Counters::new(),
                prefetch: PrefetchScheduler::new(),
                generation: Mutex::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Issue a request with default options.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<Response> {
        self.request_with(method, url, body, &RequestOptions::default())
            .await
    }

    /// Issue a request.
    ///
    /// Reads (`GET`) are served from cache when fresh. Every other method
    /// always reaches the transport and, on success, invalidates cached
    /// reads under the same endpoint.
    #[instrument(name = "huginn.request", skip(self, body, options), fields(method = %method))]
    pub async fn request_with(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<Response> {
        self.ensure_live()?;
        let url = normalize_url(url);
        if url.is_empty() {
            return Err(HuginnError::InvalidRequest("empty url".into()));
        }

        let config = self.config();
        let fingerprint = Fingerprint::new(method, &url, body.as_ref());
        self.inner.counters.request();

        if method.is_cacheable() && !options.bypass_cache {
            if let Some(entry) = self.inner.cache.get(&fingerprint) {
                self.inner.counters.cache_hit();
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "method" => method.as_str())
                    .increment(1);
                debug!(fingerprint = %fingerprint, "cache hit");
                return Ok(entry.response);
            }
            self.inner.counters.cache_miss();
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "method" => method.as_str())
                .increment(1);
        }

        let request = TransportRequest::new(method, url, body);
        let mut last_err = None;
        for strategy in Strategy::chain(&config) {
            let outcome = match strategy {
                Strategy::Optimized => {
                    self.optimized(&fingerprint, &request, &config, options)
                        .await
                }
                Strategy::Direct => self.direct(&fingerprint, &request, &config, options).await,
            };
            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if Strategy::falls_through(&e) => {
                    warn!(
                        strategy = %strategy,
                        url = %request.url,
                        error = %e,
                        "strategy failed, trying next"
                    );
                    last_err = Some(e);
                }
                Err(e) => {
                    self.inner.counters.failed();
                    return Err(e);
                }
            }
        }

        self.inner.counters.failed();
        Err(last_err.unwrap_or_else(|| HuginnError::Configuration("no strategy".into())))
    }

    async fn optimized(
        &self,
        fingerprint: &Fingerprint,
        request: &TransportRequest,
        config: &Arc<OptimizerConfig>,
        options: &RequestOptions,
    ) -> Result<Response> {
        let inner = Arc::clone(&self.inner);
        let work = {
            let fingerprint = fingerprint.clone();
            let request = request.clone();
            let config = Arc::clone(config);
            let freshness = options.freshness;
            let generation = self.inner.generation();
            move || inner.send_optimized(fingerprint, request, config, freshness, generation)
        };

        let in_flight = self
            .inner
            .in_flight
            .join_or_start(fingerprint.clone(), &request.url, work);
        if in_flight.role() == Role::Subscriber {
            self.inner.counters.coalesced();
            metrics::counter!(telemetry::COALESCED_TOTAL).increment(1);
            debug!(fingerprint = %fingerprint, "joined in-flight request");
        }
        in_flight.wait().await
    }

    /// One raw call outside cache, throttle and coalescing. A successful
    /// response still updates the cache the same way.
    async fn direct(
        &self,
        fingerprint: &Fingerprint,
        request: &TransportRequest,
        config: &OptimizerConfig,
        options: &RequestOptions,
    ) -> Result<Response> {
        let generation = self.inner.generation();
        let response = self
            .inner
            .send_once(request, config.request_timeout(), Strategy::Direct.as_str())
            .await?
            .into_response()?;
        self.inner.settle(
            fingerprint,
            request,
            config,
            options.freshness,
            generation,
            &response,
        );
        Ok(response)
    }

    /// `GET url`.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(Method::Get, url, None).await
    }

    /// `POST url` with a JSON body.
    pub async fn post(&self, url: &str, body: &impl Serialize) -> Result<Response> {
        self.request(Method::Post, url, Some(to_body(body)?)).await
    }

    /// `PUT url` with a JSON body.
    pub async fn put(&self, url: &str, body: &impl Serialize) -> Result<Response> {
        self.request(Method::Put, url, Some(to_body(body)?)).await
    }

    /// `PATCH url` with a JSON body.
    pub async fn patch(&self, url: &str, body: &impl Serialize) -> Result<Response> {
        self.request(Method::Patch, url, Some(to_body(body)?)).await
    }

    /// `DELETE url`.
    pub async fn delete(&self, url: &str) -> Result<Response> {
        self.request(Method::Delete, url, None).await
    }

    /// Issue a request and decode the body into `T`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<T> {
        self.request(method, url, body).await?.json()
    }

    /// Remove cached entries by exact fingerprint or URL prefix.
    ///
    /// Prefixes match on path segment boundaries. Matching requests still
    /// in flight are detached, so their responses are not cached.
    ///
    /// Returns the number of entries removed. An empty argument matches
    /// nothing.
    pub fn invalidate(&self, key_or_prefix: &str) -> usize {
        let key = key_or_prefix.trim();
        if key.is_empty() {
            return 0;
        }
        let removed = self.inner.invalidate_matching(key);
        metrics::counter!(telemetry::CACHE_INVALIDATIONS_TOTAL).increment(removed as u64);
        debug!(key, removed, "invalidated");
        removed
    }

    /// Invalidate everything cached under `url`'s endpoint key.
    pub fn invalidate_endpoint(&self, url: &str) -> usize {
        let prefix = endpoint_key(&normalize_url(url), self.config().endpoint_depth);
        self.invalidate(&prefix)
    }

    /// Warm the cache for the routes `rules` associate with `location`.
    ///
    /// Any prefetch still running from an earlier call is cancelled.
    pub fn prefetch(&self, rules: &[PrefetchRule], location: &str) -> PrefetchHandle {
        self.inner.prefetch.schedule(self.clone(), rules, location)
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<OptimizerConfig> {
        let guard = self.inner.config.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Merge `update` into the configuration.
    ///
    /// Requests already past the throttle gate keep the snapshot they
    /// started with. `cache_capacity` is fixed at build time and ignored
    /// here.
    pub fn configure(&self, update: &ConfigUpdate) -> Result<()> {
        let next = self.config().apply(update);
        next.validate()?;
        self.inner
            .cache
            .set_default_freshness(next.default_freshness());
        *self.inner.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        info!("optimizer configuration updated");
        Ok(())
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> Stats {
        let mut stats = self.inner.counters.snapshot();
        stats.in_flight = self.inner.in_flight.len() as u64;
        stats.cache_entries = self.inner.cache.len();
        stats
    }

    /// Zero all counters and forget throttle windows. The cache is kept.
    pub fn reset_counts(&self) {
        self.inner.counters.reset();
        self.inner.throttle.reset();
    }

    /// Drop every cached entry.
    pub fn clear_cache(&self) {
        self.inner.clear_cache();
    }

    /// Shut the optimizer down.
    ///
    /// Clears cache and throttle state and cancels any pending prefetch.
    /// Later requests fail with [`HuginnError::Disposed`]. Requests already
    /// in flight run to completion.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.prefetch.cancel();
        self.inner.clear_cache();
        self.inner.throttle.reset();
        info!("optimizer disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Name of the underlying transport.
    pub fn transport_name(&self) -> &str {
        self.inner.transport.name()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(HuginnError::Disposed)
        } else {
            Ok(())
        }
    }
}

fn to_body(body: &impl Serialize) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| HuginnError::InvalidRequest(e.to_string()))
}
