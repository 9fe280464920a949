//! The optimized send loop: throttle gate, timeout, classification and retry.

use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::Inner;
use crate::throttle::{Admission, ThrottleLimits};
use crate::types::{Fingerprint, RawResponse, Response, TransportRequest, endpoint_key};
use crate::{HuginnError, OptimizerConfig, Result, telemetry};

impl Inner {
    /// Send through the throttle gate with retry, then update the cache.
    ///
    /// Runs inside the coalesced task, so the cache write (or invalidation)
    /// lands before any subscriber observes the outcome.
    ///
    /// Two budgets bound the loop, each at `max_retries`: transient
    /// failures (transport, timeout, 5xx) and rate-limit waits. A 429 only
    /// draws on the second, so backing off never costs a failure retry.
    pub(super) async fn send_optimized(
        self: Arc<Self>,
        fingerprint: Fingerprint,
        request: TransportRequest,
        config: Arc<OptimizerConfig>,
        freshness: Option<Duration>,
        generation: u64,
    ) -> Result<Response> {
        let endpoint = endpoint_key(&request.url, config.endpoint_depth);
        let limits = ThrottleLimits::from(config.as_ref());
        let mut attempt = 0u32;
        let mut rate_limit_waits = 0u32;
        let mut rate_limited: Option<HuginnError> = None;
        let mut held = false;

        loop {
            match self.throttle.admit(&endpoint, &limits) {
                Admission::Now => {
                    if let Some(err) = rate_limited.take() {
                        // The server said 429 but backoff already elapsed.
                        if rate_limit_waits >= config.max_retries {
                            return Err(err);
                        }
                        rate_limit_waits += 1;
                    }
                }
                Admission::Delayed(wait) => {
                    self.note_throttled(&endpoint, "window", wait, &mut held);
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Admission::Rejected { retry_after } => {
                    if rate_limit_waits >= config.max_retries {
                        return Err(rate_limited.unwrap_or(HuginnError::RateLimited {
                            retry_after: Some(retry_after),
                        }));
                    }
                    rate_limit_waits += 1;
                    rate_limited = None;
                    self.note_throttled(&endpoint, "backoff", retry_after, &mut held);
                    tokio::time::sleep(retry_after).await;
                    continue;
                }
            }

            let outcome = match self
                .send_once(&request, config.request_timeout(), "optimized")
                .await
            {
                Ok(raw) => {
                    self.throttle
                        .record_response(&endpoint, raw.status, raw.retry_after(), &limits);
                    raw.into_response()
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(response) => {
                    self.settle(
                        &fingerprint,
                        &request,
                        &config,
                        freshness,
                        generation,
                        &response,
                    );
                    return Ok(response);
                }
                Err(e @ HuginnError::RateLimited { .. }) => {
                    debug!(endpoint = %endpoint, error = %e, "rate limited, backing off");
                    rate_limited = Some(e);
                }
                Err(e) if e.is_transient() && attempt < config.max_retries => {
                    metrics::counter!(telemetry::RETRIES_TOTAL,
                        "method" => request.method.as_str(),
                    )
                    .increment(1);
                    let delay = config.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(
                        url = %request.url,
                        attempt,
                        max_retries = config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One transport call bounded by `timeout`. No classification.
    pub(super) async fn send_once(
        &self,
        request: &TransportRequest,
        timeout: Duration,
        strategy: &'static str,
    ) -> Result<RawResponse> {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(HuginnError::Timeout(timeout)),
        };
        record_request(request, strategy, start, result.is_ok());
        result
    }

    /// Apply a successful response to the cache.
    ///
    /// Reads are stored unless an invalidation happened since `generation`
    /// was read; mutations invalidate everything under their endpoint key.
    pub(super) fn settle(
        &self,
        fingerprint: &Fingerprint,
        request: &TransportRequest,
        config: &OptimizerConfig,
        freshness: Option<Duration>,
        generation: u64,
        response: &Response,
    ) {
        // A call that outlived dispose() must not repopulate the cache.
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if request.method.is_cacheable() {
            let current = self.lock_generation();
            if *current != generation {
                debug!(fingerprint = %fingerprint, "invalidated while in flight, not caching");
                return;
            }
            self.cache.put(
                fingerprint.clone(),
                request.url.clone(),
                response.clone(),
                freshness,
            );
        } else if request.method.is_mutation() {
            let prefix = endpoint_key(&request.url, config.endpoint_depth);
            let removed = self.invalidate_matching(&prefix);
            metrics::counter!(telemetry::CACHE_INVALIDATIONS_TOTAL).increment(removed as u64);
            debug!(prefix = %prefix, removed, "invalidated after mutation");
        }
    }

    pub(super) fn generation(&self) -> u64 {
        *self.lock_generation()
    }

    /// Drop cached entries and detach in-flight calls matching
    /// `key_or_prefix`, then start a new generation.
    pub(super) fn invalidate_matching(&self, key_or_prefix: &str) -> usize {
        let mut generation = self.lock_generation();
        *generation = generation.wrapping_add(1);
        let detached = self.in_flight.detach(key_or_prefix);
        if detached > 0 {
            debug!(key = key_or_prefix, detached, "detached in-flight requests");
        }
        self.cache.invalidate(key_or_prefix)
    }

    pub(super) fn clear_cache(&self) {
        let mut generation = self.lock_generation();
        *generation = generation.wrapping_add(1);
        self.cache.clear();
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn note_throttled(
        &self,
        endpoint: &str,
        reason: &'static str,
        wait: Duration,
        held: &mut bool,
    ) {
        if !*held {
            *held = true;
            self.counters.throttled();
        }
        metrics::counter!(telemetry::THROTTLED_TOTAL,
            "endpoint" => endpoint.to_owned(),
            "reason" => reason,
        )
        .increment(1);
        debug!(
            endpoint,
            reason,
            wait_ms = wait.as_millis() as u64,
            "throttled"
        );
    }
}

fn record_request(request: &TransportRequest, strategy: &'static str, start: Instant, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    let elapsed = start.elapsed().as_secs_f64();
    metrics::counter!(telemetry::REQUESTS_TOTAL,
        "method" => request.method.as_str(),
        "strategy" => strategy,
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
        "method" => request.method.as_str(),
        "strategy" => strategy,
    )
    .record(elapsed);
}
