//! Per-endpoint throttling with rate-limit backoff.
//!
//! Each endpoint key gets a fixed-length window that slides forward once
//! `now - window_start >= window_length`. Within a window, up to
//! `max_per_window` requests are admitted immediately; later ones are told
//! to wait until the window rolls over.
//!
//! A 429 from the server puts the endpoint into backoff. While backoff is
//! active it dominates the window: every admission is rejected with the
//! remaining wait, whatever the window count says. The backoff never
//! exceeds the configured `max_retry_delay_ms`, whatever the server asks
//! for.
//!
//! All state lives behind one mutex, so concurrent admissions for the same
//! endpoint are applied one at a time in arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::OptimizerConfig;
use crate::clock::Clock;

/// Hard ceiling on one backoff, whatever `max_backoff` is configured to.
const BACKOFF_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Send now; the request has been counted against the window.
    Now,
    /// The window is full; ask again after this delay.
    Delayed(Duration),
    /// The endpoint is backing off after a rate-limit response.
    Rejected { retry_after: Duration },
}

/// Limits applied to one admission decision.
///
/// Built from the configuration current at the time of the call, so a
/// reconfiguration only affects requests issued afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleLimits {
    pub max_per_window: u32,
    pub window_length: Duration,
    /// Backoff base when a 429 carries no `Retry-After`.
    pub rate_limit_backoff: Duration,
    /// Cap on any backoff, computed or server-supplied.
    pub max_backoff: Duration,
}

impl From<&OptimizerConfig> for ThrottleLimits {
    fn from(config: &OptimizerConfig) -> Self {
        Self {
            max_per_window: config.max_requests_per_window,
            window_length: config.window_length(),
            rate_limit_backoff: config.rate_limit_backoff(),
            max_backoff: config.max_retry_delay(),
        }
    }
}

/// Throttle state for one endpoint key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleWindow {
    pub window_start: Instant,
    pub request_count: u32,
    pub backoff_until: Option<Instant>,
    pub consecutive_rate_limits: u32,
}

impl ThrottleWindow {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            request_count: 0,
            backoff_until: None,
            consecutive_rate_limits: 0,
        }
    }
}

/// Sliding-window throttle keyed on endpoint.
pub struct ThrottleController {
    windows: Mutex<HashMap<String, ThrottleWindow>>,
    clock: Arc<dyn Clock>,
}

impl ThrottleController {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ThrottleWindow>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether a request to `endpoint` may be sent now.
    pub fn admit(&self, endpoint: &str, limits: &ThrottleLimits) -> Admission {
        let now = self.clock.now();
        let mut windows = self.lock();
        let window = windows
            .entry(endpoint.to_owned())
            .or_insert_with(|| ThrottleWindow::new(now));

        if let Some(until) = window.backoff_until {
            if until > now {
                return Admission::Rejected {
                    retry_after: until - now,
                };
            }
            window.backoff_until = None;
        }

        if now.saturating_duration_since(window.window_start) >= limits.window_length {
            window.window_start = now;
            window.request_count = 0;
        }

        if window.request_count < limits.max_per_window {
            window.request_count += 1;
            Admission::Now
        } else {
            let elapsed = now.saturating_duration_since(window.window_start);
            Admission::Delayed(limits.window_length.saturating_sub(elapsed))
        }
    }

    /// Feed a transport status back into the endpoint's state.
    ///
    /// A 429 starts (or extends) backoff for `retry_after`, or for an
    /// exponential default when the server gave no hint. Either is capped
    /// at `limits.max_backoff`. Any other status clears the consecutive
    /// rate-limit count.
    pub fn record_response(
        &self,
        endpoint: &str,
        status: u16,
        retry_after: Option<Duration>,
        limits: &ThrottleLimits,
    ) {
        let now = self.clock.now();
        let mut windows = self.lock();
        let window = windows
            .entry(endpoint.to_owned())
            .or_insert_with(|| ThrottleWindow::new(now));

        if status != 429 {
            window.consecutive_rate_limits = 0;
            return;
        }

        window.consecutive_rate_limits = window.consecutive_rate_limits.saturating_add(1);
        let backoff = retry_after
            .unwrap_or_else(|| {
                let exponent = window.consecutive_rate_limits - 1;
                limits
                    .rate_limit_backoff
                    .saturating_mul(2u32.saturating_pow(exponent))
            })
            .min(limits.max_backoff)
            .min(BACKOFF_CEILING);
        let until = now + backoff;
        window.backoff_until = Some(window.backoff_until.map_or(until, |prev| prev.max(until)));
    }

    /// Current state of an endpoint, if it has been seen.
    pub fn window(&self, endpoint: &str) -> Option<ThrottleWindow> {
        self.lock().get(endpoint).copied()
    }

    /// Number of endpoints with throttle state.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all windows and backoff.
    pub fn reset(&self) {
        self.lock().clear();
    }
}
