//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `method` — HTTP method (e.g. "GET", "PATCH")
//! - `endpoint` — endpoint key the request was throttled under
//! - `status` — outcome: "ok" or "error"
//! - `strategy` — "optimized" or "direct"

/// Total transport calls actually sent.
///
/// Labels: `method`, `strategy`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "huginn_requests_total";

/// Transport call duration in seconds.
///
/// Labels: `method`, `strategy`.
pub const REQUEST_DURATION_SECONDS: &str = "huginn_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `method`.
pub const RETRIES_TOTAL: &str = "huginn_retries_total";

/// Total cache hits.
///
/// Labels: `method`.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total cache misses.
///
/// Labels: `method`.
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Total cache entries removed by invalidation.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "huginn_cache_invalidations_total";

/// Total requests held back by the throttle gate.
///
/// Labels: `endpoint`, `reason` ("window" | "backoff").
pub const THROTTLED_TOTAL: &str = "huginn_throttled_total";

/// Total callers that joined an in-flight request instead of sending.
pub const COALESCED_TOTAL: &str = "huginn_coalesced_total";

/// Total prefetch requests issued.
///
/// Labels: `status` ("ok" | "error").
pub const PREFETCH_TOTAL: &str = "huginn_prefetch_total";

/// Requests currently awaiting a transport reply (gauge).
pub const IN_FLIGHT: &str = "huginn_in_flight";

/// Entries currently held by the cache store (gauge).
pub const CACHE_ENTRIES: &str = "huginn_cache_entries";
