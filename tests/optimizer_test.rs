//! End-to-end behaviour of the optimizer over a scripted transport.
//!
//! All tests run on a paused tokio clock, so delays are exact and instant.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::json;
use tokio::time::Instant;

use common::{ScriptedTransport, Step, optimizer};
use huginn::{
    ConfigUpdate, Fingerprint, Huginn, HuginnError, Method, RawResponse, RequestOptions, Stats,
    StatsReporter, Transport, TransportRequest,
};

fn call_number(response: &huginn::Response) -> u64 {
    response.body["call"].as_u64().unwrap()
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test(start_paused = true)]
async fn repeated_get_is_served_from_cache() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    let first = api.get("/api/agencies").await.unwrap();
    let second = api.get("/api/agencies").await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(first, second);
    let stats = api.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_entries, 1);
}

#[tokio::test(start_paused = true)]
async fn equivalent_urls_share_a_cache_entry() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    api.get("/api/items/?b=2&a=1").await.unwrap();
    api.get("/api/items?a=1&b=2#top").await.unwrap();

    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_refetched() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());
    let opts = RequestOptions::new().freshness(Duration::from_secs(1));

    api.request_with(Method::Get, "/api/x", None, &opts)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(999)).await;
    api.get("/api/x").await.unwrap();
    assert_eq!(transport.calls(), 1, "still fresh");

    tokio::time::sleep(Duration::from_millis(2)).await;
    let refreshed = api.get("/api/x").await.unwrap();
    assert_eq!(transport.calls(), 2);
    assert_eq!(call_number(&refreshed), 2);
}

#[tokio::test(start_paused = true)]
async fn bypass_cache_forces_round_trip() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    api.get("/api/x").await.unwrap();
    let fresh = api
        .request_with(
            Method::Get,
            "/api/x",
            None,
            &RequestOptions::new().bypass_cache(true),
        )
        .await
        .unwrap();
    assert_eq!(call_number(&fresh), 2);

    // The bypassing call refreshed the entry.
    let cached = api.get("/api/x").await.unwrap();
    assert_eq!(call_number(&cached), 2);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn mutation_invalidates_its_endpoint_only() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    api.get("/api/agencies").await.unwrap();
    api.get("/api/agencies/7").await.unwrap();
    api.get("/api/regions").await.unwrap();

    api.patch("/api/agencies/1", &json!({ "name": "Updated" }))
        .await
        .unwrap();
    assert_eq!(transport.calls(), 4);

    let agencies = api.get("/api/agencies").await.unwrap();
    assert_eq!(call_number(&agencies), 5, "list refetched after PATCH");
    let detail = api.get("/api/agencies/7").await.unwrap();
    assert_eq!(call_number(&detail), 6, "detail refetched after PATCH");
    let regions = api.get("/api/regions").await.unwrap();
    assert_eq!(call_number(&regions), 3, "unrelated endpoint still cached");
}

#[tokio::test(start_paused = true)]
async fn mutations_are_never_cached() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    api.post("/api/agencies", &json!({ "name": "A" })).await.unwrap();
    api.post("/api/agencies", &json!({ "name": "A" })).await.unwrap();
    api.delete("/api/agencies/1").await.unwrap();

    assert_eq!(transport.calls(), 3);
    assert_eq!(api.stats().cache_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn manual_invalidation() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    api.get("/api/a?page=1").await.unwrap();
    api.get("/api/a?page=2").await.unwrap();
    api.get("/api/b").await.unwrap();

    assert_eq!(api.invalidate(""), 0);
    assert_eq!(api.invalidate("/api/a"), 2);

    let fingerprint = Fingerprint::of(Method::Get, "/api/b", None);
    assert_eq!(api.invalidate(fingerprint.as_str()), 1);
    assert_eq!(api.stats().cache_entries, 0);
}

/// Server whose resource version is bumped by every mutation. Reads report
/// the version current when they arrived, after a slow 200ms.
#[derive(Default)]
struct VersionedServer {
    version: AtomicU64,
    reads: AtomicU64,
}

#[async_trait]
impl Transport for VersionedServer {
    fn name(&self) -> &str {
        "versioned"
    }

    async fn send(&self, request: &TransportRequest) -> huginn::Result<RawResponse> {
        if request.method == Method::Get {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let version = self.version.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(RawResponse::json(200, &json!({ "version": version })))
        } else {
            let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RawResponse::json(200, &json!({ "version": version })))
        }
    }
}

fn versioned() -> (Arc<VersionedServer>, huginn::Optimizer) {
    let server = Arc::new(VersionedServer::default());
    let api = Huginn::builder()
        .shared_transport(Arc::clone(&server) as Arc<dyn Transport>)
        .build()
        .unwrap();
    (server, api)
}

#[tokio::test(start_paused = true)]
async fn read_after_write_does_not_join_an_older_read() {
    let (server, api) = versioned();
    let early = tokio::spawn({
        let api = api.clone();
        async move { api.get("/api/agencies/1").await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    api.patch("/api/agencies/1", &json!({ "name": "Updated" }))
        .await
        .unwrap();
    let after = api.get("/api/agencies/1").await.unwrap();

    assert_eq!(after.body["version"], json!(1));
    assert_eq!(early.await.unwrap().unwrap().body["version"], json!(0));
    assert_eq!(server.reads.load(Ordering::SeqCst), 2);
    assert_eq!(api.stats().coalesced, 0);
}

#[tokio::test(start_paused = true)]
async fn read_started_before_write_is_not_cached() {
    let (server, api) = versioned();
    let early = tokio::spawn({
        let api = api.clone();
        async move { api.get("/api/agencies/1").await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    api.patch("/api/agencies/1", &json!({ "name": "Updated" }))
        .await
        .unwrap();
    assert_eq!(early.await.unwrap().unwrap().body["version"], json!(0));
    assert_eq!(api.stats().cache_entries, 0);

    let after = api.get("/api/agencies/1").await.unwrap();
    assert_eq!(after.body["version"], json!(1));
    assert_eq!(server.reads.load(Ordering::SeqCst), 2);

    // The post-write read is cached as usual.
    api.get("/api/agencies/1").await.unwrap();
    assert_eq!(server.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn manual_invalidation_detaches_in_flight_reads() {
    let (server, api) = versioned();
    let early = tokio::spawn({
        let api = api.clone();
        async move { api.get("/api/agencies").await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;

    api.invalidate("/api/agencies");
    assert_eq!(api.stats().in_flight, 0);
    early.await.unwrap().unwrap();

    api.get("/api/agencies").await.unwrap();
    assert_eq!(server.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn prefix_invalidation_stops_at_segment_boundary() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    api.get("/api/agencies").await.unwrap();
    api.get("/api/agencies-archive").await.unwrap();

    assert_eq!(api.invalidate("/api/agencies"), 1);
    let archive = api.get("/api/agencies-archive").await.unwrap();
    assert_eq!(call_number(&archive), 2);
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_identical_gets_share_one_call() {
    let transport = Arc::new(ScriptedTransport::new().latency(Duration::from_millis(50)));
    let api = optimizer(&transport, ConfigUpdate::new());

    let results = join_all((0..5).map(|_| api.get("/api/agencies"))).await;

    assert_eq!(transport.calls(), 1);
    let first = results[0].as_ref().unwrap();
    assert!(results.iter().all(|r| r.as_ref().unwrap() == first));
    let stats = api.stats();
    assert_eq!(stats.coalesced, 4);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn mutations_coalesce_by_body() {
    let transport = Arc::new(ScriptedTransport::new().latency(Duration::from_millis(50)));
    let api = optimizer(&transport, ConfigUpdate::new());

    let same = json!({ "name": "A" });
    let (a, b) = tokio::join!(api.post("/api/x", &same), api.post("/api/x", &same));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(transport.calls(), 1);

    let body_b = json!({ "name": "B" });
    let body_c = json!({ "name": "C" });
    let (c, d) = tokio::join!(
        api.post("/api/x", &body_b),
        api.post("/api/x", &body_c),
    );
    assert!(c.is_ok() && d.is_ok());
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn cancelled_caller_does_not_cancel_the_request() {
    let transport = Arc::new(ScriptedTransport::new().latency(Duration::from_millis(100)));
    let api = optimizer(&transport, ConfigUpdate::new());

    let abandoned = tokio::time::timeout(Duration::from_millis(10), api.get("/api/x")).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let cached = api.get("/api/x").await.unwrap();
    assert_eq!(call_number(&cached), 1);
    assert_eq!(transport.calls(), 1);
}

// ============================================================================
// Throttle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn third_request_waits_for_the_next_window() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(
        &transport,
        ConfigUpdate::new()
            .max_requests_per_window(2)
            .window_length_ms(1000),
    );
    let start = Instant::now();

    let results = join_all(
        ["/api/items?page=1", "/api/items?page=2", "/api/items?page=3"]
            .into_iter()
            .map(|url| api.get(url)),
    )
    .await;
    assert!(results.iter().all(Result::is_ok));

    let times = transport.times();
    assert_eq!(times.len(), 3);
    assert_eq!(times[0] - start, Duration::ZERO);
    assert_eq!(times[1] - start, Duration::ZERO);
    let waited = times[2] - start;
    assert!(
        waited >= Duration::from_millis(1000) && waited < Duration::from_millis(1050),
        "third request sent after {waited:?}"
    );
    assert_eq!(api.stats().throttled, 1);
}

#[tokio::test(start_paused = true)]
async fn endpoints_are_throttled_independently() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(
        &transport,
        ConfigUpdate::new()
            .max_requests_per_window(1)
            .window_length_ms(1000),
    );
    let start = Instant::now();

    let (a, b) = tokio::join!(api.get("/api/agencies"), api.get("/api/regions"));
    assert!(a.is_ok() && b.is_ok());
    assert!(transport.times().iter().all(|t| *t == start));
    assert_eq!(api.stats().throttled, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_backs_off_for_retry_after() {
    let transport = Arc::new(ScriptedTransport::new().then(Step::rate_limited(Some(2))));
    let api = optimizer(&transport, ConfigUpdate::new());

    let response = api.get("/api/agencies").await.unwrap();

    assert_eq!(call_number(&response), 2);
    let times = transport.times();
    assert_eq!(times[1] - times[0], Duration::from_secs(2));
    let stats = api.stats();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.throttled, 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_holds_other_requests_to_the_endpoint() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .latency(Duration::from_millis(10))
            .then(Step::rate_limited(Some(1))),
    );
    let api = optimizer(&transport, ConfigUpdate::new());
    let start = Instant::now();

    let first = api.get("/api/items?page=1");
    let second = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        api.get("/api/items?page=2").await
    };
    let (a, b) = tokio::join!(first, second);
    assert!(a.is_ok() && b.is_ok());

    // page=2 arrives during backoff and is held until it ends.
    let times = transport.times();
    assert_eq!(times.len(), 3);
    assert!(times[1..].iter().all(|t| *t - start >= Duration::from_millis(1010)));
}

#[tokio::test(start_paused = true)]
async fn oversized_retry_after_is_capped() {
    let transport = Arc::new(ScriptedTransport::new().then(Step::rate_limited(Some(u64::MAX))));
    let api = optimizer(
        &transport,
        ConfigUpdate::new()
            .max_retry_delay_ms(500)
            .direct_fallback(false),
    );

    let response = api.get("/api/agencies").await.unwrap();

    assert_eq!(call_number(&response), 2);
    let times = transport.times();
    assert_eq!(times[1] - times[0], Duration::from_millis(500));
    assert_eq!(api.stats().throttled, 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_rate_limit_gives_up() {
    let transport = Arc::new(ScriptedTransport::repeating(Step::rate_limited(None)));
    let api = optimizer(
        &transport,
        ConfigUpdate::new()
            .max_retries(2)
            .rate_limit_backoff_ms(100)
            .direct_fallback(false),
    );

    let err = api.get("/api/x").await.unwrap_err();

    assert!(matches!(err, HuginnError::RateLimited { .. }));
    assert_eq!(transport.calls(), 3);
    let times = transport.times();
    assert_eq!(times[1] - times[0], Duration::from_millis(100));
    assert_eq!(times[2] - times[1], Duration::from_millis(200));
    assert_eq!(api.stats().failed, 1);
}

// ============================================================================
// Retry and fallback
// ============================================================================

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_exponential_delay() {
    let transport = Arc::new(ScriptedTransport::repeating(Step::connection_reset()));
    let api = optimizer(
        &transport,
        ConfigUpdate::new()
            .max_retries(2)
            .retry_base_delay_ms(100)
            .direct_fallback(false),
    );

    let err = api.get("/api/x").await.unwrap_err();

    assert!(matches!(err, HuginnError::Transport(_)));
    assert_eq!(transport.calls(), 3);
    let times = transport.times();
    assert_eq!(times[1] - times[0], Duration::from_millis(100));
    assert_eq!(times[2] - times[1], Duration::from_millis(200));
    let stats = api.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.cache_entries, 0);
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_retried() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .then(Step::status(503))
            .then(Step::status(500)),
    );
    let api = optimizer(&transport, ConfigUpdate::new());

    let response = api.get("/api/x").await.unwrap();
    assert_eq!(call_number(&response), 3);
}

#[tokio::test(start_paused = true)]
async fn client_errors_fail_immediately() {
    let transport = Arc::new(ScriptedTransport::repeating(Step::status(404)));
    let api = optimizer(&transport, ConfigUpdate::new());

    let err = api.get("/api/missing").await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(transport.calls(), 1, "no retry, no fallback");
    assert_eq!(api.stats().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fall_back_to_direct_call() {
    let transport = Arc::new(ScriptedTransport::repeating(Step::connection_reset()));
    let api = optimizer(
        &transport,
        ConfigUpdate::new().max_retries(2).retry_base_delay_ms(100),
    );

    let err = api.get("/api/x").await.unwrap_err();

    assert!(matches!(err, HuginnError::Transport(_)));
    assert_eq!(transport.calls(), 4, "three optimized attempts, one direct");
    assert_eq!(api.stats().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn direct_fallback_success_is_cached() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .then(Step::connection_reset())
            .then(Step::connection_reset())
            .then(Step::connection_reset()),
    );
    let api = optimizer(&transport, ConfigUpdate::new().max_retries(2));

    let response = api.get("/api/x").await.unwrap();
    assert_eq!(call_number(&response), 4);

    let cached = api.get("/api/x").await.unwrap();
    assert_eq!(call_number(&cached), 4);
    assert_eq!(transport.calls(), 4);
    assert_eq!(api.stats().failed, 0);
}

#[tokio::test(start_paused = true)]
async fn hung_transport_times_out() {
    let transport = Arc::new(ScriptedTransport::repeating(Step::Hang));
    let api = optimizer(
        &transport,
        ConfigUpdate::new()
            .request_timeout_ms(500)
            .max_retries(0)
            .direct_fallback(false),
    );
    let start = Instant::now();

    let err = api.get("/api/x").await.unwrap_err();

    assert_eq!(err, HuginnError::Timeout(Duration::from_millis(500)));
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn undecodable_body_is_not_retried() {
    let transport = Arc::new(ScriptedTransport::repeating(Step::Reply(
        huginn::RawResponse::new(200, "<html>"),
    )));
    let api = optimizer(&transport, ConfigUpdate::new());

    let err = api.get("/api/x").await.unwrap_err();
    assert!(matches!(err, HuginnError::Decode { status: 200, .. }));
    assert_eq!(transport.calls(), 1);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn reset_counts_keeps_the_cache() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    api.get("/api/x").await.unwrap();
    api.get("/api/x").await.unwrap();

    api.reset_counts();
    api.reset_counts();
    assert_eq!(
        api.stats(),
        Stats {
            cache_entries: 1,
            ..Stats::default()
        }
    );

    api.get("/api/x").await.unwrap();
    assert_eq!(transport.calls(), 1);
    assert_eq!(api.stats().cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn configure_applies_to_later_requests() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    api.configure(&ConfigUpdate::new().default_freshness_ms(1000))
        .unwrap();
    assert_eq!(api.config().default_freshness_ms, 1000);

    api.get("/api/x").await.unwrap();
    tokio::time::sleep(Duration::from_millis(1001)).await;
    api.get("/api/x").await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn invalid_configure_is_rejected() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    let err = api
        .configure(&ConfigUpdate::new().max_requests_per_window(0))
        .unwrap_err();
    assert!(matches!(err, HuginnError::Configuration(_)));
    assert_eq!(api.config().max_requests_per_window, 10);
}

#[tokio::test(start_paused = true)]
async fn disposed_optimizer_rejects_requests() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    api.get("/api/x").await.unwrap();
    api.dispose();
    api.dispose();

    assert!(api.is_disposed());
    assert_eq!(api.stats().cache_entries, 0);
    assert_eq!(api.get("/api/x").await.unwrap_err(), HuginnError::Disposed);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_url_is_invalid() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    let err = api.get("   ").await.unwrap_err();
    assert!(matches!(err, HuginnError::InvalidRequest(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn typed_json_response() {
    #[derive(serde::Deserialize)]
    struct Echo {
        method: String,
        url: String,
    }

    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    let echo: Echo = api
        .request_json(Method::Delete, "/api/agencies/3", None)
        .await
        .unwrap();
    assert_eq!(echo.method, "DELETE");
    assert_eq!(echo.url, "/api/agencies/3");
}

#[tokio::test(start_paused = true)]
async fn stats_reporter_stops_after_dispose() {
    let transport = Arc::new(ScriptedTransport::new());
    let api = optimizer(&transport, ConfigUpdate::new());

    let reporter = StatsReporter::spawn(api.clone(), Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!reporter.is_finished());

    api.dispose();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(reporter.is_finished());
}
