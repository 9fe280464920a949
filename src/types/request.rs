//! Request-side types

use std::time::Duration;

use serde_json::Value;

use super::Method;

/// A request as handed to the [`Transport`](crate::transport::Transport).
///
/// `url` is the normalized URL; the transport resolves it against its base.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            url: url.into(),
            body,
        }
    }
}

/// Per-call overrides for [`Optimizer::request_with`](crate::Optimizer::request_with).
///
/// ```rust
/// # use huginn::RequestOptions;
/// # use std::time::Duration;
/// let opts = RequestOptions::new().freshness(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Cache TTL for this response instead of the configured default.
    pub freshness: Option<Duration>,
    /// Skip the cache read (the fresh response is still stored).
    pub bypass_cache: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the freshness window of the stored response.
    pub fn freshness(mut self, ttl: Duration) -> Self {
        self.freshness = Some(ttl);
        self
    }

    /// Force a network round trip even when a fresh entry exists.
    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }
}
