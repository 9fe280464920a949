//! Optimizer configuration.
//!
//! [`OptimizerConfig`] is an immutable value. The optimizer holds the
//! current one behind an `Arc` and swaps it wholesale on
//! [`configure()`](crate::Optimizer::configure), so readers never observe a
//! half-applied update. Partial updates are expressed as a [`ConfigUpdate`].
//!
//! Configuration can also be loaded from TOML with the following
//! resolution order:
//! 1. explicit path
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! ```toml
//! max_requests_per_window = 20
//! window_length_ms = 1000
//! default_freshness_ms = 30000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{HuginnError, Result};

/// Process-wide optimizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Requests admitted per endpoint per window. Default: 10.
    pub max_requests_per_window: u32,
    /// Throttle window length. Default: 1000ms.
    pub window_length_ms: u64,
    /// Cache TTL when a call does not override it. Default: 30s.
    pub default_freshness_ms: u64,
    /// Retry budget for retryable failures (and, separately, for rate-limit
    /// waits). Default: 3.
    pub max_retries: u32,
    /// Exponential backoff base. Default: 500ms.
    pub retry_base_delay_ms: u64,
    /// Cap on any single backoff delay. Default: 30s.
    pub max_retry_delay_ms: u64,
    /// Spacing between staggered prefetch calls. Default: 100ms.
    pub prefetch_stagger_ms: u64,
    /// Ceiling for one transport call. Default: 30s.
    pub request_timeout_ms: u64,
    /// Backoff base after a 429 without `Retry-After`. Default: 1000ms.
    pub rate_limit_backoff_ms: u64,
    /// Maximum cached responses. Default: 10,000.
    pub cache_capacity: u64,
    /// Path segments that form an endpoint key. Default: 2.
    pub endpoint_depth: usize,
    /// Fall back to a single direct transport call once the optimized path
    /// has exhausted its retries. Default: true.
    pub direct_fallback: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 10,
            window_length_ms: 1_000,
            default_freshness_ms: 30_000,
            max_retries: 3,
            retry_base_delay_ms: 500,
            max_retry_delay_ms: 30_000,
            prefetch_stagger_ms: 100,
            request_timeout_ms: 30_000,
            rate_limit_backoff_ms: 1_000,
            cache_capacity: 10_000,
            endpoint_depth: 2,
            direct_fallback: true,
        }
    }
}

impl OptimizerConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window_length(&self) -> Duration {
        Duration::from_millis(self.window_length_ms)
    }

    pub fn default_freshness(&self) -> Duration {
        Duration::from_millis(self.default_freshness_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn prefetch_stagger(&self) -> Duration {
        Duration::from_millis(self.prefetch_stagger_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// Uses exponential backoff: `retry_base_delay * 2^attempt`, capped at
    /// `max_retry_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .retry_base_delay()
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_retry_delay())
    }

    /// Produce a new config with `update` applied on top of `self`.
    pub fn apply(&self, update: &ConfigUpdate) -> Self {
        Self {
            max_requests_per_window: update
                .max_requests_per_window
                .unwrap_or(self.max_requests_per_window),
            window_length_ms: update.window_length_ms.unwrap_or(self.window_length_ms),
            default_freshness_ms: update
                .default_freshness_ms
                .unwrap_or(self.default_freshness_ms),
            max_retries: update.max_retries.unwrap_or(self.max_retries),
            retry_base_delay_ms: update
                .retry_base_delay_ms
                .unwrap_or(self.retry_base_delay_ms),
            max_retry_delay_ms: update.max_retry_delay_ms.unwrap_or(self.max_retry_delay_ms),
            prefetch_stagger_ms: update
                .prefetch_stagger_ms
                .unwrap_or(self.prefetch_stagger_ms),
            request_timeout_ms: update.request_timeout_ms.unwrap_or(self.request_timeout_ms),
            rate_limit_backoff_ms: update
                .rate_limit_backoff_ms
                .unwrap_or(self.rate_limit_backoff_ms),
            cache_capacity: update.cache_capacity.unwrap_or(self.cache_capacity),
            endpoint_depth: update.endpoint_depth.unwrap_or(self.endpoint_depth),
            direct_fallback: update.direct_fallback.unwrap_or(self.direct_fallback),
        }
    }

    /// Reject values the optimizer cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests_per_window == 0 {
            return Err(HuginnError::Configuration(
                "max_requests_per_window must be at least 1".into(),
            ));
        }
        if self.window_length_ms == 0 {
            return Err(HuginnError::Configuration(
                "window_length_ms must be positive".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(HuginnError::Configuration(
                "request_timeout_ms must be positive".into(),
            ));
        }
        if self.endpoint_depth == 0 {
            return Err(HuginnError::Configuration(
                "endpoint_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HuginnError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.huginn/config.toml`
    /// 3. `/etc/huginn/config.toml`
    ///
    /// Returns the defaults when no file exists and no path was given.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_config_path(explicit_path)? else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml_str(&content)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".huginn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/huginn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}

/// Partial configuration update; unset fields keep their current value.
///
/// ```rust
/// # use huginn::ConfigUpdate;
/// let update = ConfigUpdate::new()
///     .max_requests_per_window(2)
///     .window_length_ms(1000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigUpdate {
    pub max_requests_per_window: Option<u32>,
    pub window_length_ms: Option<u64>,
    pub default_freshness_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
    pub prefetch_stagger_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub rate_limit_backoff_ms: Option<u64>,
    pub cache_capacity: Option<u64>,
    pub endpoint_depth: Option<usize>,
    pub direct_fallback: Option<bool>,
}

impl ConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_requests_per_window(mut self, n: u32) -> Self {
        self.max_requests_per_window = Some(n);
        self
    }

    pub fn window_length_ms(mut self, ms: u64) -> Self {
        self.window_length_ms = Some(ms);
        self
    }

    pub fn default_freshness_ms(mut self, ms: u64) -> Self {
        self.default_freshness_ms = Some(ms);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.retry_base_delay_ms = Some(ms);
        self
    }

    pub fn max_retry_delay_ms(mut self, ms: u64) -> Self {
        self.max_retry_delay_ms = Some(ms);
        self
    }

    pub fn prefetch_stagger_ms(mut self, ms: u64) -> Self {
        self.prefetch_stagger_ms = Some(ms);
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    pub fn rate_limit_backoff_ms(mut self, ms: u64) -> Self {
        self.rate_limit_backoff_ms = Some(ms);
        self
    }

    /// Only takes effect when the optimizer is built; the store is not
    /// resized afterwards.
    pub fn cache_capacity(mut self, n: u64) -> Self {
        self.cache_capacity = Some(n);
        self
    }

    pub fn endpoint_depth(mut self, depth: usize) -> Self {
        self.endpoint_depth = Some(depth);
        self
    }

    pub fn direct_fallback(mut self, enabled: bool) -> Self {
        self.direct_fallback = Some(enabled);
        self
    }
}
