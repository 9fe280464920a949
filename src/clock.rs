//! Time source for freshness and throttle decisions.

use tokio::time::Instant;

/// Monotonic clock.
///
/// The default [`TokioClock`] follows tokio's clock, so tests can freeze
/// and advance time with `tokio::time::pause()` / `advance()`.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by `tokio::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
