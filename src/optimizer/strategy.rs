//! Ordered fallback strategies.
//!
//! A request is attempted by each [`Strategy`] in turn. The next strategy
//! only runs when the previous one failed with a transient classification
//! (i.e. its retries were exhausted); permanent errors end the chain.
//!
//! ```text
//! request --> Optimized --ok--> caller
//!                 |
//!                 | transient error (retries exhausted)
//!                 v
//!              Direct --ok / any error--> caller
//! ```

use std::fmt;

use crate::{HuginnError, OptimizerConfig};

/// One way of getting a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Cache, coalescing, throttle, timeout and retry around the transport.
    Optimized,
    /// A single raw transport call with timeout only. No cache, throttle,
    /// coalescing or retry. Last resort when the optimized path is failing.
    Direct,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Optimized => "optimized",
            Strategy::Direct => "direct",
        }
    }

    /// Strategies to try, in order, under `config`.
    pub fn chain(config: &OptimizerConfig) -> Vec<Strategy> {
        let mut chain = vec![Strategy::Optimized];
        if config.direct_fallback {
            chain.push(Strategy::Direct);
        }
        chain
    }

    /// Whether a failure of this strategy should fall through to the next.
    pub fn falls_through(err: &HuginnError) -> bool {
        err.is_transient()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
