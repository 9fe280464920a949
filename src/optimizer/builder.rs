//! Builder for configuring optimizer instances

use std::sync::Arc;

use super::Optimizer;
use crate::clock::{Clock, TokioClock};
use crate::transport::{HttpTransport, Transport};
use crate::{HuginnError, OptimizerConfig, Result};

/// Main entry point for creating optimizer instances.
pub struct Huginn;

impl Huginn {
    /// Create a new builder for configuring the optimizer.
    pub fn builder() -> HuginnBuilder {
        HuginnBuilder::new()
    }
}

/// Builder for configuring optimizer instances.
pub struct HuginnBuilder {
    transport: Option<Arc<dyn Transport>>,
    config: OptimizerConfig,
    clock: Arc<dyn Clock>,
}

impl HuginnBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            config: OptimizerConfig::default(),
            clock: Arc::new(TokioClock),
        }
    }

    /// Use an HTTP transport rooted at `base_url`.
    pub fn http(self, base_url: impl Into<String>) -> Self {
        self.transport(HttpTransport::new(base_url))
    }

    /// Use a custom transport.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use a transport that is shared with other owners.
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom clock for freshness and throttle decisions.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the optimizer.
    ///
    /// Fails if no transport was given or the configuration is invalid.
    pub fn build(self) -> Result<Optimizer> {
        let transport = self
            .transport
            .ok_or_else(|| HuginnError::Configuration("no transport configured".into()))?;
        self.config.validate()?;
        Ok(Optimizer::new(transport, self.config, self.clock))
    }
}

impl Default for HuginnBuilder {
    fn default() -> Self {
        Self::new()
    }
}
