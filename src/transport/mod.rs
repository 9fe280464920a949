//! The network boundary.
//!
//! The optimizer never talks to the network directly; it goes through a
//! [`Transport`]. Credentials, cookies and other session context are the
//! transport's business.

mod http;

pub use http::HttpTransport;

use async_trait::async_trait;

use crate::Result;
use crate::types::{RawResponse, TransportRequest};

/// Sends one request and returns the raw reply.
///
/// Implementations report connection-level failures as
/// [`HuginnError::Transport`](crate::HuginnError::Transport). Any HTTP status,
/// including 4xx and 5xx, is a successful send: classification is done by
/// the optimizer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "transport"
    }

    async fn send(&self, request: &TransportRequest) -> Result<RawResponse>;
}
