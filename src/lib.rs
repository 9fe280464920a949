//! Huginn - request orchestration in front of an HTTP API
//!
//! Huginn sits between application code and the network. Every request
//! goes through one [`Optimizer`], which
//!
//! - serves fresh reads from a fingerprint-keyed cache,
//! - merges identical concurrent requests into one transport call,
//! - paces traffic per endpoint and backs off on HTTP 429,
//! - retries transient failures and falls back to a direct call,
//! - invalidates cached reads when a mutation succeeds,
//! - warms the cache ahead of navigation with route-driven prefetch.
//!
//! # Example
//!
//! ```rust,no_run
//! use huginn::{Huginn, PrefetchRule};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let api = Huginn::builder()
//!         .http("https://api.example.com")
//!         .build()?;
//!
//!     // Network round trip, then cached for the default freshness window.
//!     let agencies = api.get("/api/agencies").await?;
//!     println!("{}", agencies.body);
//!
//!     // Invalidates every cached read under /api/agencies.
//!     api.patch("/api/agencies/1", &json!({ "name": "Updated" })).await?;
//!
//!     // Warm the detail view before the user opens it.
//!     let rules = [PrefetchRule::exact("/agencies", ["/api/agencies", "/api/regions"])];
//!     let report = api.prefetch(&rules, "/agencies").finished().await;
//!     println!("prefetched {} endpoints", report.issued);
//!
//!     println!("{:?}", api.stats());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod optimizer;
pub mod prefetch;
pub mod stats;
pub mod telemetry;
pub mod throttle;
pub mod transport;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use config::{ConfigUpdate, OptimizerConfig};
pub use error::{HuginnError, Result};
pub use optimizer::{Huginn, HuginnBuilder, Optimizer, Strategy};
pub use prefetch::{PrefetchHandle, PrefetchReport, PrefetchRule, RoutePattern};
pub use stats::{Stats, StatsReporter};
pub use transport::{HttpTransport, Transport};
pub use types::{Fingerprint, Method, RawResponse, RequestOptions, Response, TransportRequest};
pub use version::{BuildInfo, PKG_VERSION, version_string};
