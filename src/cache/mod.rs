//! Caching subsystem.
//!
//! [`CacheStore`] holds decoded GET responses keyed on
//! [`Fingerprint`](crate::types::Fingerprint). It is populated by the
//! optimizer after a successful cacheable call and consulted before any
//! network activity. See [`store`] module docs for freshness and
//! invalidation rules.

pub mod store;

pub use store::{CacheEntry, CacheStore};
