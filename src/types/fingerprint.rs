//! Request fingerprints and URL helpers.
//!
//! A [`Fingerprint`] is the identity of a request for cache lookup,
//! coalescing and exact-key invalidation. It is built from the method, the
//! normalized URL and, when present, a hash of the canonical JSON body.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use super::Method;

/// Deterministic request identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build a fingerprint from an already-normalized URL.
    ///
    /// `serde_json::Value` objects serialize with sorted keys, so two bodies
    /// with the same content always hash the same.
    pub fn new(method: Method, normalized_url: &str, body: Option<&Value>) -> Self {
        match body {
            Some(body) => Self(format!(
                "{method} {normalized_url} #{:016x}",
                body_hash(body)
            )),
            None => Self(format!("{method} {normalized_url}")),
        }
    }

    /// Normalize `url` and build the fingerprint.
    pub fn of(method: Method, url: &str, body: Option<&Value>) -> Self {
        Self::new(method, &normalize_url(url), body)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hash of the canonical body serialization.
///
/// `DefaultHasher` is deterministic within a process lifetime, which is
/// all an in-memory cache needs.
fn body_hash(body: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    body.to_string().hash(&mut hasher);
    hasher.finish()
}

/// Normalize a URL so logically identical requests compare equal.
///
/// Trims whitespace, drops the fragment, strips trailing slashes from the
/// path (the root path is kept) and sorts query pairs.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or_default();
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };

    let mut normalized = path.to_string();
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    if let Some(query) = query {
        let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
        if !pairs.is_empty() {
            pairs.sort_unstable();
            normalized.push('?');
            normalized.push_str(&pairs.join("&"));
        }
    }
    normalized
}

/// Split a URL into `(origin, path)`, ignoring any query string.
///
/// Relative URLs have an empty origin.
fn split_origin(url: &str) -> (&str, &str) {
    let url = url.split('?').next().unwrap_or_default();
    match url.find("://") {
        Some(scheme_end) => {
            let after_scheme = scheme_end + 3;
            match url[after_scheme..].find('/') {
                Some(path_start) => url.split_at(after_scheme + path_start),
                None => (url, ""),
            }
        }
        None => ("", url),
    }
}

/// Endpoint key of a URL: origin plus the first `depth` path segments.
///
/// This is the unit of throttling and the prefix a successful mutation
/// invalidates: `/api/agencies/42` and `/api/agencies?page=2` both map to
/// `/api/agencies` at depth 2.
pub fn endpoint_key(url: &str, depth: usize) -> String {
    let (origin, path) = split_origin(url);
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .take(depth.max(1))
        .collect();
    format!("{origin}/{}", segments.join("/"))
}

/// Whether `url` is `prefix` itself or lies below it.
///
/// Matching stops at segment boundaries: `/api/agencies` covers
/// `/api/agencies/1` and `/api/agencies?page=2` but not
/// `/api/agencies-archive`. A prefix ending in `/` covers everything
/// under that path.
pub fn under_prefix(url: &str, prefix: &str) -> bool {
    match url.strip_prefix(prefix) {
        Some(rest) => {
            rest.is_empty()
                || prefix.ends_with('/')
                || rest.starts_with('/')
                || rest.starts_with('?')
        }
        None => false,
    }
}

/// Last non-empty path segment of a location, used to resolve templated
/// prefetch endpoints.
pub fn trailing_segment(location: &str) -> Option<&str> {
    let (_, path) = split_origin(location);
    path.split('/').rev().find(|s| !s.is_empty())
}
