//! Route-driven cache warming.
//!
//! A [`PrefetchRule`] maps a route pattern (exact path or regular
//! expression) to endpoint templates. When the application navigates to a
//! location, every matching rule contributes its templates; the union is
//! de-duplicated and each endpoint is issued as a cacheable `GET` through
//! the optimizer, staggered by `prefetch_stagger_ms` so endpoint *i* starts
//! at `i * stagger`.
//!
//! A template may contain one `{name}` placeholder, which resolves to the
//! trailing path segment of the location (`/agencies/42` gives `42`). A
//! template that cannot be resolved is skipped, never sent literally.
//!
//! Prefetch failures are logged and swallowed. Scheduling a new prefetch
//! cancels the pending part of the previous one; requests already issued
//! run to completion.

use std::sync::Mutex;

use regex::Regex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::debug;

use crate::types::{normalize_url, trailing_segment};
use crate::{HuginnError, Optimizer, Result, telemetry};

/// How a rule matches a location path.
#[derive(Debug, Clone)]
pub enum RoutePattern {
    /// Path equality after normalization.
    Exact(String),
    /// Regular expression over the location path.
    Regex(Regex),
}

impl RoutePattern {
    pub fn exact(path: impl AsRef<str>) -> Self {
        RoutePattern::Exact(path_of(path.as_ref()))
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern).map(RoutePattern::Regex).map_err(|e| {
            HuginnError::Configuration(format!("invalid route pattern '{pattern}': {e}"))
        })
    }

    pub fn matches(&self, location: &str) -> bool {
        let path = path_of(location);
        match self {
            RoutePattern::Exact(expected) => *expected == path,
            RoutePattern::Regex(re) => re.is_match(&path),
        }
    }
}

/// Endpoints to warm when a route pattern matches.
#[derive(Debug, Clone)]
pub struct PrefetchRule {
    pub pattern: RoutePattern,
    pub endpoints: Vec<String>,
}

impl PrefetchRule {
    pub fn new<I, S>(pattern: RoutePattern, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pattern,
            endpoints: endpoints.into_iter().map(Into::into).collect(),
        }
    }

    /// Rule matching `path` exactly.
    pub fn exact<I, S>(path: &str, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RoutePattern::exact(path), endpoints)
    }
}

/// Endpoints resolved for one location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchPlan {
    /// De-duplicated, in first-seen rule order.
    pub endpoints: Vec<String>,
    /// Templates that could not be resolved.
    pub skipped: usize,
}

/// Resolve the endpoints `rules` associate with `location`.
pub fn plan(rules: &[PrefetchRule], location: &str) -> PrefetchPlan {
    let mut plan = PrefetchPlan::default();
    for rule in rules.iter().filter(|r| r.pattern.matches(location)) {
        for template in &rule.endpoints {
            match resolve_template(template, location) {
                Some(url) => {
                    if !plan.endpoints.contains(&url) {
                        plan.endpoints.push(url);
                    }
                }
                None => {
                    debug!(template, location, "unresolvable prefetch template");
                    plan.skipped += 1;
                }
            }
        }
    }
    plan
}

/// Substitute `{name}` placeholders with the location's trailing segment.
///
/// Returns `None` for malformed placeholders or when the location has no
/// segment to substitute.
pub fn resolve_template(template: &str, location: &str) -> Option<String> {
    if !template.contains('{') && !template.contains('}') {
        return Some(template.to_string());
    }
    let value = trailing_segment(location)?;

    let mut resolved = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let (head, tail) = rest.split_at(open);
        if head.contains('}') {
            return None;
        }
        resolved.push_str(head);
        let close = tail.find('}')?;
        let name = &tail[1..close];
        if name.is_empty() || name.contains('{') {
            return None;
        }
        resolved.push_str(value);
        rest = &tail[close + 1..];
    }
    if rest.contains('}') {
        return None;
    }
    resolved.push_str(rest);
    Some(resolved)
}

fn path_of(location: &str) -> String {
    let normalized = normalize_url(location);
    match normalized.split_once('?') {
        Some((path, _)) => path.to_string(),
        None => normalized,
    }
}

/// Outcome of one prefetch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Requests sent to the optimizer.
    pub issued: usize,
    /// Issued requests that failed.
    pub failed: usize,
    /// Templates that could not be resolved.
    pub skipped: usize,
    /// Cancelled before every endpoint was issued.
    pub cancelled: bool,
}

/// Handle on a scheduled prefetch.
///
/// Dropping it does not cancel the prefetch.
pub struct PrefetchHandle {
    task: JoinHandle<PrefetchReport>,
}

impl PrefetchHandle {
    /// Wait for every issued request to settle.
    pub async fn finished(self) -> PrefetchReport {
        self.task.await.unwrap_or(PrefetchReport {
            cancelled: true,
            ..PrefetchReport::default()
        })
    }

    /// Stop issuing further endpoints.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Runs at most one prefetch at a time per optimizer.
#[derive(Default)]
pub struct PrefetchScheduler {
    current: Mutex<Option<AbortHandle>>,
}

impl PrefetchScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start warming the endpoints for `location`, cancelling any earlier
    /// run. Must be called within a tokio runtime.
    pub fn schedule(
        &self,
        optimizer: Optimizer,
        rules: &[PrefetchRule],
        location: &str,
    ) -> PrefetchHandle {
        let plan = plan(rules, location);
        let stagger = optimizer.config().prefetch_stagger();
        debug!(
            location,
            endpoints = plan.endpoints.len(),
            skipped = plan.skipped,
            "scheduling prefetch"
        );

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let mut issued = Vec::with_capacity(plan.endpoints.len());
            for (i, url) in plan.endpoints.into_iter().enumerate() {
                let offset = stagger.saturating_mul(u32::try_from(i).unwrap_or(u32::MAX));
                tokio::time::sleep(offset.saturating_sub(start.elapsed())).await;
                let optimizer = optimizer.clone();
                issued.push(tokio::spawn(async move {
                    let result = optimizer.get(&url).await;
                    let status = if result.is_ok() { "ok" } else { "error" };
                    metrics::counter!(telemetry::PREFETCH_TOTAL, "status" => status).increment(1);
                    if let Err(e) = &result {
                        debug!(url = %url, error = %e, "prefetch failed");
                    }
                    result.is_ok()
                }));
            }

            let mut report = PrefetchReport {
                issued: issued.len(),
                skipped: plan.skipped,
                ..PrefetchReport::default()
            };
            for handle in issued {
                if !handle.await.unwrap_or(false) {
                    report.failed += 1;
                }
            }
            report
        });

        let previous = self
            .lock()
            .replace(task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
        PrefetchHandle { task }
    }

    /// Cancel the pending part of the current run, if any.
    pub fn cancel(&self) {
        if let Some(current) = self.lock().take() {
            current.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
