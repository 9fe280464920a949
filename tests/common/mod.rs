//! Shared test transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use huginn::{
    ConfigUpdate, Huginn, HuginnError, Optimizer, OptimizerConfig, RawResponse, Result,
    Transport, TransportRequest,
};

/// Build an optimizer over `transport` with `update` applied to the
/// default configuration.
pub fn optimizer(transport: &Arc<ScriptedTransport>, update: ConfigUpdate) -> Optimizer {
    Huginn::builder()
        .shared_transport(Arc::clone(transport) as Arc<dyn Transport>)
        .config(OptimizerConfig::default().apply(&update))
        .build()
        .unwrap()
}

/// What the transport does for one call.
#[derive(Clone)]
pub enum Step {
    /// 200 with `{"method", "url", "call"}`.
    Echo,
    Reply(RawResponse),
    Fail(HuginnError),
    /// Never completes.
    Hang,
}

impl Step {
    pub fn status(status: u16) -> Self {
        Step::Reply(RawResponse::new(status, ""))
    }

    pub fn rate_limited(retry_after_secs: Option<u64>) -> Self {
        let raw = RawResponse::new(429, "slow down");
        Step::Reply(match retry_after_secs {
            Some(secs) => raw.header("Retry-After", secs.to_string()),
            None => raw,
        })
    }

    pub fn connection_reset() -> Self {
        Step::Fail(HuginnError::Transport("connection reset".into()))
    }
}

/// Transport that plays back a script, then repeats a default step.
///
/// Every call is recorded with the (tokio) time it arrived.
pub struct ScriptedTransport {
    calls: AtomicU32,
    log: Mutex<Vec<(Instant, TransportRequest)>>,
    script: Mutex<VecDeque<Step>>,
    default: Step,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::repeating(Step::Echo)
    }

    pub fn repeating(default: Step) -> Self {
        Self {
            calls: AtomicU32::new(0),
            log: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default,
            latency: Duration::ZERO,
        }
    }

    /// Queue a step ahead of the default.
    pub fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Arrival times of every call.
    pub fn times(&self) -> Vec<Instant> {
        self.log.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    /// Requests received, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: &TransportRequest) -> Result<RawResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match step {
            Step::Echo => Ok(RawResponse::json(
                200,
                &json!({
                    "method": request.method.as_str(),
                    "url": request.url,
                    "call": call,
                }),
            )),
            Step::Reply(raw) => Ok(raw),
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }
}
