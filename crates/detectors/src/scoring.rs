use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokenwatch_core_types::{Chain, ScoringReport};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::http_utils::{
    classify_request_error, duration_millis, parse_retry_after, redacted_endpoint_label,
    trim_base_url,
};
use crate::ScoringDetector;

/// Process-wide cap on concurrent scoring polls plus an observable in-flight
/// count. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct ScoringGate {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
}

/// Held for the whole poll. Dropping it (completion, error, cancellation)
/// frees the slot and decrements the in-flight count.
#[derive(Debug)]
pub struct ScoringPermit {
    _slot: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ScoringPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ScoringGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    pub async fn acquire(&self) -> Result<ScoringPermit> {
        let slot = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .context("scoring gate closed")?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(ScoringPermit {
            _slot: slot,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoringPoll {
    Ready(Value),
    Pending,
    RateLimited,
    Failed(String),
}

/// Classifies one poll response from its status and body.
pub fn classify_scoring_response(status: StatusCode, body: Option<Value>) -> ScoringPoll {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ScoringPoll::RateLimited;
    }
    if status == StatusCode::ACCEPTED {
        return ScoringPoll::Pending;
    }
    if !status.is_success() {
        return ScoringPoll::Failed(format!("http_status_{}", status.as_u16()));
    }
    let Some(payload) = body else {
        return ScoringPoll::Failed("invalid_json".to_string());
    };
    if !payload.is_object() {
        return ScoringPoll::Failed("unexpected_payload".to_string());
    }
    let state = payload
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);
    match state.as_deref() {
        Some("pending") => ScoringPoll::Pending,
        _ => ScoringPoll::Ready(payload),
    }
}

/// Scoring API client. Polls until the report is ready, holding a gate
/// permit the whole time.
#[derive(Debug, Clone)]
pub struct TokenScoringDetector {
    client: Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    gate: ScoringGate,
}

impl TokenScoringDetector {
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: &str,
        poll_interval: Duration,
        gate: ScoringGate,
    ) -> Self {
        Self {
            client,
            base_url: trim_base_url(base_url),
            api_key: api_key.trim().to_string(),
            poll_interval,
            gate,
        }
    }

    pub fn gate(&self) -> &ScoringGate {
        &self.gate
    }

    async fn poll_once(&self, url: &str) -> (ScoringPoll, Option<Duration>) {
        let response = match self
            .client
            .get(url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("include_metrics", "true"),
                ("include_tests", "true"),
                ("include_similar", "true"),
                ("block_until_ready", "true"),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                return (
                    ScoringPoll::Failed(format!("request_{}", classify_request_error(&error))),
                    None,
                )
            }
        };
        let status = response.status();
        let retry_after = parse_retry_after(&response);
        let body = if status.is_success() && status != StatusCode::ACCEPTED {
            response.json::<Value>().await.ok()
        } else {
            None
        };
        (classify_scoring_response(status, body), retry_after)
    }

    async fn poll_until_ready(&self, chain: Chain, address: &str) -> Option<ScoringReport> {
        let url = format!("{}/{}/{}", self.base_url, chain.chain_id(), address);
        let mut polls = 0u32;
        loop {
            polls = polls.saturating_add(1);
            let (poll, retry_after) = self.poll_once(&url).await;
            match poll {
                ScoringPoll::Ready(payload) => {
                    debug!(chain = %chain, address, polls, "scoring report ready");
                    return Some(ScoringReport { payload });
                }
                ScoringPoll::Pending | ScoringPoll::RateLimited => {
                    let wait = retry_after
                        .map(|hint| hint.max(self.poll_interval))
                        .unwrap_or(self.poll_interval);
                    debug!(
                        chain = %chain,
                        address,
                        polls,
                        rate_limited = matches!(poll, ScoringPoll::RateLimited),
                        wait_ms = duration_millis(wait),
                        "scoring report not ready"
                    );
                    tokio::time::sleep(wait).await;
                }
                ScoringPoll::Failed(reason) => {
                    warn!(
                        chain = %chain,
                        address,
                        polls,
                        endpoint = %redacted_endpoint_label(&self.base_url),
                        reason = %reason,
                        "scoring request failed"
                    );
                    return None;
                }
            }
        }
    }
}

#[async_trait]
impl ScoringDetector for TokenScoringDetector {
    async fn score(&self, chain: Chain, address: &str) -> Option<ScoringReport> {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(error) => {
                warn!(chain = %chain, address, error = %error, "scoring gate unavailable");
                return None;
            }
        };
        self.poll_until_ready(chain, address).await
    }

    fn pending_requests(&self) -> usize {
        self.gate.in_flight()
    }
}
