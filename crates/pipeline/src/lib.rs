//! Per-contract risk pipeline: classify a fresh deployment, persist it, run
//! the risk aggregation, and alert when the report clears the thresholds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokenwatch_config::SettingsHandle;
use tokenwatch_core_types::{
    normalize_address, AggregationOutcome, Chain, ContractRecord, DeploymentCandidate,
    DeploymentEvent, TokenDetails, Verdict, VetoReason,
};
use tokenwatch_storage::{is_retryable_sqlite_anyhow_error, SqliteStore};
use tracing::{debug, info, warn};

pub mod aggregator;
pub mod decision;
pub mod dispatch;
pub mod inflight;
pub mod notify;
pub mod status;
pub mod sweeper;

pub use aggregator::{AggregationRun, RiskAggregator};
pub use decision::{decide, escape_markdown, evaluate, AlertSubject, Decision, RejectReason};
pub use dispatch::{
    dispatch_channel, spawn_supervisor, CandidateProcessor, DispatchQueue, Dispatcher,
    SupervisorHandle,
};
pub use inflight::{InFlightAddresses, InFlightClaim};
pub use notify::{Notifier, TelegramNotifier};
pub use status::{MonitorControl, StatusSnapshot};
pub use sweeper::{SweepSummary, VerificationSweeper};

pub type SharedStore = Arc<Mutex<SqliteStore>>;

/// Chain-side lookups the pipeline needs for one candidate.
#[async_trait]
pub trait DeploymentInspector: Send + Sync {
    /// `Ok(None)` when the transaction created no contract.
    async fn resolve_deployment(
        &self,
        candidate: &DeploymentCandidate,
    ) -> Result<Option<DeploymentEvent>>;

    /// `None` unless `name()`, `symbol()` and `decimals()` all answer.
    async fn classify_erc20(&self, chain: Chain, address: &str) -> Option<TokenDetails>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssessmentOutcome {
    Alerted,
    AlertUndelivered,
    Filtered(RejectReason),
    Vetoed(VetoReason),
    Abandoned { attempts: u32 },
}

impl AssessmentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alerted => "alerted",
            Self::AlertUndelivered => "alert_undelivered",
            Self::Filtered(_) => "filtered",
            Self::Vetoed(_) => "vetoed",
            Self::Abandoned { .. } => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    NotAContract,
    Duplicate,
    NotToken,
    Assessed(AssessmentOutcome),
}

pub struct ContractPipeline {
    store: SharedStore,
    inspector: Arc<dyn DeploymentInspector>,
    aggregator: RiskAggregator,
    notifier: Arc<dyn Notifier>,
    settings: SettingsHandle,
    in_flight: InFlightAddresses,
}

impl ContractPipeline {
    pub fn new(
        store: SharedStore,
        inspector: Arc<dyn DeploymentInspector>,
        aggregator: RiskAggregator,
        notifier: Arc<dyn Notifier>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            store,
            inspector,
            aggregator,
            notifier,
            settings,
            in_flight: InFlightAddresses::new(),
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn pending_scoring_requests(&self) -> usize {
        self.aggregator.pending_scoring_requests()
    }

    pub(crate) fn aggregator(&self) -> &RiskAggregator {
        &self.aggregator
    }

    /// Addresses currently being assessed by a fresh-discovery task or a sweep.
    pub fn in_flight(&self) -> &InFlightAddresses {
        &self.in_flight
    }

    /// Runs `operation` against the store. The lock is never held across an
    /// await point.
    pub(crate) fn with_store<T>(
        &self,
        operation: impl FnOnce(&SqliteStore) -> Result<T>,
    ) -> Result<T> {
        let store = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        operation(&store)
    }

    pub async fn process_candidate(
        &self,
        candidate: &DeploymentCandidate,
    ) -> Result<CandidateOutcome> {
        let Some(event) = self
            .inspector
            .resolve_deployment(candidate)
            .await
            .with_context(|| format!("failed resolving deployment tx {}", candidate.tx_hash))?
        else {
            return Ok(CandidateOutcome::NotAContract);
        };
        let chain = event.chain;
        let address = normalize_address(&event.address);

        // Held until assessment ends; the sweeper skips claimed addresses.
        let Some(_claim) = self.in_flight.try_claim(&address) else {
            debug!(chain = %chain, address = %address, "contract already being assessed");
            return Ok(CandidateOutcome::Duplicate);
        };

        if self.with_store(|store| store.contract_exists(&address))? {
            debug!(chain = %chain, address = %address, "contract already recorded");
            return Ok(CandidateOutcome::Duplicate);
        }

        let Some(token_details) = self.inspector.classify_erc20(chain, &address).await else {
            debug!(chain = %chain, address = %address, "deployment is not an erc20 token");
            return Ok(CandidateOutcome::NotToken);
        };

        let source_code = self.aggregator.fetch_source(chain, &address).await;
        let mut record = ContractRecord::new_unverified(&event, token_details, Utc::now());
        if let Some(source) = source_code.as_ref() {
            record.verified = true;
            record.source_code = Some(source.clone());
        }
        if !self.with_store(|store| store.insert_contract_if_absent(&record))? {
            debug!(chain = %chain, address = %address, "contract recorded concurrently");
            return Ok(CandidateOutcome::Duplicate);
        }
        info!(
            chain = %chain,
            address = %address,
            deployer = %record.deployer,
            verified = record.verified,
            "new erc20 token recorded"
        );
        self.notify_discovery(&record).await;

        let outcome = self.assess(&record, source_code).await?;
        Ok(CandidateOutcome::Assessed(outcome))
    }

    /// Aggregates, persists the verdict, and alerts when the report passes.
    /// Shared by fresh deployments and the verification sweeper.
    pub async fn assess(
        &self,
        record: &ContractRecord,
        known_source: Option<String>,
    ) -> Result<AssessmentOutcome> {
        let chain = record.chain;
        let address = record.address.as_str();
        let source_was_known = known_source.is_some();
        let run = self.aggregator.run(chain, address, known_source).await;
        let now = Utc::now();

        if !source_was_known {
            if let Some(source) = run.source_code.as_deref() {
                self.with_store(|store| store.mark_contract_verified(address, source, now))?;
                info!(chain = %chain, address, "contract source verified during aggregation");
            }
        }

        match run.outcome {
            AggregationOutcome::Report(report) => {
                self.with_store(|store| store.store_risk_report(address, &report, now))?;
                let settings = self.settings.snapshot();
                let subject = AlertSubject {
                    chain,
                    address,
                    deployer: &record.deployer,
                    token: record.token_details.as_ref(),
                };
                match decide(
                    &subject,
                    &report,
                    settings.minimum_score,
                    settings.maximum_similar,
                ) {
                    Decision::Alert(text) => {
                        let score = report.scoring.as_ref().map(|scoring| scoring.score());
                        match self.notifier.send(&settings.chat_id, &text).await {
                            Ok(()) => {
                                info!(chain = %chain, address, score, "risk alert sent");
                                self.record_event(
                                    "alert_sent",
                                    "info",
                                    address,
                                    json!({"chain": chain.as_str(), "score": score}),
                                );
                                Ok(AssessmentOutcome::Alerted)
                            }
                            Err(error) => {
                                warn!(
                                    chain = %chain,
                                    address,
                                    error = %format!("{error:#}"),
                                    "risk alert delivery failed"
                                );
                                self.record_event(
                                    "alert_failed",
                                    "warn",
                                    address,
                                    json!({"chain": chain.as_str(), "score": score}),
                                );
                                Ok(AssessmentOutcome::AlertUndelivered)
                            }
                        }
                    }
                    Decision::Rejected(reason) => {
                        debug!(
                            chain = %chain,
                            address,
                            reason = reason.as_str(),
                            "risk report filtered"
                        );
                        Ok(AssessmentOutcome::Filtered(reason))
                    }
                }
            }
            AggregationOutcome::Vetoed(reason) => {
                self.with_store(|store| {
                    store.record_contract_verdict(address, Verdict::Vetoed, now)
                })?;
                let liquidity = match &reason {
                    VetoReason::HeuristicUnsafe { liquidity } => Some(liquidity.clone()),
                    VetoReason::SimulatedHoneypot => None,
                };
                self.record_event(
                    "vetoed",
                    "info",
                    address,
                    json!({
                        "chain": chain.as_str(),
                        "reason": reason.as_str(),
                        "liquidity": liquidity,
                    }),
                );
                Ok(AssessmentOutcome::Vetoed(reason))
            }
            AggregationOutcome::Abandoned { attempts } => {
                self.with_store(|store| {
                    store.record_contract_verdict(address, Verdict::Abandoned, now)
                })?;
                self.record_event(
                    "abandoned",
                    "warn",
                    address,
                    json!({"chain": chain.as_str(), "attempts": attempts}),
                );
                Ok(AssessmentOutcome::Abandoned { attempts })
            }
        }
    }

    async fn notify_discovery(&self, record: &ContractRecord) {
        let settings = self.settings.snapshot();
        if !settings.notify_discoveries {
            return;
        }
        let label = if record.verified { "VERIFIED" } else { "UNVERIFIED" };
        let details = record
            .token_details
            .as_ref()
            .map(|token| {
                format!(
                    "{} ({}, {} decimals)",
                    escape_markdown(&token.name),
                    escape_markdown(&token.symbol),
                    token.decimals
                )
            })
            .unwrap_or_default();
        let text = format!(
            "New {label} ERC20 token detected on {}: `{}` {} {}",
            record.chain,
            record.address,
            details,
            record.chain.explorer_token_url(&record.address)
        );
        self.send_notice(&settings.chat_id, &text).await;
    }

    /// Best-effort operator notice; failures are logged only.
    pub async fn send_notice(&self, chat_id: &str, text: &str) {
        if let Err(error) = self.notifier.send(chat_id, text).await {
            warn!(error = %format!("{error:#}"), "operator notice delivery failed");
        }
    }

    fn record_event(
        &self,
        event_type: &str,
        severity: &str,
        address: &str,
        details: serde_json::Value,
    ) {
        let details_json = details.to_string();
        if let Err(error) = self.with_store(|store| {
            store.insert_pipeline_event(
                event_type,
                severity,
                Some(address),
                Utc::now(),
                Some(&details_json),
            )
        }) {
            warn!(
                event_type,
                address,
                retryable = is_retryable_sqlite_anyhow_error(&error),
                error = %format!("{error:#}"),
                "failed to record pipeline event"
            );
        }
    }
}

#[async_trait]
impl CandidateProcessor for ContractPipeline {
    async fn process(&self, candidate: DeploymentCandidate) -> Result<()> {
        let outcome = self.process_candidate(&candidate).await?;
        debug!(
            chain = %candidate.chain,
            tx_hash = %candidate.tx_hash,
            outcome = ?outcome,
            "candidate processed"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support;
