use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use tokenwatch_core_types::ContractRecord;
use tracing::{debug, info, warn};

use crate::{escape_markdown, AssessmentOutcome, ContractPipeline};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub candidates: usize,
    pub verified: usize,
    pub retried: usize,
    pub alerted: usize,
    pub failed: usize,
    /// Listed records another task was assessing, or had already verified.
    pub skipped: usize,
}

enum RecordSweep {
    Verified(AssessmentOutcome),
    Retried,
    Failed,
    Skipped,
}

/// Re-checks unverified records for published source and, once found, runs
/// them through the same assessment as fresh deployments.
#[derive(Clone)]
pub struct VerificationSweeper {
    pipeline: Arc<ContractPipeline>,
}

impl VerificationSweeper {
    pub fn new(pipeline: Arc<ContractPipeline>) -> Self {
        Self { pipeline }
    }

    /// Sweeps forever. The interval is re-read from settings every cycle.
    pub async fn run(self) {
        loop {
            let summary = self.run_cycle().await;
            if summary.candidates > 0 {
                info!(
                    candidates = summary.candidates,
                    verified = summary.verified,
                    retried = summary.retried,
                    alerted = summary.alerted,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "verification sweep completed"
                );
            }
            tokio::time::sleep(self.pipeline.settings().retry_interval()).await;
        }
    }

    pub async fn run_cycle(&self) -> SweepSummary {
        let retry_limit = self.pipeline.settings().snapshot().retry_limit;
        let records = match self
            .pipeline
            .with_store(|store| store.list_contracts_pending_verification(retry_limit))
        {
            Ok(records) => records,
            Err(error) => {
                warn!(
                    error = %format!("{error:#}"),
                    "failed loading contracts pending verification"
                );
                return SweepSummary::default();
            }
        };

        let mut summary = SweepSummary {
            candidates: records.len(),
            ..SweepSummary::default()
        };
        let results = join_all(records.iter().map(|record| self.sweep_record(record))).await;
        for result in results {
            match result {
                RecordSweep::Verified(outcome) => {
                    summary.verified += 1;
                    if outcome == AssessmentOutcome::Alerted {
                        summary.alerted += 1;
                    }
                }
                RecordSweep::Retried => summary.retried += 1,
                RecordSweep::Failed => summary.failed += 1,
                RecordSweep::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    async fn sweep_record(&self, record: &ContractRecord) -> RecordSweep {
        let chain = record.chain;
        let address = record.address.as_str();
        let Some(_claim) = self.pipeline.in_flight().try_claim(address) else {
            debug!(chain = %chain, address, "assessment in progress elsewhere, skipping");
            return RecordSweep::Skipped;
        };
        // The listing may predate an assessment that finished since.
        match self.pipeline.with_store(|store| store.get_contract(address)) {
            Ok(Some(current)) if !current.verified => {}
            Ok(_) => {
                debug!(chain = %chain, address, "record no longer pending verification");
                return RecordSweep::Skipped;
            }
            Err(error) => {
                warn!(
                    chain = %chain,
                    address,
                    error = %format!("{error:#}"),
                    "failed to reload contract record"
                );
                return RecordSweep::Failed;
            }
        }
        let Some(source) = self.pipeline.aggregator().fetch_source(chain, address).await else {
            let now = Utc::now();
            return match self
                .pipeline
                .with_store(|store| store.increment_contract_retry(address, now))
            {
                Ok(retry_count) => {
                    debug!(chain = %chain, address, retry_count, "source still unpublished");
                    RecordSweep::Retried
                }
                Err(error) => {
                    warn!(
                        chain = %chain,
                        address,
                        error = %format!("{error:#}"),
                        "failed to bump verification retry count"
                    );
                    RecordSweep::Failed
                }
            };
        };

        let now = Utc::now();
        if let Err(error) = self
            .pipeline
            .with_store(|store| store.mark_contract_verified(address, &source, now))
        {
            warn!(
                chain = %chain,
                address,
                error = %format!("{error:#}"),
                "failed to mark contract verified"
            );
            return RecordSweep::Failed;
        }
        info!(chain = %chain, address, "contract source verified by sweeper");
        let settings = self.pipeline.settings().snapshot();
        if settings.notify_discoveries {
            let symbol = record
                .token_details
                .as_ref()
                .map(|token| escape_markdown(&token.symbol))
                .unwrap_or_default();
            let text = format!("Contract `{address}` {symbol} on {chain} has been verified.");
            self.pipeline.send_notice(&settings.chat_id, &text).await;
        }

        match self.pipeline.assess(record, Some(source)).await {
            Ok(outcome) => RecordSweep::Verified(outcome),
            Err(error) => {
                warn!(
                    chain = %chain,
                    address,
                    error = %format!("{error:#}"),
                    "assessment of verified contract failed"
                );
                RecordSweep::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_pipeline, scoring_report, Fakes};
    use tokenwatch_core_types::Chain;

    #[tokio::test]
    async fn exhausted_records_stay_unverified_and_are_ignored() {
        let fakes = Fakes::passing(scoring_report(90, 0));
        fakes.source.set(None);
        let harness = build_pipeline(&fakes);
        harness
            .pipeline
            .settings()
            .set_int("RETRY_LIMIT", "3")
            .expect("valid setting");
        harness.seed_unverified("0xAA00000000000000000000000000000000000001", Chain::Eth);
        let sweeper = VerificationSweeper::new(Arc::clone(&harness.pipeline));

        for _ in 0..3 {
            let summary = sweeper.run_cycle().await;
            assert_eq!(summary.candidates, 1);
            assert_eq!(summary.retried, 1);
        }
        let record = harness.record("0xaa00000000000000000000000000000000000001");
        assert!(!record.verified);
        assert_eq!(record.retry_count, 3);

        let calls_before = fakes.source.calls();
        let summary = sweeper.run_cycle().await;
        assert_eq!(summary, SweepSummary::default());
        assert_eq!(fakes.source.calls(), calls_before);
        assert_eq!(harness.record("0xaa00000000000000000000000000000000000001").retry_count, 3);
    }

    #[tokio::test]
    async fn newly_published_source_is_verified_and_assessed() {
        let fakes = Fakes::passing(scoring_report(85, 0));
        let harness = build_pipeline(&fakes);
        harness.seed_unverified("0xbb00000000000000000000000000000000000002", Chain::Base);
        let sweeper = VerificationSweeper::new(Arc::clone(&harness.pipeline));

        let summary = sweeper.run_cycle().await;

        assert_eq!(
            summary,
            SweepSummary {
                candidates: 1,
                verified: 1,
                alerted: 1,
                ..SweepSummary::default()
            }
        );
        let record = harness.record("0xbb00000000000000000000000000000000000002");
        assert!(record.verified);
        assert_eq!(record.source_code.as_deref(), Some("contract Foo {}"));
        assert_eq!(record.retry_count, 0);
        assert!(record.risk_report.is_some());
        // The sweeper already holds the source; the aggregator must not refetch.
        assert_eq!(fakes.source.calls(), 1);
        assert_eq!(harness.notifier.messages().len(), 1);

        assert_eq!(sweeper.run_cycle().await.candidates, 0);
    }

    #[tokio::test]
    async fn claimed_records_are_left_to_their_owner() {
        let fakes = Fakes::passing(scoring_report(85, 0));
        let harness = build_pipeline(&fakes);
        harness.seed_unverified("0xcc00000000000000000000000000000000000003", Chain::Eth);
        let sweeper = VerificationSweeper::new(Arc::clone(&harness.pipeline));

        let claim = harness
            .pipeline
            .in_flight()
            .try_claim("0xCC00000000000000000000000000000000000003")
            .expect("claim");
        let summary = sweeper.run_cycle().await;
        assert_eq!(
            summary,
            SweepSummary {
                candidates: 1,
                skipped: 1,
                ..SweepSummary::default()
            }
        );
        assert_eq!(fakes.source.calls(), 0);
        assert_eq!(
            harness.record("0xcc00000000000000000000000000000000000003").retry_count,
            0
        );

        drop(claim);
        let summary = sweeper.run_cycle().await;
        assert_eq!(summary.verified, 1);
        assert_eq!(summary.alerted, 1);
        assert_eq!(harness.notifier.messages().len(), 1);
    }
}
