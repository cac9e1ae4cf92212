use std::time::Duration;
use tokenwatch_config::SettingsHandle;
use tokenwatch_core_types::{AggregationOutcome, Chain, RiskReport, VetoReason};
use tokenwatch_detectors::DetectorSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRun {
    /// Source text held at the end of the run, whether passed in or fetched.
    pub source_code: Option<String>,
    pub outcome: AggregationOutcome,
}

/// Sequences source verification, the two veto detectors and the scoring
/// poll for one contract.
#[derive(Clone)]
pub struct RiskAggregator {
    detectors: DetectorSet,
    settings: SettingsHandle,
}

impl RiskAggregator {
    pub fn new(detectors: DetectorSet, settings: SettingsHandle) -> Self {
        Self {
            detectors,
            settings,
        }
    }

    pub async fn fetch_source(&self, chain: Chain, address: &str) -> Option<String> {
        self.detectors.source.fetch_source(chain, address).await
    }

    pub fn pending_scoring_requests(&self) -> usize {
        self.detectors.scoring.pending_requests()
    }

    pub async fn run(
        &self,
        chain: Chain,
        address: &str,
        known_source: Option<String>,
    ) -> AggregationRun {
        let settings = self.settings.snapshot();
        let max_attempts = settings.api_max_retries.max(1);
        let retry_interval = Duration::from_secs(settings.retry_interval_api_secs);
        let scoring_deadline = Duration::from_secs(settings.scoring_deadline_secs);

        let mut source_code = known_source;
        let mut attempts = 0u32;
        loop {
            if source_code.is_none() {
                source_code = self.fetch_source(chain, address).await;
            }

            if source_code.is_some() {
                let (heuristic, simulation) = tokio::join!(
                    self.detectors.heuristic.inspect(chain, address),
                    self.detectors.simulation.simulate(chain, address)
                );

                if let Some(report) = heuristic
                    .as_ref()
                    .filter(|report| report.is_definitive_unsafe())
                {
                    info!(
                        chain = %chain,
                        address,
                        liquidity = %report.liquidity,
                        "heuristic detector flagged contract unsafe"
                    );
                    return AggregationRun {
                        source_code,
                        outcome: AggregationOutcome::Vetoed(VetoReason::HeuristicUnsafe {
                            liquidity: report.liquidity.clone(),
                        }),
                    };
                }
                if simulation.as_ref().is_some_and(|report| report.is_honeypot) {
                    info!(chain = %chain, address, "simulation flagged contract as honeypot");
                    return AggregationRun {
                        source_code,
                        outcome: AggregationOutcome::Vetoed(VetoReason::SimulatedHoneypot),
                    };
                }

                if let (Some(heuristic), Some(simulation)) = (heuristic, simulation) {
                    let scoring = match tokio::time::timeout(
                        scoring_deadline,
                        self.detectors.scoring.score(chain, address),
                    )
                    .await
                    {
                        Ok(scoring) => scoring,
                        Err(_) => {
                            warn!(
                                chain = %chain,
                                address,
                                deadline_secs = scoring_deadline.as_secs(),
                                "scoring poll exceeded deadline"
                            );
                            None
                        }
                    };
                    return AggregationRun {
                        source_code,
                        outcome: AggregationOutcome::Report(RiskReport {
                            heuristic: Some(heuristic),
                            simulation: Some(simulation),
                            scoring,
                        }),
                    };
                }
            }

            attempts += 1;
            if attempts >= max_attempts {
                warn!(
                    chain = %chain,
                    address,
                    attempts,
                    source_verified = source_code.is_some(),
                    "risk aggregation abandoned"
                );
                return AggregationRun {
                    source_code,
                    outcome: AggregationOutcome::Abandoned { attempts },
                };
            }
            debug!(
                chain = %chain,
                address,
                attempts,
                source_verified = source_code.is_some(),
                "risk data incomplete, retrying"
            );
            tokio::time::sleep(retry_interval).await;
        }
    }
}
