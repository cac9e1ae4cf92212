use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokenwatch_config::{PipelineConfig, SettingsHandle};
use tokenwatch_core_types::{
    normalize_address, Chain, ContractRecord, DeploymentCandidate, DeploymentEvent,
    HeuristicReport, ScoringReport, SimulatedTrade, SimulationReport, TokenDetails,
};
use tokenwatch_detectors::{
    DetectorSet, HeuristicDetector, ScoringDetector, SimulationDetector, SourceCodeProvider,
};
use tokenwatch_storage::SqliteStore;

use crate::{ContractPipeline, DeploymentInspector, Notifier, RiskAggregator, SharedStore};

/// Detector fake answering every call with the configured response.
pub struct Scripted<T> {
    response: Mutex<Option<T>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl<T: Clone> Scripted<T> {
    pub fn new(response: Option<T>) -> Self {
        Self {
            response: Mutex::new(response),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, response: Option<T>) {
        *self.response.lock().expect("response lock") = response;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> Option<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.response.lock().expect("response lock").clone()
    }
}

#[async_trait]
impl HeuristicDetector for Scripted<HeuristicReport> {
    async fn inspect(&self, _chain: Chain, _address: &str) -> Option<HeuristicReport> {
        self.answer().await
    }
}

#[async_trait]
impl SimulationDetector for Scripted<SimulationReport> {
    async fn simulate(&self, _chain: Chain, _address: &str) -> Option<SimulationReport> {
        self.answer().await
    }
}

#[async_trait]
impl ScoringDetector for Scripted<ScoringReport> {
    async fn score(&self, _chain: Chain, _address: &str) -> Option<ScoringReport> {
        self.answer().await
    }
}

#[async_trait]
impl SourceCodeProvider for Scripted<String> {
    async fn fetch_source(&self, _chain: Chain, _address: &str) -> Option<String> {
        self.answer().await
    }
}

pub struct Fakes {
    pub heuristic: Arc<Scripted<HeuristicReport>>,
    pub simulation: Arc<Scripted<SimulationReport>>,
    pub scoring: Arc<Scripted<ScoringReport>>,
    pub source: Arc<Scripted<String>>,
}

impl Fakes {
    /// Verified source, safe heuristic, clean simulation and `scoring`.
    pub fn passing(scoring: ScoringReport) -> Self {
        Self {
            heuristic: Arc::new(Scripted::new(Some(safe_heuristic()))),
            simulation: Arc::new(Scripted::new(Some(clean_simulation()))),
            scoring: Arc::new(Scripted::new(Some(scoring))),
            source: Arc::new(Scripted::new(Some("contract Foo {}".to_string()))),
        }
    }

    pub fn detector_set(&self) -> DetectorSet {
        DetectorSet {
            heuristic: self.heuristic.clone(),
            simulation: self.simulation.clone(),
            scoring: self.scoring.clone(),
            source: self.source.clone(),
        }
    }
}

pub fn safe_heuristic() -> HeuristicReport {
    HeuristicReport {
        is_safe: true,
        pair: "WETH pair on Uniswap V2".to_string(),
        liquidity: "12 ETH".to_string(),
        can_buy: Some("Can buy".to_string()),
        can_sell: Some("Can sell".to_string()),
        can_transfer: Some("Can transfer".to_string()),
    }
}

pub fn clean_simulation() -> SimulationReport {
    SimulationReport {
        risk: Some("low".to_string()),
        risk_level: Some(1),
        simulation: SimulatedTrade {
            buy_tax: Some(0.0),
            sell_tax: Some(0.0),
            transfer_tax: Some(0.0),
            ..SimulatedTrade::default()
        },
        is_honeypot: false,
        ..SimulationReport::default()
    }
}

pub fn scoring_report(score: i64, similar: usize) -> ScoringReport {
    let similar: Vec<_> = (0..similar)
        .map(|index| json!({"address": format!("0x{index:040x}")}))
        .collect();
    ScoringReport {
        payload: json!({"status": "ready", "score": score, "similar": similar}),
    }
}

/// Zero retry intervals so abandoned paths finish immediately.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        retry_interval_secs: 0,
        retry_interval_api_secs: 0,
        api_max_retries: 3,
        scoring_deadline_secs: 5,
        chat_id: "42".to_string(),
        ..PipelineConfig::default()
    }
}

pub fn test_settings() -> SettingsHandle {
    SettingsHandle::new(test_config())
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().expect("messages lock").clone()
    }

    pub fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("bot api unavailable"));
        }
        self.messages
            .lock()
            .expect("messages lock")
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Maps tx hashes to created addresses and addresses to token metadata.
#[derive(Default)]
pub struct FakeInspector {
    deployments: Mutex<HashMap<String, String>>,
    tokens: Mutex<HashMap<String, TokenDetails>>,
    classify_calls: AtomicUsize,
}

impl FakeInspector {
    pub fn add_token(&self, tx_hash: &str, address: &str, token: TokenDetails) {
        self.deployments
            .lock()
            .expect("deployments lock")
            .insert(tx_hash.to_string(), address.to_string());
        self.tokens
            .lock()
            .expect("tokens lock")
            .insert(normalize_address(address), token);
    }

    pub fn add_plain_contract(&self, tx_hash: &str, address: &str) {
        self.deployments
            .lock()
            .expect("deployments lock")
            .insert(tx_hash.to_string(), address.to_string());
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentInspector for FakeInspector {
    async fn resolve_deployment(
        &self,
        candidate: &DeploymentCandidate,
    ) -> Result<Option<DeploymentEvent>> {
        let address = self
            .deployments
            .lock()
            .expect("deployments lock")
            .get(&candidate.tx_hash)
            .cloned();
        Ok(address.map(|address| DeploymentEvent {
            deployer: candidate.deployer.clone(),
            address,
            chain: candidate.chain,
            block_timestamp: candidate.block_timestamp,
        }))
    }

    async fn classify_erc20(&self, _chain: Chain, address: &str) -> Option<TokenDetails> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .lock()
            .expect("tokens lock")
            .get(&normalize_address(address))
            .cloned()
    }
}

pub fn foo_token() -> TokenDetails {
    TokenDetails {
        name: "Foo Token".to_string(),
        symbol: "FOO".to_string(),
        decimals: 18,
    }
}

pub fn candidate(tx_hash: &str, chain: Chain) -> DeploymentCandidate {
    DeploymentCandidate {
        deployer: "0xdd00000000000000000000000000000000000009".to_string(),
        tx_hash: tx_hash.to_string(),
        chain,
        block_number: 19_000_000,
        block_timestamp: Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp"),
    }
}

pub struct PipelineHarness {
    pub pipeline: Arc<ContractPipeline>,
    pub notifier: Arc<RecordingNotifier>,
    pub inspector: Arc<FakeInspector>,
    store: SharedStore,
    _temp: TempDir,
}

impl PipelineHarness {
    pub fn seed_unverified(&self, address: &str, chain: Chain) {
        let event = DeploymentEvent {
            deployer: "0xdd00000000000000000000000000000000000009".to_string(),
            address: address.to_string(),
            chain,
            block_timestamp: Utc::now(),
        };
        let record = ContractRecord::new_unverified(&event, foo_token(), Utc::now());
        let inserted = self
            .store
            .lock()
            .expect("store lock")
            .insert_contract_if_absent(&record)
            .expect("seed contract");
        assert!(inserted);
    }

    pub fn record(&self, address: &str) -> ContractRecord {
        self.store
            .lock()
            .expect("store lock")
            .get_contract(address)
            .expect("read contract")
            .expect("contract exists")
    }

    pub fn contract_count(&self) -> u64 {
        self.store
            .lock()
            .expect("store lock")
            .contract_count()
            .expect("count contracts")
    }

    pub fn event_count(&self, event_type: &str) -> u64 {
        self.store
            .lock()
            .expect("store lock")
            .pipeline_event_count_by_type(event_type)
            .expect("count events")
    }
}

pub fn build_pipeline(fakes: &Fakes) -> PipelineHarness {
    build_pipeline_with(fakes, test_config())
}

pub fn build_pipeline_with(fakes: &Fakes, config: PipelineConfig) -> PipelineHarness {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut store = SqliteStore::open(&temp.path().join("pipeline.db")).expect("open sqlite");
    let migration_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    store
        .run_migrations(&migration_dir)
        .expect("apply migrations");
    let store: SharedStore = Arc::new(Mutex::new(store));

    let settings = SettingsHandle::new(config);
    let notifier = Arc::new(RecordingNotifier::default());
    let inspector = Arc::new(FakeInspector::default());
    let aggregator = RiskAggregator::new(fakes.detector_set(), settings.clone());
    let pipeline = Arc::new(ContractPipeline::new(
        Arc::clone(&store),
        inspector.clone(),
        aggregator,
        notifier.clone(),
        settings,
    ));
    PipelineHarness {
        pipeline,
        notifier,
        inspector,
        store,
        _temp: temp,
    }
}
