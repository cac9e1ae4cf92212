use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const LIQUIDITY_UNAVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Eth,
    Base,
}

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::Eth, Chain::Base];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eth => "eth",
            Self::Base => "base",
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            Self::Eth => 1,
            Self::Base => 8453,
        }
    }

    /// Path segment used by the heuristic report site.
    pub fn network_slug(self) -> &'static str {
        match self {
            Self::Eth => "ethereum",
            Self::Base => "base",
        }
    }

    pub fn explorer_token_url(self, address: &str) -> String {
        match self {
            Self::Eth => format!("https://etherscan.io/token/{address}#code"),
            Self::Base => format!("https://basescan.org/token/{address}#code"),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eth" | "ethereum" => Ok(Self::Eth),
            "base" => Ok(Self::Base),
            other => Err(format!("unsupported chain: {other}")),
        }
    }
}

/// Lower-cased `0x` address used as the record key.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentCandidate {
    pub deployer: String,
    pub tx_hash: String,
    pub chain: Chain,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub deployer: String,
    pub address: String,
    pub chain: Chain,
    pub block_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDetails {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub address: String,
    pub deployer: String,
    pub chain: Chain,
    pub deployment_ts: DateTime<Utc>,
    pub token_details: Option<TokenDetails>,
    pub verified: bool,
    pub source_code: Option<String>,
    pub retry_count: u32,
    pub risk_report: Option<RiskReport>,
    pub last_verdict: Option<Verdict>,
    pub created_at: DateTime<Utc>,
}

impl ContractRecord {
    pub fn new_unverified(
        event: &DeploymentEvent,
        token_details: TokenDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            address: normalize_address(&event.address),
            deployer: event.deployer.clone(),
            chain: event.chain,
            deployment_ts: event.block_timestamp,
            token_details: Some(token_details),
            verified: false,
            source_code: None,
            retry_count: 0,
            risk_report: None,
            last_verdict: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HeuristicReport {
    pub is_safe: bool,
    pub pair: String,
    pub liquidity: String,
    pub can_buy: Option<String>,
    pub can_sell: Option<String>,
    pub can_transfer: Option<String>,
}

impl HeuristicReport {
    pub fn liquidity_known(&self) -> bool {
        let liquidity = self.liquidity.trim();
        !liquidity.is_empty() && liquidity != LIQUIDITY_UNAVAILABLE
    }

    /// Negative verdict backed by a real liquidity figure.
    pub fn is_definitive_unsafe(&self) -> bool {
        !self.is_safe && self.liquidity_known()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SimulatedToken {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u64>,
    pub address: Option<String>,
    pub total_holders: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SimulatedTrade {
    pub buy_tax: Option<f64>,
    pub sell_tax: Option<f64>,
    pub transfer_tax: Option<f64>,
    pub buy_gas: Option<String>,
    pub sell_gas: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContractCodeFlags {
    pub open_source: bool,
    pub root_open_source: bool,
    pub is_proxy: bool,
    pub has_proxy_calls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SimulatedPair {
    pub name: Option<String>,
    pub address: Option<String>,
    pub pair_type: Option<String>,
    pub liquidity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SimulationReport {
    pub token: SimulatedToken,
    pub with_token: SimulatedToken,
    pub risk: Option<String>,
    pub risk_level: Option<i64>,
    pub simulation: SimulatedTrade,
    pub is_honeypot: bool,
    pub contract_code: ContractCodeFlags,
    pub pair: SimulatedPair,
}

/// Raw scoring-service payload; only `score` and `similar` drive decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringReport {
    pub payload: Value,
}

impl ScoringReport {
    pub fn score(&self) -> i64 {
        match self.payload.get("score") {
            Some(Value::Number(number)) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value.round() as i64))
                .unwrap_or(0),
            _ => 0,
        }
    }

    pub fn similar_count(&self) -> usize {
        self.payload
            .get("similar")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskReport {
    pub heuristic: Option<HeuristicReport>,
    pub simulation: Option<SimulationReport>,
    pub scoring: Option<ScoringReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VetoReason {
    HeuristicUnsafe { liquidity: String },
    SimulatedHoneypot,
}

impl VetoReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeuristicUnsafe { .. } => "heuristic_unsafe",
            Self::SimulatedHoneypot => "simulated_honeypot",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationOutcome {
    Report(RiskReport),
    Vetoed(VetoReason),
    Abandoned { attempts: u32 },
}

impl AggregationOutcome {
    pub fn verdict(&self) -> Verdict {
        match self {
            Self::Report(_) => Verdict::Report,
            Self::Vetoed(_) => Verdict::Vetoed,
            Self::Abandoned { .. } => Verdict::Abandoned,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Report,
    Vetoed,
    Abandoned,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Vetoed => "vetoed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "report" => Some(Self::Report),
            "vetoed" => Some(Self::Vetoed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}
