use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub sqlite: SqliteConfig,
    pub chains: ChainsConfig,
    pub explorer: ExplorerConfig,
    pub detectors: DetectorsConfig,
    pub pipeline: PipelineConfig,
    pub notify: NotifyConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub env: String,
    pub log_level: String,
    pub log_json: bool,
    pub heartbeat_seconds: u64,
    pub migrations_dir: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            heartbeat_seconds: 30,
            migrations_dir: "migrations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "state/tokenwatch.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainsConfig {
    pub eth_rpc_url: String,
    pub base_rpc_url: String,
    pub rpc_timeout_ms: u64,
    pub block_poll_interval_ms: u64,
    /// Blocks behind head at which a freshly started watcher begins.
    pub start_block_offset: u64,
    pub autostart: Vec<String>,
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            eth_rpc_url: "https://eth-mainnet.g.alchemy.com/v2/REPLACE_ME".to_string(),
            base_rpc_url: "https://base-mainnet.g.alchemy.com/v2/REPLACE_ME".to_string(),
            rpc_timeout_ms: 10_000,
            block_poll_interval_ms: 1_000,
            start_block_offset: 0,
            autostart: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub etherscan_api_url: String,
    pub etherscan_api_key: String,
    pub basescan_api_url: String,
    pub basescan_api_key: String,
    pub request_timeout_ms: u64,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            etherscan_api_url: "https://api.etherscan.io/api".to_string(),
            etherscan_api_key: String::new(),
            basescan_api_url: "https://api.basescan.org/api".to_string(),
            basescan_api_key: String::new(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorsConfig {
    pub heuristic_base_url: String,
    pub simulation_base_url: String,
    pub scoring_base_url: String,
    pub scoring_api_key: String,
    pub request_timeout_ms: u64,
    /// Scoring requests can legitimately block server-side until ready.
    pub scoring_request_timeout_ms: u64,
    pub scoring_poll_interval_secs: u64,
    pub scoring_max_concurrency: usize,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            heuristic_base_url: "https://hackers.tools/honeypot".to_string(),
            simulation_base_url: "https://api.honeypot.is/v2/IsHoneypot".to_string(),
            scoring_base_url: "https://tokensniffer.com/api/v2/tokens".to_string(),
            scoring_api_key: String::new(),
            request_timeout_ms: 15_000,
            scoring_request_timeout_ms: 120_000,
            scoring_poll_interval_secs: 10,
            scoring_max_concurrency: 5,
        }
    }
}

/// Runtime-tunable knobs; see [`crate::SettingsHandle`] for hot edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry_limit: u32,
    pub retry_interval_secs: u64,
    pub retry_interval_api_secs: u64,
    pub api_max_retries: u32,
    pub minimum_score: i64,
    pub maximum_similar: u64,
    pub retry_block_delay_secs: u64,
    pub scoring_deadline_secs: u64,
    pub notify_discoveries: bool,
    pub chat_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_limit: 10,
            retry_interval_secs: 60,
            retry_interval_api_secs: 10,
            api_max_retries: 5,
            minimum_score: 70,
            maximum_similar: 3,
            retry_block_delay_secs: 5,
            scoring_deadline_secs: 600,
            notify_discoveries: false,
            chat_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub telegram_api_url: String,
    pub telegram_bot_token: String,
    pub timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            telegram_api_url: "https://api.telegram.org".to_string(),
            telegram_bot_token: String::new(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_addr: String,
    pub auth_token: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "127.0.0.1:8089".to_string(),
            auth_token: String::new(),
        }
    }
}
