use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::env_parsing::{non_empty_env, parse_csv_list, parse_env_bool, parse_env_number};
use super::AppConfig;

pub const CONFIG_PATH_ENV: &str = "TOKENWATCH_CONFIG";

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

/// Loads the TOML file (explicit env path must exist, the default may be
/// absent) and then applies environment overrides.
pub fn load_from_env_or_default(default_path: &Path) -> Result<(AppConfig, PathBuf)> {
    let explicit = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    let configured = explicit
        .clone()
        .unwrap_or_else(|| default_path.to_path_buf());
    let mut config = if explicit.is_none() && !configured.exists() {
        AppConfig::default()
    } else {
        load_from_path(&configured)?
    };
    apply_env_overrides(&mut config)?;
    Ok((config, configured))
}

pub fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    if let Some(level) = non_empty_env("TOKENWATCH_LOG_LEVEL") {
        config.system.log_level = level;
    }
    if let Some(json) = env::var("TOKENWATCH_LOG_JSON").ok().and_then(parse_env_bool) {
        config.system.log_json = json;
    }
    if let Some(path) = non_empty_env("TOKENWATCH_SQLITE_PATH") {
        config.sqlite.path = path;
    }

    if let Some(url) = non_empty_env("ALCHEMY_ETH_URL") {
        config.chains.eth_rpc_url = url;
    }
    if let Some(url) = non_empty_env("ALCHEMY_BASE_URL") {
        config.chains.base_rpc_url = url;
    }
    if let Some(autostart) = non_empty_env("TOKENWATCH_AUTOSTART_CHAINS") {
        config.chains.autostart = parse_csv_list(&autostart);
    }
    if let Some(offset) = parse_env_number::<u64>("TOKENWATCH_START_BLOCK_OFFSET")? {
        config.chains.start_block_offset = offset;
    }

    if let Some(key) = non_empty_env("ETHERSCAN_API_KEY") {
        config.explorer.etherscan_api_key = key;
    }
    if let Some(key) = non_empty_env("BASESCAN_API_KEY") {
        config.explorer.basescan_api_key = key;
    }
    if let Some(key) = non_empty_env("TOKEN_SNIFFER_API") {
        config.detectors.scoring_api_key = key;
    }

    if let Some(retry_limit) = parse_env_number::<u32>("RETRY_LIMIT")? {
        config.pipeline.retry_limit = retry_limit;
    }
    if let Some(retry_interval) = parse_env_number::<u64>("RETRY_INTERVAL")? {
        config.pipeline.retry_interval_secs = retry_interval;
    }
    if let Some(retry_interval_api) = parse_env_number::<u64>("RETRY_INTERVAL_API")? {
        config.pipeline.retry_interval_api_secs = retry_interval_api;
    }
    if let Some(api_max_retries) = parse_env_number::<u32>("API_MAX_RETRIES")? {
        config.pipeline.api_max_retries = api_max_retries;
    }
    if let Some(minimum_score) = parse_env_number::<i64>("MINIMUM_SCORE")? {
        config.pipeline.minimum_score = minimum_score;
    }
    if let Some(maximum_similar) = parse_env_number::<u64>("MAXIMUM_SIMILAR")? {
        config.pipeline.maximum_similar = maximum_similar;
    }
    if let Some(retry_block_delay) = parse_env_number::<u64>("RETRY_BLOCK_DELAY")? {
        config.pipeline.retry_block_delay_secs = retry_block_delay;
    }
    if let Some(notify) = env::var("TOKENWATCH_NOTIFY_DISCOVERIES")
        .ok()
        .and_then(parse_env_bool)
    {
        config.pipeline.notify_discoveries = notify;
    }
    if let Some(chat_id) = non_empty_env("TELEGRAM_CHAT_ID") {
        config.pipeline.chat_id = chat_id;
    }

    if let Some(token) = non_empty_env("TELEGRAM_TOKEN") {
        config.notify.telegram_bot_token = token;
    }
    if let Some(token) = non_empty_env("TOKENWATCH_WEB_AUTH_TOKEN") {
        config.web.auth_token = token;
    }
    if let Some(bind_addr) = non_empty_env("TOKENWATCH_WEB_BIND_ADDR") {
        config.web.bind_addr = bind_addr;
    }
    Ok(())
}
