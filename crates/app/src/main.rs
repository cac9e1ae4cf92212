use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenwatch_chain::{ChainRpc, JsonRpcClient, RpcDeploymentInspector};
use tokenwatch_config::{load_from_env_or_default, AppConfig, SettingsHandle};
use tokenwatch_core_types::Chain;
use tokenwatch_detectors::DetectorSet;
use tokenwatch_pipeline::{
    dispatch_channel, spawn_supervisor, ContractPipeline, RiskAggregator, SharedStore,
    TelegramNotifier, VerificationSweeper,
};
use tokenwatch_storage::{sqlite_contention_snapshot, SqliteStore};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod monitor;
mod web;

use monitor::{ChainMonitors, MonitorDeps};

const DEFAULT_CONFIG_PATH: &str = "configs/dev.toml";
const HEARTBEAT_COMPONENT: &str = "tokenwatch-app";

#[tokio::main]
async fn main() -> Result<()> {
    let cli_config = parse_config_arg();
    let default_path = cli_config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let (config, loaded_config_path) = load_from_env_or_default(&default_path)?;

    init_tracing(&config.system.log_level, config.system.log_json);
    info!(
        config_path = %loaded_config_path.display(),
        env = %config.system.env,
        "configuration loaded"
    );

    let mut store = SqliteStore::open(Path::new(&config.sqlite.path))
        .context("failed to initialize sqlite store")?;
    let migrations_dir = PathBuf::from(&config.system.migrations_dir);
    let applied = store
        .run_migrations(&migrations_dir)
        .with_context(|| format!("failed to apply migrations in {}", migrations_dir.display()))?;
    info!(applied, "sqlite migrations applied");
    store
        .record_heartbeat(HEARTBEAT_COMPONENT, "startup")
        .context("failed to write startup heartbeat")?;
    let store: SharedStore = Arc::new(Mutex::new(store));

    run_app(config, store).await
}

fn parse_config_arg() -> Option<PathBuf> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(inline) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(inline));
        }
    }
    None
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .json()
            .compact()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

fn rpc_client(config: &AppConfig, chain: Chain) -> Result<Arc<dyn ChainRpc>> {
    let endpoint = match chain {
        Chain::Eth => &config.chains.eth_rpc_url,
        Chain::Base => &config.chains.base_rpc_url,
    };
    let client = JsonRpcClient::new(endpoint, config.chains.rpc_timeout_ms)
        .with_context(|| format!("failed to initialize {chain} rpc client"))?;
    Ok(Arc::new(client))
}

fn autostart_chains(config: &AppConfig) -> Vec<Chain> {
    let mut chains = Vec::new();
    for raw in &config.chains.autostart {
        match raw.parse::<Chain>() {
            Ok(chain) if !chains.contains(&chain) => chains.push(chain),
            Ok(_) => {}
            Err(error) => warn!(chain = %raw, error = %error, "ignoring autostart entry"),
        }
    }
    chains
}

async fn run_app(config: AppConfig, store: SharedStore) -> Result<()> {
    let settings = SettingsHandle::new(config.pipeline.clone());
    let detectors = DetectorSet::from_config(&config.detectors, &config.explorer)
        .context("failed to initialize detectors")?;
    let scoring = Arc::clone(&detectors.scoring);
    let notifier = Arc::new(
        TelegramNotifier::new(
            &config.notify.telegram_api_url,
            &config.notify.telegram_bot_token,
            config.notify.timeout_ms,
        )
        .context("failed to initialize telegram notifier")?,
    );
    if config.notify.telegram_bot_token.trim().is_empty() {
        warn!("telegram bot token is empty; alerts will not be delivered");
    }

    let eth_rpc = rpc_client(&config, Chain::Eth)?;
    let base_rpc = rpc_client(&config, Chain::Base)?;
    let inspector = Arc::new(RpcDeploymentInspector::new(
        Arc::clone(&eth_rpc),
        Arc::clone(&base_rpc),
    ));
    let rpcs = HashMap::from([(Chain::Eth, eth_rpc), (Chain::Base, base_rpc)]);
    let aggregator = RiskAggregator::new(detectors, settings.clone());
    let pipeline = Arc::new(ContractPipeline::new(
        Arc::clone(&store),
        inspector,
        aggregator,
        notifier.clone(),
        settings.clone(),
    ));

    let (dispatcher, queue) = dispatch_channel();
    let supervisor = spawn_supervisor(queue, pipeline.clone());
    let sweeper = tokio::spawn(VerificationSweeper::new(pipeline.clone()).run());

    let monitors = Arc::new(ChainMonitors::new(MonitorDeps {
        rpcs,
        dispatcher,
        settings,
        chains: config.chains.clone(),
        notifier,
        scoring,
        active_tasks: supervisor.active_tasks_counter(),
    }));
    for chain in autostart_chains(&config) {
        monitors.start(chain).await;
    }

    if config.web.enabled {
        let state = web::WebState::new(Arc::clone(&monitors), &config.web.auth_token);
        let web_config = config.web.clone();
        tokio::spawn(async move {
            if let Err(error) = web::run_server(state, web_config).await {
                warn!(error = %format!("{error:#}"), "web server stopped");
            }
        });
    }

    let mut heartbeat = time::interval(Duration::from_secs(config.system.heartbeat_seconds.max(1)));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let status = monitors.status();
                let contention = sqlite_contention_snapshot();
                let written = store
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .record_heartbeat(HEARTBEAT_COMPONENT, "alive");
                if let Err(error) = written {
                    warn!(error = %error, "heartbeat write failed");
                }
                info!(
                    pending_scoring_requests = status.pending_scoring_requests,
                    active_tasks = status.active_tasks,
                    eth_active = status.monitoring_active.get("eth").copied().unwrap_or(false),
                    base_active = status.monitoring_active.get("base").copied().unwrap_or(false),
                    sqlite_write_retry_total = contention.write_retry_total,
                    sqlite_busy_error_total = contention.busy_error_total,
                    "heartbeat"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    warn!(error = %error, "ctrl_c listener failed");
                }
                break;
            }
        }
    }

    info!("shutdown requested, stopping watchers");
    monitors.stop_all();
    sweeper.abort();
    info!(
        active_tasks = supervisor.active_tasks(),
        "in-flight candidate tasks left to finish"
    );
    Ok(())
}
