use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokenwatch_chain::{BlockWatcher, ChainRpc};
use tokenwatch_config::{ChainsConfig, SettingsHandle};
use tokenwatch_core_types::Chain;
use tokenwatch_detectors::ScoringDetector;
use tokenwatch_pipeline::{Dispatcher, MonitorControl, Notifier, StatusSnapshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Owns the per-chain watchers behind the operator start/stop surface.
pub(crate) struct ChainMonitors {
    control: MonitorControl,
    rpcs: HashMap<Chain, Arc<dyn ChainRpc>>,
    watchers: Mutex<HashMap<Chain, JoinHandle<()>>>,
    dispatcher: Dispatcher,
    settings: SettingsHandle,
    chains: ChainsConfig,
    notifier: Arc<dyn Notifier>,
    scoring: Arc<dyn ScoringDetector>,
    active_tasks: Arc<AtomicUsize>,
}

pub(crate) struct MonitorDeps {
    pub rpcs: HashMap<Chain, Arc<dyn ChainRpc>>,
    pub dispatcher: Dispatcher,
    pub settings: SettingsHandle,
    pub chains: ChainsConfig,
    pub notifier: Arc<dyn Notifier>,
    pub scoring: Arc<dyn ScoringDetector>,
    pub active_tasks: Arc<AtomicUsize>,
}

impl ChainMonitors {
    pub(crate) fn new(deps: MonitorDeps) -> Self {
        Self {
            control: MonitorControl::new(),
            rpcs: deps.rpcs,
            watchers: Mutex::new(HashMap::new()),
            dispatcher: deps.dispatcher,
            settings: deps.settings,
            chains: deps.chains,
            notifier: deps.notifier,
            scoring: deps.scoring,
            active_tasks: deps.active_tasks,
        }
    }

    pub(crate) fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Returns `true` if this call started the chain's watcher.
    pub(crate) async fn start(&self, chain: Chain) -> bool {
        let Some(rpc) = self.rpcs.get(&chain).cloned() else {
            warn!(chain = %chain, "no rpc client configured for chain");
            return false;
        };
        if !self.control.try_start(chain) {
            self.notice(&format!("Monitoring is already active for {chain}"))
                .await;
            return false;
        }

        let watcher = BlockWatcher::new(
            chain,
            rpc,
            self.dispatcher.clone(),
            self.settings.clone(),
            self.control.flag(chain),
            &self.chains,
        );
        let handle = tokio::spawn(async move {
            watcher.run().await;
        });
        {
            let mut watchers = self
                .watchers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // A watcher stopped moments ago may not have reached its loop
            // boundary yet; it must not resume on the re-raised flag.
            if let Some(previous) = watchers.insert(chain, handle) {
                if !previous.is_finished() {
                    previous.abort();
                }
            }
        }
        info!(chain = %chain, "monitoring started");
        self.notice(&format!("Monitoring started for {chain}")).await;
        true
    }

    /// Returns `true` if monitoring was active.
    pub(crate) async fn stop(&self, chain: Chain) -> bool {
        if !self.control.stop(chain) {
            self.notice(&format!("Monitoring is not active for {chain}"))
                .await;
            return false;
        }
        info!(chain = %chain, "monitoring stopped");
        self.notice(&format!("Monitoring stopped for {chain}")).await;
        true
    }

    pub(crate) fn is_active(&self, chain: Chain) -> bool {
        self.control.is_active(chain)
    }

    pub(crate) fn stop_all(&self) {
        for chain in Chain::ALL {
            self.control.stop(chain);
        }
    }

    pub(crate) fn status(&self) -> StatusSnapshot {
        StatusSnapshot::collect(
            &self.control,
            self.scoring.pending_requests(),
            self.active_tasks.load(Ordering::Acquire),
        )
    }

    async fn notice(&self, text: &str) {
        let chat_id = self.settings.snapshot().chat_id;
        if let Err(error) = self.notifier.send(&chat_id, text).await {
            warn!(error = %format!("{error:#}"), "operator notice delivery failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use alloy::primitives::{Address, Bytes, B256};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use tokenwatch_chain::{RpcBlock, RpcReceipt};
    use tokenwatch_config::PipelineConfig;
    use tokenwatch_core_types::ScoringReport;
    use tokenwatch_pipeline::{dispatch_channel, DispatchQueue};

    /// Chain whose head never advances.
    pub(crate) struct IdleChain;

    #[async_trait]
    impl ChainRpc for IdleChain {
        async fn block_number(&self) -> Result<u64> {
            Ok(100)
        }

        async fn block_with_transactions(&self, _number: u64) -> Result<Option<RpcBlock>> {
            Ok(None)
        }

        async fn transaction_receipt(&self, _tx_hash: B256) -> Result<Option<RpcReceipt>> {
            Ok(None)
        }

        async fn call(&self, _to: Address, _input: Bytes) -> Result<Bytes> {
            Err(anyhow!("not used"))
        }
    }

    pub(crate) struct BusyScoring(pub usize);

    #[async_trait]
    impl ScoringDetector for BusyScoring {
        async fn score(&self, _chain: Chain, _address: &str) -> Option<ScoringReport> {
            None
        }

        fn pending_requests(&self) -> usize {
            self.0
        }
    }

    #[derive(Default)]
    pub(crate) struct NoticeLog {
        pub messages: Mutex<Vec<(String, String)>>,
    }

    impl NoticeLog {
        pub(crate) fn texts(&self) -> Vec<String> {
            self.messages
                .lock()
                .expect("notice lock")
                .iter()
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for NoticeLog {
        async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
            self.messages
                .lock()
                .expect("notice lock")
                .push((chat_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    pub(crate) fn idle_monitors(
        notices: Arc<NoticeLog>,
        pending: usize,
        active_tasks: usize,
    ) -> (ChainMonitors, DispatchQueue) {
        let (dispatcher, queue) = dispatch_channel();
        let rpcs: HashMap<Chain, Arc<dyn ChainRpc>> = Chain::ALL
            .into_iter()
            .map(|chain| (chain, Arc::new(IdleChain) as Arc<dyn ChainRpc>))
            .collect();
        let monitors = ChainMonitors::new(MonitorDeps {
            rpcs,
            dispatcher,
            settings: SettingsHandle::new(PipelineConfig {
                chat_id: "42".to_string(),
                retry_block_delay_secs: 1,
                ..PipelineConfig::default()
            }),
            chains: ChainsConfig::default(),
            notifier: notices,
            scoring: Arc::new(BusyScoring(pending)),
            active_tasks: Arc::new(AtomicUsize::new(active_tasks)),
        });
        (monitors, queue)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{idle_monitors, NoticeLog};
    use super::*;

    #[tokio::test]
    async fn start_and_stop_send_operator_notices() {
        let notices = Arc::new(NoticeLog::default());
        let (monitors, _queue) = idle_monitors(notices.clone(), 0, 0);

        assert!(monitors.start(Chain::Eth).await);
        assert!(!monitors.start(Chain::Eth).await);
        assert!(monitors.status().monitoring_active["eth"]);
        assert!(monitors.stop(Chain::Eth).await);
        assert!(!monitors.stop(Chain::Eth).await);
        assert!(!monitors.status().monitoring_active["eth"]);

        assert_eq!(
            notices.texts(),
            vec![
                "Monitoring started for eth",
                "Monitoring is already active for eth",
                "Monitoring stopped for eth",
                "Monitoring is not active for eth",
            ]
        );
        let chat_ids: Vec<String> = notices
            .messages
            .lock()
            .expect("notice lock")
            .iter()
            .map(|(chat_id, _)| chat_id.clone())
            .collect();
        assert!(chat_ids.iter().all(|chat_id| chat_id == "42"));
    }

    #[tokio::test]
    async fn restart_replaces_previous_watcher() {
        let notices = Arc::new(NoticeLog::default());
        let (monitors, _queue) = idle_monitors(notices, 0, 0);

        assert!(monitors.start(Chain::Base).await);
        assert!(monitors.stop(Chain::Base).await);
        assert!(monitors.start(Chain::Base).await);
        assert_eq!(
            monitors.watchers.lock().expect("watchers lock").len(),
            1
        );
        monitors.stop_all();
        assert!(!monitors.status().monitoring_active["base"]);
    }

    #[test]
    fn status_reports_pending_scoring_and_tasks() {
        let (monitors, _queue) = idle_monitors(Arc::new(NoticeLog::default()), 3, 9);
        let status = monitors.status();
        assert_eq!(status.pending_scoring_requests, 3);
        assert_eq!(status.active_tasks, 9);
        assert_eq!(status.monitoring_active.len(), 2);
    }
}
