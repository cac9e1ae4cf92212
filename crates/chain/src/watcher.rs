use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokenwatch_config::{ChainsConfig, SettingsHandle};
use tokenwatch_core_types::{Chain, DeploymentCandidate};
use tokenwatch_pipeline::Dispatcher;
use tracing::{debug, info, warn};

use crate::rpc::{ChainRpc, RpcBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherExit {
    Stopped,
    DispatcherClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    pub exit: WatcherExit,
    pub blocks_scanned: u64,
    pub candidates: u64,
}

/// Follows one chain block by block and hands every contract creation to the
/// dispatcher. Runs until its monitoring flag is cleared.
pub struct BlockWatcher {
    chain: Chain,
    rpc: Arc<dyn ChainRpc>,
    dispatcher: Dispatcher,
    settings: SettingsHandle,
    active: Arc<AtomicBool>,
    poll_interval: Duration,
    start_block_offset: u64,
}

impl BlockWatcher {
    pub fn new(
        chain: Chain,
        rpc: Arc<dyn ChainRpc>,
        dispatcher: Dispatcher,
        settings: SettingsHandle,
        active: Arc<AtomicBool>,
        config: &ChainsConfig,
    ) -> Self {
        Self {
            chain,
            rpc,
            dispatcher,
            settings,
            active,
            poll_interval: Duration::from_millis(config.block_poll_interval_ms),
            start_block_offset: config.start_block_offset,
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub async fn run(self) -> WatchSummary {
        let chain = self.chain;
        let mut summary = WatchSummary {
            exit: WatcherExit::Stopped,
            blocks_scanned: 0,
            candidates: 0,
        };
        let Some(mut cursor) = self.starting_block().await else {
            info!(chain = %chain, "block watcher stopped before first block");
            return summary;
        };
        info!(chain = %chain, start_block = cursor, "block watcher started");

        while self.is_active() {
            match self.rpc.block_with_transactions(cursor).await {
                Ok(Some(block)) => {
                    let Some(dispatched) = self.dispatch_block(&block) else {
                        summary.exit = WatcherExit::DispatcherClosed;
                        break;
                    };
                    summary.blocks_scanned += 1;
                    summary.candidates += dispatched;
                    cursor += 1;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(None) => {
                    debug!(chain = %chain, block = cursor, "block not available yet");
                    tokio::time::sleep(self.settings.retry_block_delay()).await;
                }
                Err(error) => {
                    warn!(
                        chain = %chain,
                        block = cursor,
                        error = %format!("{error:#}"),
                        "block fetch failed, retrying"
                    );
                    tokio::time::sleep(self.settings.retry_block_delay()).await;
                }
            }
        }

        info!(
            chain = %chain,
            next_block = cursor,
            blocks_scanned = summary.blocks_scanned,
            candidates = summary.candidates,
            exit = ?summary.exit,
            "block watcher exited"
        );
        summary
    }

    async fn starting_block(&self) -> Option<u64> {
        while self.is_active() {
            match self.rpc.block_number().await {
                Ok(head) => return Some(head.saturating_sub(self.start_block_offset)),
                Err(error) => {
                    warn!(
                        chain = %self.chain,
                        error = %format!("{error:#}"),
                        "head block lookup failed, retrying"
                    );
                    tokio::time::sleep(self.settings.retry_block_delay()).await;
                }
            }
        }
        None
    }

    /// `None` once the dispatch queue is gone.
    fn dispatch_block(&self, block: &RpcBlock) -> Option<u64> {
        let mut dispatched = 0;
        for tx in block.transactions.iter().filter(|tx| tx.to.is_none()) {
            let candidate = DeploymentCandidate {
                deployer: tx.from.to_string(),
                tx_hash: tx.hash.to_string(),
                chain: self.chain,
                block_number: block.number,
                block_timestamp: block.timestamp,
            };
            if !self.dispatcher.dispatch(candidate) {
                warn!(chain = %self.chain, block = block.number, "dispatch queue closed");
                return None;
            }
            dispatched += 1;
        }
        Some(dispatched)
    }
}
