use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokenwatch_core_types::Chain;

/// Per-chain monitoring flags. Watchers poll their flag at each loop boundary.
#[derive(Debug, Clone, Default)]
pub struct MonitorControl {
    eth: Arc<AtomicBool>,
    base: Arc<AtomicBool>,
}

impl MonitorControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self, chain: Chain) -> Arc<AtomicBool> {
        match chain {
            Chain::Eth => Arc::clone(&self.eth),
            Chain::Base => Arc::clone(&self.base),
        }
    }

    pub fn is_active(&self, chain: Chain) -> bool {
        self.flag(chain).load(Ordering::Acquire)
    }

    /// Returns `true` if this call turned monitoring on.
    pub fn try_start(&self, chain: Chain) -> bool {
        self.flag(chain)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` if monitoring was active.
    pub fn stop(&self, chain: Chain) -> bool {
        self.flag(chain).swap(false, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub pending_scoring_requests: usize,
    pub monitoring_active: BTreeMap<String, bool>,
    pub active_tasks: usize,
}

impl StatusSnapshot {
    pub fn collect(
        control: &MonitorControl,
        pending_scoring_requests: usize,
        active_tasks: usize,
    ) -> Self {
        let monitoring_active = Chain::ALL
            .iter()
            .map(|chain| (chain.as_str().to_string(), control.is_active(*chain)))
            .collect();
        Self {
            pending_scoring_requests,
            monitoring_active,
            active_tasks,
        }
    }
}
