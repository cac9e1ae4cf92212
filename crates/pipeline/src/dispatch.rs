use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokenwatch_core_types::DeploymentCandidate;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, warn};

#[async_trait]
pub trait CandidateProcessor: Send + Sync + 'static {
    async fn process(&self, candidate: DeploymentCandidate) -> Result<()>;
}

/// Sending half handed to watchers. Sending never waits on processing.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<DeploymentCandidate>,
}

#[derive(Debug)]
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<DeploymentCandidate>,
}

pub fn dispatch_channel() -> (Dispatcher, DispatchQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Dispatcher { tx }, DispatchQueue { rx })
}

impl Dispatcher {
    /// Returns `false` once the supervisor is gone.
    pub fn dispatch(&self, candidate: DeploymentCandidate) -> bool {
        self.tx.send(candidate).is_ok()
    }
}

pub struct SupervisorHandle {
    active_tasks: Arc<AtomicUsize>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    pub fn active_tasks_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active_tasks)
    }

    /// Resolves once every dispatcher is dropped and the remaining tasks
    /// have been reaped.
    pub async fn join(self) {
        if let Err(error) = self.join.await {
            error!(error = %error, "dispatch supervisor terminated abnormally");
        }
    }
}

/// Spawns one detached task per candidate and reaps them, logging failures
/// and panics without propagating them.
pub fn spawn_supervisor(
    queue: DispatchQueue,
    processor: Arc<dyn CandidateProcessor>,
) -> SupervisorHandle {
    let active_tasks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&active_tasks);
    let join = tokio::spawn(run_supervisor(queue, processor, counter));
    SupervisorHandle { active_tasks, join }
}

async fn run_supervisor(
    mut queue: DispatchQueue,
    processor: Arc<dyn CandidateProcessor>,
    active_tasks: Arc<AtomicUsize>,
) {
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    loop {
        tokio::select! {
            received = queue.rx.recv() => {
                let Some(candidate) = received else {
                    break;
                };
                active_tasks.fetch_add(1, Ordering::AcqRel);
                let processor = Arc::clone(&processor);
                tasks.spawn(async move { processor.process(candidate).await });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                active_tasks.fetch_sub(1, Ordering::AcqRel);
                log_task_result(joined);
            }
        }
    }
    debug!(remaining = tasks.len(), "dispatch queue closed, draining tasks");
    while let Some(joined) = tasks.join_next().await {
        active_tasks.fetch_sub(1, Ordering::AcqRel);
        log_task_result(joined);
    }
}

fn log_task_result(joined: std::result::Result<Result<()>, JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(error = %format!("{error:#}"), "candidate processing failed");
        }
        Err(join_error) if join_error.is_panic() => {
            error!(error = %join_error, "candidate task panicked");
        }
        Err(join_error) => {
            warn!(error = %join_error, "candidate task cancelled");
        }
    }
}
