//! Scheduler module: one polling loop per target.

mod store;

pub use store::*;

use crate::config::Target;
use crate::probe::{ProbeError, TraceCommand};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Drives periodic trace executions and owns their results.
pub struct Scheduler {
    command: Arc<TraceCommand>,
    store: Arc<ResultStore>,
    root: CancellationToken,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl Scheduler {
    /// Create a scheduler whose loops stop when `root` is cancelled.
    pub fn new(command: TraceCommand, root: CancellationToken) -> Self {
        Self {
            command: Arc::new(command),
            store: Arc::new(ResultStore::new()),
            root,
            cancel_tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Start one loop per target. Each fires its first execution immediately.
    pub async fn start(&self, targets: &[Target]) {
        tracing::info!("Starting scheduler with {} targets", targets.len());

        let mut tokens = self.cancel_tokens.lock().await;
        for target in targets {
            let token = self.root.child_token();
            if let Some(previous) = tokens.insert(target.name.clone(), token.clone()) {
                previous.cancel();
            }

            tracing::info!(target = %target.name, host = %target.host, "Scheduler: Adding target");

            tokio::spawn(run_target_loop(
                target.clone(),
                self.command.clone(),
                self.store.clone(),
                token,
            ));
        }
    }

    /// Cancel every loop and any invocation in flight.
    pub async fn stop(&self) {
        let mut tokens = self.cancel_tokens.lock().await;
        for token in tokens.values() {
            token.cancel();
        }
        tokens.clear();
    }

    /// Replace the running target set.
    ///
    /// Results of targets that are still configured survive; every loop is
    /// restarted and runs immediately.
    pub async fn reload(&self, targets: &[Target]) {
        tracing::info!("Reloading scheduler with {} targets", targets.len());

        self.stop().await;

        let names: HashSet<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        self.store.retain(&names).await;

        self.start(targets).await;
    }

    /// Number of loops currently registered.
    pub async fn active_targets(&self) -> usize {
        self.cancel_tokens.lock().await.len()
    }
}

/// Run the polling loop for a single target until `cancel` fires.
async fn run_target_loop(
    target: Target,
    command: Arc<TraceCommand>,
    store: Arc<ResultStore>,
    cancel: CancellationToken,
) {
    // First tick completes immediately.
    let mut interval = tokio::time::interval(target.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(target = %target.name, host = %target.host, "Stopping execution loop for target");
                break;
            }
            _ = interval.tick() => {
                execute_target(&target, &command, &store, &cancel).await;
            }
        }
    }
}

/// Run one traced execution and record its outcome.
async fn execute_target(
    target: &Target,
    command: &TraceCommand,
    store: &ResultStore,
    cancel: &CancellationToken,
) {
    tracing::info!(target = %target.name, host = %target.host, "Starting nexttrace execution");

    let start = Instant::now();
    let result = command.run(target, cancel).await;
    let duration = start.elapsed();

    match &result {
        Ok(trace) => tracing::info!(
            target = %target.name,
            host = %target.host,
            duration = ?duration,
            hops = trace.hops.len(),
            "NextTrace execution completed successfully"
        ),
        Err(ProbeError::Cancelled) => return,
        Err(ProbeError::Timeout(_)) => tracing::error!(
            target = %target.name,
            host = %target.host,
            duration = ?duration,
            "NextTrace execution timeout"
        ),
        Err(ProbeError::Exit { status, output }) => tracing::error!(
            target = %target.name,
            host = %target.host,
            status = %status,
            output = %output,
            "NextTrace execution failed"
        ),
        Err(e) => tracing::error!(
            target = %target.name,
            host = %target.host,
            error = %e,
            "NextTrace execution failed"
        ),
    }

    let result = ExecutionResult::from_probe(&target.name, duration, result);
    if !store.record_if_active(&target.name, result, cancel).await {
        tracing::debug!(target = %target.name, "Discarding result of cancelled execution");
    }
}
