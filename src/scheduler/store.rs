//! Latest-result store shared between the target loops and the scrape path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::probe::ProbeError;
use crate::trace::TraceResult;

/// Outcome tag of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Error,
    Timeout,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
            Status::Timeout => "timeout",
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Success(TraceResult),
    Error(ProbeError),
    Timeout(Duration),
}

/// Result of one scheduling cycle for one target.
#[derive(Debug)]
pub struct ExecutionResult {
    pub target: String,
    /// Wall-clock time spent in the invocation.
    pub duration: Duration,
    /// When the invocation returned.
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
}

impl ExecutionResult {
    /// Classify a finished invocation.
    pub fn from_probe(
        target: &str,
        duration: Duration,
        result: Result<TraceResult, ProbeError>,
    ) -> Self {
        let outcome = match result {
            Ok(trace) => Outcome::Success(trace),
            Err(ProbeError::Timeout(after)) => Outcome::Timeout(after),
            Err(e) => Outcome::Error(e),
        };

        Self {
            target: target.to_string(),
            duration,
            timestamp: Utc::now(),
            outcome,
        }
    }

    pub fn status(&self) -> Status {
        match self.outcome {
            Outcome::Success(_) => Status::Success,
            Outcome::Error(_) => Status::Error,
            Outcome::Timeout(_) => Status::Timeout,
        }
    }

    pub fn trace(&self) -> Option<&TraceResult> {
        match &self.outcome {
            Outcome::Success(trace) => Some(trace),
            _ => None,
        }
    }

    /// Human-readable error for failed executions.
    pub fn error(&self) -> Option<String> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Error(e) => Some(e.to_string()),
            Outcome::Timeout(after) => Some(ProbeError::Timeout(*after).to_string()),
        }
    }
}

/// Target name to latest [`ExecutionResult`].
///
/// Entries are immutable once stored; readers get `Arc` handles so a snapshot
/// never observes a later write and never holds the lock while it is used.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: RwLock<HashMap<String, Arc<ExecutionResult>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `result`, replacing any previous entry for `name`.
    pub async fn record_result(&self, name: &str, result: ExecutionResult) {
        let mut results = self.results.write().await;
        results.insert(name.to_string(), Arc::new(result));
    }

    /// Store `result` unless `cancel` has fired.
    ///
    /// The check runs under the write lock, so once a loop's token is
    /// cancelled and [`ResultStore::retain`] has run, that loop can no longer
    /// resurrect its entry.
    pub async fn record_if_active(
        &self,
        name: &str,
        result: ExecutionResult,
        cancel: &CancellationToken,
    ) -> bool {
        let mut results = self.results.write().await;
        if cancel.is_cancelled() {
            return false;
        }
        results.insert(name.to_string(), Arc::new(result));
        true
    }

    pub async fn get_result(&self, name: &str) -> Option<Arc<ExecutionResult>> {
        self.results.read().await.get(name).cloned()
    }

    pub async fn get_all_results(&self) -> HashMap<String, Arc<ExecutionResult>> {
        self.results.read().await.clone()
    }

    /// Drop entries whose name is not in `names`.
    pub async fn retain(&self, names: &HashSet<&str>) {
        let mut results = self.results.write().await;
        results.retain(|name, _| names.contains(name.as_str()));
    }
}
