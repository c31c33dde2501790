//! Orchestration executor — concurrent fan-out with a settle-all join.
//!
//! Every selected worker is invoked concurrently; each call is bounded by
//! its own timeout and raced against the caller's cancellation token. A
//! failing or hung worker becomes a failed outcome, never an exception, and
//! never cancels its siblings. The executor performs no retries: a retry is
//! a new routing decision made one level up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::routing::RoutingDecision;
use crate::registry::WorkerRegistry;

/// Request payload handed to a worker adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// The task text itself.
    pub task: String,
    /// Optional context snippets (e.g. knowledge-store skill excerpts).
    #[serde(default)]
    pub context: Vec<String>,
    /// Advisory output budget for the worker.
    pub max_output_tokens: u32,
}

impl TaskRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: Vec::new(),
            max_output_tokens: 2_048,
        }
    }
}

/// Successful adapter response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub content: String,
    pub tokens_used: u64,
    pub latency_ms: u64,
}

/// Failures a worker adapter may report.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Missing credentials or unreachable backend.
    #[error("worker unavailable: {0}")]
    Unavailable(String),

    /// The adapter's own deadline fired.
    #[error("worker timed out")]
    Timeout,

    /// The backend answered with an error.
    #[error("provider error: {0}")]
    Provider(String),
}

/// The single seam to real backends. Production adapters perform the actual
/// network call; tests inject deterministic fakes. The core never fabricates
/// a response itself.
#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    /// Invoke one worker with the given payload and deadline.
    async fn invoke(
        &self,
        worker_id: &str,
        request: &TaskRequest,
        timeout: Duration,
    ) -> Result<AdapterResponse, AdapterError>;
}

/// Classification of a failed worker outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeError {
    /// The per-call timeout elapsed.
    Timeout,
    /// The backend was unreachable or unauthenticated.
    Unavailable,
    /// The backend answered with an error.
    Invocation,
    /// The caller cancelled before this worker settled.
    Cancelled,
}

impl std::fmt::Display for OutcomeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Invocation => write!(f, "invocation"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Settled result of one worker call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub worker_id: String,
    pub success: bool,
    pub content: Option<String>,
    pub error_kind: Option<OutcomeError>,
    pub latency_ms: u64,
    pub tokens_used: u64,
    /// Estimated spend from the worker's per-kilotoken price. Heuristic,
    /// not billing data.
    pub cost_estimate: f64,
}

impl WorkerOutcome {
    fn success(worker_id: String, response: AdapterResponse, cost_per_k: f64) -> Self {
        let cost_estimate = response.tokens_used as f64 / 1000.0 * cost_per_k;
        Self {
            worker_id,
            success: true,
            content: Some(response.content),
            error_kind: None,
            latency_ms: response.latency_ms,
            tokens_used: response.tokens_used,
            cost_estimate,
        }
    }

    fn failure(worker_id: String, kind: OutcomeError, latency_ms: u64) -> Self {
        Self {
            worker_id,
            success: false,
            content: None,
            error_kind: Some(kind),
            latency_ms,
            tokens_used: 0,
            cost_estimate: 0.0,
        }
    }
}

/// Fans a task out to the selected workers and settles every call.
pub struct Executor {
    adapter: Arc<dyn WorkerAdapter>,
    per_call_timeout: Duration,
}

impl Executor {
    pub fn new(adapter: Arc<dyn WorkerAdapter>, per_call_timeout: Duration) -> Self {
        Self {
            adapter,
            per_call_timeout,
        }
    }

    pub fn per_call_timeout(&self) -> Duration {
        self.per_call_timeout
    }

    /// Invoke every selected worker concurrently and wait for all of them to
    /// settle. Returns exactly one outcome per selected worker, in selection
    /// order. Never fails: worker errors are data.
    pub async fn execute(
        &self,
        request: &TaskRequest,
        decision: &RoutingDecision,
        registry: &WorkerRegistry,
        cancel: &CancellationToken,
    ) -> Vec<WorkerOutcome> {
        if decision.selected.is_empty() {
            return Vec::new();
        }

        let request = Arc::new(request.clone());
        let mut join_set: JoinSet<(usize, WorkerOutcome)> = JoinSet::new();

        for (index, worker_id) in decision.selected.iter().enumerate() {
            let cost_per_k = registry
                .get(worker_id)
                .map(|w| w.cost_per_k_tokens)
                .unwrap_or(0.0);
            let adapter = Arc::clone(&self.adapter);
            let request = Arc::clone(&request);
            let cancel = cancel.clone();
            let timeout = self.per_call_timeout;
            let worker_id = worker_id.clone();

            join_set.spawn(async move {
                let start = Instant::now();
                // Biased so an already-cancelled token always settles as
                // cancelled instead of racing a ready adapter future.
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => WorkerOutcome::failure(
                        worker_id,
                        OutcomeError::Cancelled,
                        start.elapsed().as_millis() as u64,
                    ),
                    settled = tokio::time::timeout(
                        timeout,
                        adapter.invoke(&worker_id, &request, timeout),
                    ) => match settled {
                        Err(_elapsed) => WorkerOutcome::failure(
                            worker_id,
                            OutcomeError::Timeout,
                            timeout.as_millis() as u64,
                        ),
                        Ok(Ok(response)) => WorkerOutcome::success(worker_id, response, cost_per_k),
                        Ok(Err(e)) => {
                            let kind = match e {
                                AdapterError::Unavailable(_) => OutcomeError::Unavailable,
                                AdapterError::Timeout => OutcomeError::Timeout,
                                AdapterError::Provider(_) => OutcomeError::Invocation,
                            };
                            WorkerOutcome::failure(
                                worker_id,
                                kind,
                                start.elapsed().as_millis() as u64,
                            )
                        }
                    },
                };
                (index, outcome)
            });
        }

        let mut settled: Vec<Option<WorkerOutcome>> = vec![None; decision.selected.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    debug!(
                        worker_id = %outcome.worker_id,
                        success = outcome.success,
                        latency_ms = outcome.latency_ms,
                        "worker call settled"
                    );
                    settled[index] = Some(outcome);
                }
                Err(e) => {
                    // A panicked worker task still must not sink the join;
                    // the slot is filled below as an invocation failure.
                    warn!(error = %e, "worker task panicked");
                }
            }
        }

        settled
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    WorkerOutcome::failure(
                        decision.selected[index].clone(),
                        OutcomeError::Invocation,
                        0,
                    )
                })
            })
            .collect()
    }
}
