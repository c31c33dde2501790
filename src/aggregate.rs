//! Result aggregation — merging settled worker outcomes into one artifact.
//!
//! Aggregation is arithmetic and rule-based only. Consensus across multiple
//! successful responses is deliberately not attempted here: semantic merging
//! belongs to the caller, so multiple responses are surfaced side by side
//! with a marker.

use serde::{Deserialize, Serialize};

use crate::classify::{Complexity, TaskClassification, TaskType};
use crate::executor::{OutcomeError, WorkerOutcome};

/// One successful response, attributed to its worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub worker_id: String,
    pub content: String,
    pub latency_ms: u64,
}

/// One failed call, attributed to its worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker_id: String,
    pub error_kind: OutcomeError,
}

/// What the successful responses collectively amount to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Consensus {
    /// Zero successful responses.
    None,
    /// Exactly one successful response; it stands on its own.
    Single { content: String },
    /// Several responses offering different perspectives.
    MultiplePerspectives { count: usize },
}

/// Decision-ready merge of all worker outcomes for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub total_workers: usize,
    pub successful_workers: usize,
    pub failed_workers: usize,
    /// Exactly `successful / total`; zero when no workers ran.
    pub success_rate: f64,
    pub responses: Vec<WorkerResponse>,
    pub failures: Vec<WorkerFailure>,
    pub consensus: Consensus,
    /// Static rule-based hints keyed off the classification.
    pub recommendations: Vec<String>,
    pub next_steps: Vec<String>,
}

impl AggregatedResult {
    /// Whether every worker failed (or none ran). Callers branch on this,
    /// not on an exception.
    pub fn is_degraded(&self) -> bool {
        self.successful_workers == 0
    }
}

/// Merge settled outcomes into an [`AggregatedResult`].
pub fn aggregate(
    outcomes: &[WorkerOutcome],
    classification: &TaskClassification,
) -> AggregatedResult {
    let responses: Vec<WorkerResponse> = outcomes
        .iter()
        .filter(|o| o.success)
        .map(|o| WorkerResponse {
            worker_id: o.worker_id.clone(),
            content: o.content.clone().unwrap_or_default(),
            latency_ms: o.latency_ms,
        })
        .collect();

    let failures: Vec<WorkerFailure> = outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| WorkerFailure {
            worker_id: o.worker_id.clone(),
            error_kind: o.error_kind.unwrap_or(OutcomeError::Invocation),
        })
        .collect();

    let consensus = match responses.as_slice() {
        [] => Consensus::None,
        [only] => Consensus::Single {
            content: only.content.clone(),
        },
        many => Consensus::MultiplePerspectives { count: many.len() },
    };

    let success_rate = if outcomes.is_empty() {
        0.0
    } else {
        responses.len() as f64 / outcomes.len() as f64
    };

    AggregatedResult {
        total_workers: outcomes.len(),
        successful_workers: responses.len(),
        failed_workers: failures.len(),
        success_rate,
        recommendations: recommendations(classification, responses.len()),
        next_steps: next_steps(classification),
        responses,
        failures,
        consensus,
    }
}

fn recommendations(classification: &TaskClassification, response_count: usize) -> Vec<String> {
    let mut out = Vec::new();
    if response_count > 1 {
        out.push("compare responses from different workers before adopting one".to_string());
    }
    if classification.complexity == Complexity::High {
        out.push("iterate on the solution rather than applying it wholesale".to_string());
    }
    if response_count == 0 {
        out.push("no worker succeeded; consider an alternate strategy or wider worker pool".to_string());
    }
    out
}

fn next_steps(classification: &TaskClassification) -> Vec<String> {
    match classification.task_type {
        TaskType::Generation => vec![
            "review the generated code".to_string(),
            "add tests".to_string(),
        ],
        TaskType::Design => vec![
            "capture the architecture decisions".to_string(),
            "define interface contracts".to_string(),
            "plan implementation phases".to_string(),
        ],
        TaskType::Review => vec!["triage findings by severity".to_string()],
        TaskType::Test => vec!["run the new tests in CI".to_string()],
        _ => Vec::new(),
    }
}
