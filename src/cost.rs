//! Cost tracking — spend totals and efficiency across workers.
//!
//! The tracker keeps running totals per worker, per provider family, and per
//! task type, plus an optional budget. Amounts come from the executor's
//! per-kilotoken estimates and are approximate by construction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::classify::TaskType;
use crate::stats::RunningStat;

/// One cost sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSample {
    pub worker_id: String,
    pub provider_family: String,
    pub task_type: TaskType,
    pub tokens_used: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub success: bool,
    /// Quality in `[0, 1]`, used for efficiency ranking. Neutral 0.5 when
    /// no caller judgement exists.
    pub quality: f64,
}

/// Running totals for one grouping key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostBucket {
    pub executions: u64,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub avg_cost: RunningStat,
    pub avg_latency_ms: RunningStat,
    pub avg_quality: RunningStat,
}

impl CostBucket {
    fn record(&mut self, sample: &CostSample) {
        self.executions += 1;
        self.total_cost += sample.cost;
        self.total_tokens += sample.tokens_used;
        self.avg_cost.record(sample.cost);
        self.avg_latency_ms.record(sample.latency_ms as f64);
        self.avg_quality.record(sample.quality.clamp(0.0, 1.0));
    }

    /// Quality delivered per unit of spend; local/free workers rank highest.
    pub fn efficiency(&self) -> f64 {
        self.avg_quality.mean / (self.avg_cost.mean + 0.0001)
    }
}

/// Totals and groupings over all recorded samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_executions: u64,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub by_worker: HashMap<String, CostBucket>,
    pub by_family: HashMap<String, CostBucket>,
    pub by_task_type: HashMap<String, CostBucket>,
}

/// State of the configured budget, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub budget: f64,
    pub spent: f64,
    pub remaining: f64,
    pub exceeded: bool,
}

#[derive(Debug, Default)]
struct CostState {
    total_executions: u64,
    total_cost: f64,
    total_tokens: u64,
    by_worker: HashMap<String, CostBucket>,
    by_family: HashMap<String, CostBucket>,
    by_task_type: HashMap<String, CostBucket>,
}

/// Thread-safe cost ledger.
#[derive(Debug, Default)]
pub struct CostTracker {
    state: Mutex<CostState>,
    budget: Option<f64>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an overall spend budget.
    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Record one sample.
    pub fn record(&self, sample: &CostSample) {
        let mut state = self.state.lock().expect("cost lock poisoned");
        state.total_executions += 1;
        state.total_cost += sample.cost;
        state.total_tokens += sample.tokens_used;
        state
            .by_worker
            .entry(sample.worker_id.clone())
            .or_default()
            .record(sample);
        state
            .by_family
            .entry(sample.provider_family.clone())
            .or_default()
            .record(sample);
        state
            .by_task_type
            .entry(sample.task_type.to_string())
            .or_default()
            .record(sample);
    }

    /// Snapshot of all totals and groupings.
    pub fn summary(&self) -> CostSummary {
        let state = self.state.lock().expect("cost lock poisoned");
        CostSummary {
            total_executions: state.total_executions,
            total_cost: state.total_cost,
            total_tokens: state.total_tokens,
            by_worker: state.by_worker.clone(),
            by_family: state.by_family.clone(),
            by_task_type: state.by_task_type.clone(),
        }
    }

    /// Workers ordered by quality-per-dollar, best first.
    pub fn efficiency_ranking(&self) -> Vec<(String, f64)> {
        let state = self.state.lock().expect("cost lock poisoned");
        let mut ranking: Vec<(String, f64)> = state
            .by_worker
            .iter()
            .map(|(id, bucket)| (id.clone(), bucket.efficiency()))
            .collect();
        ranking.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranking
    }

    /// Budget position, `None` when no budget is configured.
    pub fn budget_status(&self) -> Option<BudgetStatus> {
        let budget = self.budget?;
        let spent = self.state.lock().expect("cost lock poisoned").total_cost;
        Some(BudgetStatus {
            budget,
            spent,
            remaining: (budget - spent).max(0.0),
            exceeded: spent > budget,
        })
    }
}
