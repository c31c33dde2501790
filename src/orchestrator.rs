//! Top-level orchestrator — classify, route, execute, aggregate, learn.
//!
//! The orchestrator owns explicit references to its collaborators (registry,
//! classifier, policy engine, executor, feedback store); nothing lives in
//! ambient global state. One call to [`Orchestrator::execute`] produces one
//! task report and at least one immutable execution record, even when every
//! worker failed or the caller cancelled mid-flight.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{aggregate, AggregatedResult};
use crate::classify::{TaskClassification, TaskClassifier};
use crate::cost::{CostSample, CostTracker};
use crate::executor::{Executor, OutcomeError, TaskRequest, WorkerAdapter, WorkerOutcome};
use crate::feedback::{FeedbackEntry, FeedbackStore};
use crate::knowledge::KnowledgeStore;
use crate::registry::WorkerRegistry;
use crate::routing::{domains, RoutingDecision, RoutingEngine, Strategy};
use crate::store::PersistenceStore;

/// Store key for the persisted execution history.
const HISTORY_KEY: &str = "executions";

/// How much of the task text is kept in execution records.
const TASK_PREVIEW_CHARS: usize = 100;

/// How many knowledge hits are attached to a request.
const KNOWLEDGE_CONTEXT_HITS: usize = 2;

/// Configuration error raised at construction time only.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidLimit(&'static str),
}

/// Orchestrator configuration, immutable per instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrent workers per task.
    pub max_workers_per_task: usize,
    /// Per-worker-call timeout in milliseconds.
    pub per_call_timeout_ms: u64,
    /// Strategy used when neither the caller nor a domain profile picks one.
    pub default_strategy: Strategy,
    /// Additional routing rounds when every worker in a round fails.
    pub retry_attempts: u32,
    /// Exploration share for the learned strategy.
    pub exploration_rate: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers_per_task: 3,
            per_call_timeout_ms: 30_000,
            default_strategy: Strategy::Hybrid,
            retry_attempts: 0,
            exploration_rate: 0.0,
        }
    }
}

impl OrchestratorConfig {
    /// Reject programmer errors before any task runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers_per_task == 0 {
            return Err(ConfigError::InvalidLimit("max_workers_per_task must be positive"));
        }
        if self.per_call_timeout_ms == 0 {
            return Err(ConfigError::InvalidLimit("per_call_timeout_ms must be positive"));
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            return Err(ConfigError::InvalidLimit("exploration_rate must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Immutable record of one routing round. Appended after all outcomes
/// settle; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub task_preview: String,
    pub classification: TaskClassification,
    pub decision: RoutingDecision,
    pub outcomes: Vec<WorkerOutcome>,
    pub aggregated: AggregatedResult,
    pub total_latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Final result returned to the caller for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// Execution id of the round whose result is being returned.
    pub execution_id: String,
    pub classification: TaskClassification,
    pub decision: RoutingDecision,
    pub outcomes: Vec<WorkerOutcome>,
    pub aggregated: AggregatedResult,
    pub total_latency_ms: u64,
    /// Number of routing rounds run (1 unless retries fired).
    pub attempts: u32,
}

/// Aggregate statistics over the execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatistics {
    pub total_executions: usize,
    pub avg_latency_ms: f64,
    /// Per worker: (times selected, times successful).
    pub worker_usage: std::collections::HashMap<String, (u64, u64)>,
}

/// The orchestration facade.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<WorkerRegistry>,
    classifier: TaskClassifier,
    engine: RoutingEngine,
    executor: Executor,
    feedback: Arc<FeedbackStore>,
    cost: CostTracker,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    history: Mutex<Vec<ExecutionRecord>>,
}

impl Orchestrator {
    /// Build an orchestrator. Fails only on invalid configuration.
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<WorkerRegistry>,
        adapter: Arc<dyn WorkerAdapter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = RoutingEngine::new(config.max_workers_per_task)
            .with_exploration_rate(config.exploration_rate);
        let executor = Executor::new(adapter, Duration::from_millis(config.per_call_timeout_ms));
        Ok(Self {
            config,
            registry,
            classifier: TaskClassifier::new(),
            engine,
            executor,
            feedback: Arc::new(FeedbackStore::in_memory()),
            cost: CostTracker::new(),
            knowledge: None,
            persistence: None,
            history: Mutex::new(Vec::new()),
        })
    }

    /// Back the feedback store and execution history with a persistence
    /// collaborator. Hydrates feedback from any prior snapshot.
    pub fn with_persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.feedback = Arc::new(FeedbackStore::with_persistence(Arc::clone(&store)));
        self.persistence = Some(store);
        self
    }

    /// Share a feedback store with other orchestrators or pre-seed one.
    pub fn with_feedback_store(mut self, feedback: Arc<FeedbackStore>) -> Self {
        self.feedback = feedback;
        self
    }

    /// Attach a knowledge store used to enrich request context.
    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Track spend against a budget.
    pub fn with_cost_budget(mut self, budget: f64) -> Self {
        self.cost = CostTracker::new().with_budget(budget);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    pub fn cost(&self) -> &CostTracker {
        &self.cost
    }

    /// Classify without executing.
    pub fn classify(&self, task: &str) -> TaskClassification {
        self.classifier.classify(task)
    }

    /// Route without executing: useful for dry runs and diagnostics.
    pub fn route(&self, task: &str, strategy: Option<Strategy>) -> RoutingDecision {
        let classification = self.classifier.classify(task);
        let strategy = self.pick_strategy(task, strategy);
        self.route_with_fallback(&classification, strategy)
    }

    /// Run one task end to end.
    ///
    /// Never returns an error for worker-level failures: a fully failed round
    /// yields a degraded (but well-formed) aggregate, and callers branch on
    /// `aggregated.success_rate`, not on `Err`.
    pub async fn execute(
        &self,
        task: &str,
        strategy: Option<Strategy>,
        cancel: &CancellationToken,
    ) -> TaskReport {
        let classification = self.classifier.classify(task);
        let strategy = self.pick_strategy(task, strategy);
        let request = self.build_request(task, &classification);

        let mut tried: Vec<String> = Vec::new();
        let mut attempts = 0u32;
        let mut next_decision: Option<RoutingDecision> = None;

        loop {
            attempts += 1;
            let decision = next_decision
                .take()
                .unwrap_or_else(|| self.route_with_fallback(&classification, strategy));
            tried.extend(decision.selected.iter().cloned());

            let execution_id = Uuid::new_v4().to_string();
            info!(
                execution_id = %execution_id,
                task_type = %classification.task_type,
                strategy = %decision.strategy_used,
                workers = decision.selected.len(),
                attempt = attempts,
                "task execution started"
            );

            let started = Instant::now();
            let outcomes = self
                .executor
                .execute(&request, &decision, &self.registry, cancel)
                .await;
            let total_latency_ms = started.elapsed().as_millis() as u64;

            let aggregated = aggregate(&outcomes, &classification);
            self.absorb_outcomes(&classification, &outcomes);

            let record = ExecutionRecord {
                execution_id: execution_id.clone(),
                task_preview: preview(task),
                classification: classification.clone(),
                decision: decision.clone(),
                outcomes: outcomes.clone(),
                aggregated: aggregated.clone(),
                total_latency_ms,
                timestamp: Utc::now(),
            };
            self.append_record(record);

            info!(
                execution_id = %execution_id,
                success_rate = aggregated.success_rate,
                total_latency_ms,
                "task execution settled"
            );

            let should_retry = aggregated.is_degraded()
                && decision.has_workers()
                && !cancel.is_cancelled()
                && attempts <= self.config.retry_attempts;
            if should_retry {
                // Only commit to another round when an untried worker
                // exists; an empty round would erase this round's failure
                // details from the returned report.
                let retry = self.retry_decision(&classification, &tried);
                if retry.has_workers() {
                    warn!(
                        execution_id = %execution_id,
                        attempt = attempts,
                        "all workers failed; rerouting to untried workers"
                    );
                    next_decision = Some(retry);
                    continue;
                }
                warn!(
                    execution_id = %execution_id,
                    "all workers failed and no untried worker remains"
                );
            }
            return TaskReport {
                execution_id,
                classification,
                decision,
                outcomes,
                aggregated,
                total_latency_ms,
                attempts,
            };
        }
    }

    /// Record a caller's subjective judgement of a worker's output. This is
    /// the only source of quality signal; the core never invents one.
    /// Returns `false` when the worker has no recorded executions for the
    /// task type.
    pub fn rate_worker(
        &self,
        worker_id: &str,
        task_type: crate::classify::TaskType,
        quality: f64,
        user_rating: Option<u8>,
    ) -> bool {
        self.feedback.rate(worker_id, task_type, quality, user_rating)
    }

    /// Immutable execution history, oldest first.
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.history.lock().expect("history lock poisoned").clone()
    }

    /// Aggregate statistics over the history.
    pub fn statistics(&self) -> OrchestratorStatistics {
        let history = self.history.lock().expect("history lock poisoned");
        let mut worker_usage: std::collections::HashMap<String, (u64, u64)> =
            std::collections::HashMap::new();
        let mut latency_sum = 0u64;
        for record in history.iter() {
            latency_sum += record.total_latency_ms;
            for outcome in &record.outcomes {
                let usage = worker_usage.entry(outcome.worker_id.clone()).or_default();
                usage.0 += 1;
                if outcome.success {
                    usage.1 += 1;
                }
            }
        }
        OrchestratorStatistics {
            total_executions: history.len(),
            avg_latency_ms: if history.is_empty() {
                0.0
            } else {
                latency_sum as f64 / history.len() as f64
            },
            worker_usage,
        }
    }

    fn pick_strategy(&self, task: &str, explicit: Option<Strategy>) -> Strategy {
        if let Some(strategy) = explicit {
            return strategy;
        }
        if let Some(domain) = domains::detect(task) {
            let strategy = domain.preferred_strategy();
            info!(domain = %domain, strategy = %strategy, "domain profile selected strategy");
            return strategy;
        }
        self.config.default_strategy
    }

    /// Route, replacing an empty learned decision with a hybrid one.
    fn route_with_fallback(
        &self,
        classification: &TaskClassification,
        strategy: Strategy,
    ) -> RoutingDecision {
        let decision = self
            .engine
            .route(classification, strategy, &self.registry, &self.feedback);
        if strategy == Strategy::Learned && !decision.has_workers() {
            let mut fallback =
                self.engine
                    .route(classification, Strategy::Hybrid, &self.registry, &self.feedback);
            fallback.rationale = format!("no learned history; fell back to hybrid ({})", fallback.rationale);
            return fallback;
        }
        decision
    }

    /// A fresh decision over workers not yet tried, alternates first.
    fn retry_decision(
        &self,
        classification: &TaskClassification,
        tried: &[String],
    ) -> RoutingDecision {
        let hybrid =
            self.engine
                .route(classification, Strategy::Hybrid, &self.registry, &self.feedback);
        let mut selected: Vec<String> = Vec::new();
        for id in hybrid.alternates.iter().chain(hybrid.selected.iter()) {
            if !tried.contains(id) && !selected.contains(id) {
                selected.push(id.clone());
            }
            if selected.len() >= self.config.max_workers_per_task {
                break;
            }
        }
        RoutingDecision {
            selected,
            alternates: Vec::new(),
            strategy_used: Strategy::Hybrid,
            rationale: "retry round over previously untried workers".to_string(),
        }
    }

    fn build_request(&self, task: &str, classification: &TaskClassification) -> TaskRequest {
        let mut request = TaskRequest::new(task);
        request.max_output_tokens = classification.estimated_tokens.output.max(256);
        if let Some(knowledge) = &self.knowledge {
            for hit in knowledge.search(task).into_iter().take(KNOWLEDGE_CONTEXT_HITS) {
                if let Ok(body) = knowledge.get(&hit.name) {
                    request.context.push(format!("[{}] {}", hit.name, body));
                }
            }
        }
        request
    }

    /// Feed objective outcome data into the feedback store and cost ledger.
    /// Caller-cancelled outcomes are skipped: a cancellation says nothing
    /// about the worker.
    fn absorb_outcomes(&self, classification: &TaskClassification, outcomes: &[WorkerOutcome]) {
        for outcome in outcomes {
            if outcome.error_kind == Some(OutcomeError::Cancelled) {
                continue;
            }
            self.feedback.record(FeedbackEntry {
                worker_id: outcome.worker_id.clone(),
                task_type: classification.task_type,
                success: outcome.success,
                latency_ms: outcome.latency_ms,
                tokens_used: outcome.tokens_used,
                cost: outcome.cost_estimate,
                quality: None,
                user_rating: None,
            });
            let family = self
                .registry
                .get(&outcome.worker_id)
                .map(|w| w.provider_family.clone())
                .unwrap_or_else(|| "unknown".to_string());
            self.cost.record(&CostSample {
                worker_id: outcome.worker_id.clone(),
                provider_family: family,
                task_type: classification.task_type,
                tokens_used: outcome.tokens_used,
                cost: outcome.cost_estimate,
                latency_ms: outcome.latency_ms,
                success: outcome.success,
                // Neutral until a real judgement exists; efficiency ranking
                // then orders purely by spend.
                quality: 0.5,
            });
        }
    }

    /// Append to the in-memory history and persist best-effort.
    fn append_record(&self, record: ExecutionRecord) {
        let snapshot = {
            let mut history = self.history.lock().expect("history lock poisoned");
            history.push(record);
            if self.persistence.is_some() {
                serde_json::to_value(&*history).ok()
            } else {
                None
            }
        };
        if let (Some(store), Some(doc)) = (&self.persistence, snapshot) {
            if let Err(e) = store.save(HISTORY_KEY, &doc) {
                warn!(error = %e, "execution history persistence failed; continuing");
            }
        }
    }
}

fn preview(task: &str) -> String {
    if task.chars().count() <= TASK_PREVIEW_CHARS {
        task.to_string()
    } else {
        let truncated: String = task.chars().take(TASK_PREVIEW_CHARS).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capability, ReliabilityTier, SpeedTier, Worker};

    struct NoopAdapter;

    #[async_trait::async_trait]
    impl WorkerAdapter for NoopAdapter {
        async fn invoke(
            &self,
            _worker_id: &str,
            _request: &TaskRequest,
            _timeout: Duration,
        ) -> Result<crate::executor::AdapterResponse, crate::executor::AdapterError> {
            Ok(crate::executor::AdapterResponse {
                content: "ok".into(),
                tokens_used: 10,
                latency_ms: 1,
            })
        }
    }

    fn small_registry() -> Arc<WorkerRegistry> {
        let mut registry = WorkerRegistry::new();
        registry
            .register(Worker {
                id: "w1".into(),
                provider_family: "acme".into(),
                display_name: "w1".into(),
                capabilities: [Capability::from("code-generation"), Capability::from("general-tasks")]
                    .into_iter()
                    .collect(),
                max_payload_tokens: 8_000,
                cost_per_k_tokens: 0.01,
                speed: SpeedTier::Fast,
                reliability: ReliabilityTier::High,
                is_local: false,
                description: String::new(),
            })
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = OrchestratorConfig {
            max_workers_per_task: 0,
            ..OrchestratorConfig::default()
        };
        let result = Orchestrator::new(config, small_registry(), Arc::new(NoopAdapter));
        assert!(matches!(result, Err(ConfigError::InvalidLimit(_))));

        let config = OrchestratorConfig {
            exploration_rate: 1.5,
            ..OrchestratorConfig::default()
        };
        assert!(Orchestrator::new(config, small_registry(), Arc::new(NoopAdapter)).is_err());
    }

    #[test]
    fn test_preview_truncates_long_tasks() {
        let long = "x".repeat(300);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), TASK_PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_strategy_picking_precedence() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            small_registry(),
            Arc::new(NoopAdapter),
        )
        .unwrap();

        // Caller wins over everything.
        assert_eq!(
            orchestrator.pick_strategy("deploy docker kubernetes monitoring", Some(Strategy::CostOptimized)),
            Strategy::CostOptimized
        );
        // Domain profile beats the default.
        assert_eq!(
            orchestrator.pick_strategy("deploy the docker cluster with kubernetes monitoring", None),
            Strategy::ReliabilityOptimized
        );
        // Otherwise the configured default.
        assert_eq!(
            orchestrator.pick_strategy("fix a typo", None),
            Strategy::Hybrid
        );
    }

    #[tokio::test]
    async fn test_execute_produces_report_and_record() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            small_registry(),
            Arc::new(NoopAdapter),
        )
        .unwrap();

        let report = orchestrator
            .execute("implement a widget", None, &CancellationToken::new())
            .await;
        assert_eq!(report.attempts, 1);
        assert_eq!(report.aggregated.success_rate, 1.0);
        assert_eq!(orchestrator.history().len(), 1);
        assert_eq!(orchestrator.statistics().total_executions, 1);
        // Objective feedback flowed in automatically.
        assert_eq!(orchestrator.feedback().sample_count("w1"), 1);
    }
}
