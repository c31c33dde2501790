//! Routing policy engine — bounded worker selection under a named strategy.
//!
//! Strategies form a closed enum rather than a string-keyed table of
//! closures; every arm is matched exhaustively in [`RoutingEngine::route`].
//! A decision is always returned, even when no worker qualifies: an empty
//! selection means "no capable worker" and is a business outcome for the
//! caller, not an error.

pub mod domains;

pub use domains::Domain;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::TaskClassification;
use crate::feedback::FeedbackStore;
use crate::registry::{Worker, WorkerRegistry};

/// How many runners-up to keep as alternates.
const ALTERNATE_COUNT: usize = 2;

/// Epsilon protecting the hybrid cost term against division by zero. Free
/// and local workers intentionally dominate that term.
const COST_EPSILON: f64 = 0.001;

/// Named routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Top workers for the task's capabilities by reliability, then speed.
    BestMatch,
    /// One capable worker per provider family, for consensus use-cases.
    ParallelDiverse,
    /// Cheapest capable workers; local/free always outrank priced ones.
    CostOptimized,
    /// Fastest capable workers.
    SpeedOptimized,
    /// Most reliable capable workers.
    ReliabilityOptimized,
    /// Composite of reliability, speed, cost, and locality (the default).
    Hybrid,
    /// Ranking from observed outcome history for this task type.
    Learned,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BestMatch => "best-match",
            Self::ParallelDiverse => "parallel-diverse",
            Self::CostOptimized => "cost-optimized",
            Self::SpeedOptimized => "speed-optimized",
            Self::ReliabilityOptimized => "reliability-optimized",
            Self::Hybrid => "hybrid",
            Self::Learned => "learned",
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best-match" => Ok(Self::BestMatch),
            "parallel-diverse" => Ok(Self::ParallelDiverse),
            "cost-optimized" => Ok(Self::CostOptimized),
            "speed-optimized" => Ok(Self::SpeedOptimized),
            "reliability-optimized" => Ok(Self::ReliabilityOptimized),
            "hybrid" => Ok(Self::Hybrid),
            "learned" => Ok(Self::Learned),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Error for unrecognized strategy names.
#[derive(Debug, thiserror::Error)]
#[error("unknown routing strategy: {0}")]
pub struct UnknownStrategy(pub String);

/// Output of the policy engine: an ordered, bounded worker selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Ordered worker ids to invoke, deduplicated, capped at the configured
    /// maximum. Empty means no capable worker.
    pub selected: Vec<String>,
    /// Runners-up, usable for retry decisions one level up.
    pub alternates: Vec<String>,
    /// Strategy that actually produced the selection (fallbacks included).
    pub strategy_used: Strategy,
    /// Human-readable justification.
    pub rationale: String,
}

impl RoutingDecision {
    fn empty(strategy: Strategy, rationale: impl Into<String>) -> Self {
        Self {
            selected: Vec::new(),
            alternates: Vec::new(),
            strategy_used: strategy,
            rationale: rationale.into(),
        }
    }

    /// Whether any worker was selected.
    pub fn has_workers(&self) -> bool {
        !self.selected.is_empty()
    }
}

/// Policy engine turning a classification plus registry and feedback views
/// into a routing decision.
#[derive(Debug, Clone)]
pub struct RoutingEngine {
    max_workers_per_task: usize,
    /// Exploration share for the learned strategy, in `[0, 1]`. Zero
    /// disables exploration entirely.
    exploration_rate: f64,
}

impl RoutingEngine {
    pub fn new(max_workers_per_task: usize) -> Self {
        Self {
            max_workers_per_task,
            exploration_rate: 0.0,
        }
    }

    /// Set the exploration rate for the learned strategy.
    pub fn with_exploration_rate(mut self, rate: f64) -> Self {
        self.exploration_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn max_workers_per_task(&self) -> usize {
        self.max_workers_per_task
    }

    /// Select workers for a classified task.
    ///
    /// Deterministic: identical classification, registry, and feedback state
    /// produce an identical ordered selection.
    pub fn route(
        &self,
        classification: &TaskClassification,
        strategy: Strategy,
        registry: &WorkerRegistry,
        feedback: &FeedbackStore,
    ) -> RoutingDecision {
        let decision = match strategy {
            Strategy::BestMatch => self.best_match(classification, registry),
            Strategy::ParallelDiverse => self.parallel_diverse(classification, registry),
            Strategy::CostOptimized => self.cost_optimized(classification, registry),
            Strategy::SpeedOptimized => self.speed_optimized(classification, registry),
            Strategy::ReliabilityOptimized => self.reliability_optimized(classification, registry),
            Strategy::Hybrid => self.hybrid(classification, registry),
            Strategy::Learned => self.learned(classification, registry, feedback),
        };
        debug!(
            strategy = %decision.strategy_used,
            selected = decision.selected.len(),
            alternates = decision.alternates.len(),
            task_type = %classification.task_type,
            "routing decision"
        );
        decision
    }

    /// Workers whose capabilities intersect the task's requirements, in
    /// registration order.
    fn capable<'a>(
        &self,
        classification: &TaskClassification,
        registry: &'a WorkerRegistry,
    ) -> Vec<&'a Worker> {
        registry
            .all()
            .iter()
            .filter(|w| w.has_any_capability(&classification.required_capabilities))
            .collect()
    }

    fn take_decision(
        &self,
        mut candidates: Vec<&Worker>,
        strategy: Strategy,
        rationale: String,
    ) -> RoutingDecision {
        let alternates: Vec<String> = candidates
            .iter()
            .skip(self.max_workers_per_task)
            .take(ALTERNATE_COUNT)
            .map(|w| w.id.clone())
            .collect();
        candidates.truncate(self.max_workers_per_task);
        RoutingDecision {
            selected: candidates.into_iter().map(|w| w.id.clone()).collect(),
            alternates,
            strategy_used: strategy,
            rationale,
        }
    }

    fn best_match(
        &self,
        classification: &TaskClassification,
        registry: &WorkerRegistry,
    ) -> RoutingDecision {
        let mut candidates = self.capable(classification, registry);
        // Reliability is the primary key, speed secondary; stable sort keeps
        // registration order on full ties.
        candidates.sort_by(|a, b| {
            b.reliability
                .score()
                .cmp(&a.reliability.score())
                .then_with(|| b.speed.score().cmp(&a.speed.score()))
        });
        let count = candidates.len().min(self.max_workers_per_task);
        self.take_decision(
            candidates,
            Strategy::BestMatch,
            format!(
                "selected {count} best workers for {} by reliability and speed",
                classification.task_type
            ),
        )
    }

    fn parallel_diverse(
        &self,
        classification: &TaskClassification,
        registry: &WorkerRegistry,
    ) -> RoutingDecision {
        if !classification.parallelizable {
            let mut decision = self.best_match(classification, registry);
            decision.rationale = format!(
                "task not parallelizable; fell back to best-match ({})",
                decision.rationale
            );
            return decision;
        }

        let mut selected: Vec<&Worker> = Vec::new();
        for family in registry.families() {
            if selected.len() >= self.max_workers_per_task {
                break;
            }
            let first_capable = registry
                .by_family(family)
                .into_iter()
                .find(|w| w.has_any_capability(&classification.required_capabilities));
            if let Some(worker) = first_capable {
                selected.push(worker);
            }
        }

        if selected.is_empty() {
            let mut decision = self.best_match(classification, registry);
            decision.rationale =
                format!("no per-family candidates; fell back to best-match ({})", decision.rationale);
            return decision;
        }

        let count = selected.len();
        self.take_decision(
            selected,
            Strategy::ParallelDiverse,
            format!("selected {count} workers across provider families for diverse perspectives"),
        )
    }

    fn cost_optimized(
        &self,
        classification: &TaskClassification,
        registry: &WorkerRegistry,
    ) -> RoutingDecision {
        let mut candidates = self.capable(classification, registry);
        candidates.sort_by(|a, b| {
            // Local workers first, then ascending cost.
            b.is_local.cmp(&a.is_local).then_with(|| {
                a.cost_per_k_tokens
                    .partial_cmp(&b.cost_per_k_tokens)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        let count = candidates.len().min(self.max_workers_per_task);
        self.take_decision(
            candidates,
            Strategy::CostOptimized,
            format!("selected {count} most cost-effective workers"),
        )
    }

    fn speed_optimized(
        &self,
        classification: &TaskClassification,
        registry: &WorkerRegistry,
    ) -> RoutingDecision {
        let mut candidates = self.capable(classification, registry);
        candidates.sort_by(|a, b| b.speed.score().cmp(&a.speed.score()));
        let count = candidates.len().min(self.max_workers_per_task);
        self.take_decision(
            candidates,
            Strategy::SpeedOptimized,
            format!("selected {count} fastest workers"),
        )
    }

    fn reliability_optimized(
        &self,
        classification: &TaskClassification,
        registry: &WorkerRegistry,
    ) -> RoutingDecision {
        let mut candidates = self.capable(classification, registry);
        candidates.sort_by(|a, b| b.reliability.score().cmp(&a.reliability.score()));
        let count = candidates.len().min(self.max_workers_per_task);
        self.take_decision(
            candidates,
            Strategy::ReliabilityOptimized,
            format!("selected {count} most reliable workers"),
        )
    }

    /// Composite score over static metadata, used when no (or thin)
    /// history exists: reliability 0.4, speed 0.3, inverse cost 0.2,
    /// locality bonus 0.1.
    fn hybrid_score(worker: &Worker) -> f64 {
        let reliability = f64::from(worker.reliability.score()) * 0.4;
        let speed = f64::from(worker.speed.score()) * 0.3;
        let cost = (1.0 / (worker.cost_per_k_tokens + COST_EPSILON)) * 0.2;
        let local_bonus = if worker.is_local { 0.1 } else { 0.0 };
        reliability + speed + cost + local_bonus
    }

    fn hybrid(
        &self,
        classification: &TaskClassification,
        registry: &WorkerRegistry,
    ) -> RoutingDecision {
        let mut candidates = self.capable(classification, registry);
        candidates.sort_by(|a, b| {
            Self::hybrid_score(b)
                .partial_cmp(&Self::hybrid_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let count = candidates.len().min(self.max_workers_per_task);
        self.take_decision(
            candidates,
            Strategy::Hybrid,
            format!("selected {count} workers balancing reliability, speed, and cost"),
        )
    }

    /// Rank purely from observed history for this task type. Workers with no
    /// history are excluded; when nothing qualifies the decision is empty and
    /// the caller is expected to fall back to hybrid.
    fn learned(
        &self,
        classification: &TaskClassification,
        registry: &WorkerRegistry,
        feedback: &FeedbackStore,
    ) -> RoutingDecision {
        let capable = self.capable(classification, registry);
        let ranked = feedback.ranked_for(classification.task_type);

        let mut candidates: Vec<&Worker> = ranked
            .iter()
            .filter_map(|r| capable.iter().find(|w| w.id == r.worker_id).copied())
            .collect();

        if candidates.is_empty() {
            return RoutingDecision::empty(
                Strategy::Learned,
                format!("no outcome history for {} tasks", classification.task_type),
            );
        }

        self.apply_exploration(&mut candidates, &capable, feedback);

        let count = candidates.len().min(self.max_workers_per_task);
        self.take_decision(
            candidates,
            Strategy::Learned,
            format!(
                "selected {count} workers from outcome history for {} tasks",
                classification.task_type
            ),
        )
    }

    /// Deterministic exploration: every `1/exploration_rate` recorded
    /// entries, the least-tried capable worker is promoted into the last
    /// selection slot so newcomers accumulate history.
    fn apply_exploration<'a>(
        &self,
        candidates: &mut Vec<&'a Worker>,
        capable: &[&'a Worker],
        feedback: &FeedbackStore,
    ) {
        if self.exploration_rate <= 0.0 {
            return;
        }
        let period = (1.0 / self.exploration_rate).round().max(1.0) as u64;
        if feedback.total_entries() % period != 0 {
            return;
        }
        let least_tried = capable
            .iter()
            .filter(|w| !candidates.iter().any(|c| c.id == w.id))
            .min_by_key(|w| feedback.sample_count(&w.id));
        if let Some(worker) = least_tried {
            if candidates.len() >= self.max_workers_per_task {
                candidates.truncate(self.max_workers_per_task - 1);
            }
            candidates.push(worker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::TaskClassifier;
    use crate::registry::{Capability, ReliabilityTier, SpeedTier, Worker};

    fn worker(
        id: &str,
        family: &str,
        caps: &[&str],
        speed: SpeedTier,
        rel: ReliabilityTier,
        cost: f64,
        local: bool,
    ) -> Worker {
        Worker {
            id: id.to_string(),
            provider_family: family.to_string(),
            display_name: id.to_string(),
            capabilities: caps.iter().map(|c| Capability::from(*c)).collect(),
            max_payload_tokens: 8_000,
            cost_per_k_tokens: cost,
            speed,
            reliability: rel,
            is_local: local,
            description: String::new(),
        }
    }

    fn two_worker_registry() -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        registry
            .register(worker(
                "a",
                "acme",
                &["code-generation"],
                SpeedTier::Medium,
                ReliabilityTier::VeryHigh,
                0.015,
                false,
            ))
            .unwrap();
        registry
            .register(worker(
                "b",
                "zeta",
                &["code-generation"],
                SpeedTier::VeryFast,
                ReliabilityTier::Medium,
                0.003,
                false,
            ))
            .unwrap();
        registry
    }

    fn generation_classification() -> TaskClassification {
        TaskClassifier::new().classify("implement the parser module")
    }

    #[test]
    fn test_reliability_optimized_picks_reliable_worker() {
        let registry = two_worker_registry();
        let feedback = FeedbackStore::in_memory();
        let engine = RoutingEngine::new(1);
        let decision = engine.route(
            &generation_classification(),
            Strategy::ReliabilityOptimized,
            &registry,
            &feedback,
        );
        assert_eq!(decision.selected, vec!["a"]);
    }

    #[test]
    fn test_speed_optimized_picks_fast_worker() {
        let registry = two_worker_registry();
        let feedback = FeedbackStore::in_memory();
        let engine = RoutingEngine::new(1);
        let decision = engine.route(
            &generation_classification(),
            Strategy::SpeedOptimized,
            &registry,
            &feedback,
        );
        assert_eq!(decision.selected, vec!["b"]);
    }

    #[test]
    fn test_cost_optimized_prefers_local_then_cheap() {
        let mut registry = two_worker_registry();
        registry
            .register(worker(
                "local",
                "home",
                &["code-generation"],
                SpeedTier::Slow,
                ReliabilityTier::Low,
                0.0,
                true,
            ))
            .unwrap();
        let feedback = FeedbackStore::in_memory();
        let engine = RoutingEngine::new(3);
        let decision = engine.route(
            &generation_classification(),
            Strategy::CostOptimized,
            &registry,
            &feedback,
        );
        assert_eq!(decision.selected[0], "local");
        assert_eq!(decision.selected[1], "b"); // 0.003 < 0.015
    }

    #[test]
    fn test_selection_bounded_and_capable() {
        let registry = two_worker_registry();
        let feedback = FeedbackStore::in_memory();
        let classification = generation_classification();
        let engine = RoutingEngine::new(1);
        for strategy in [
            Strategy::BestMatch,
            Strategy::ParallelDiverse,
            Strategy::CostOptimized,
            Strategy::SpeedOptimized,
            Strategy::ReliabilityOptimized,
            Strategy::Hybrid,
        ] {
            let decision = engine.route(&classification, strategy, &registry, &feedback);
            assert!(decision.selected.len() <= 1, "strategy {strategy}");
            for id in &decision.selected {
                let w = registry.get(id).unwrap();
                assert!(w.has_any_capability(&classification.required_capabilities));
            }
        }
    }

    #[test]
    fn test_no_capable_worker_returns_empty_not_error() {
        let registry = two_worker_registry();
        let feedback = FeedbackStore::in_memory();
        let mut classification = generation_classification();
        classification.required_capabilities =
            [Capability::from("quantum-compiling")].into_iter().collect();
        let engine = RoutingEngine::new(3);
        let decision = engine.route(&classification, Strategy::Hybrid, &registry, &feedback);
        assert!(decision.selected.is_empty());
        assert!(decision.alternates.is_empty());
    }

    #[test]
    fn test_hybrid_is_idempotent() {
        let registry = two_worker_registry();
        let feedback = FeedbackStore::in_memory();
        let classification = generation_classification();
        let engine = RoutingEngine::new(3);
        let first = engine.route(&classification, Strategy::Hybrid, &registry, &feedback);
        let second = engine.route(&classification, Strategy::Hybrid, &registry, &feedback);
        assert_eq!(first.selected, second.selected);
        assert_eq!(first.alternates, second.alternates);
    }

    #[test]
    fn test_parallel_diverse_spans_families() {
        let mut registry = two_worker_registry();
        registry
            .register(worker(
                "a2",
                "acme",
                &["code-generation"],
                SpeedTier::Fast,
                ReliabilityTier::High,
                0.01,
                false,
            ))
            .unwrap();
        let feedback = FeedbackStore::in_memory();
        let classification =
            TaskClassifier::new().classify("compare several implementations of the parser");
        assert!(classification.parallelizable);

        let engine = RoutingEngine::new(3);
        let decision = engine.route(
            &classification,
            Strategy::ParallelDiverse,
            &registry,
            &feedback,
        );
        // One worker per family, first registered wins within a family.
        assert_eq!(decision.selected, vec!["a", "b"]);
    }

    #[test]
    fn test_parallel_diverse_falls_back_when_not_parallelizable() {
        let registry = two_worker_registry();
        let feedback = FeedbackStore::in_memory();
        let classification = TaskClassifier::new().classify("implement one tiny function");
        assert!(!classification.parallelizable);

        let engine = RoutingEngine::new(3);
        let decision = engine.route(
            &classification,
            Strategy::ParallelDiverse,
            &registry,
            &feedback,
        );
        assert_eq!(decision.strategy_used, Strategy::BestMatch);
        assert!(decision.has_workers());
    }

    #[test]
    fn test_learned_empty_without_history() {
        let registry = two_worker_registry();
        let feedback = FeedbackStore::in_memory();
        let engine = RoutingEngine::new(3);
        let decision = engine.route(
            &generation_classification(),
            Strategy::Learned,
            &registry,
            &feedback,
        );
        assert_eq!(decision.strategy_used, Strategy::Learned);
        assert!(decision.selected.is_empty());
    }

    #[test]
    fn test_learned_ranks_by_history() {
        use crate::classify::TaskType;
        use crate::feedback::FeedbackEntry;

        let registry = two_worker_registry();
        let feedback = FeedbackStore::in_memory();
        // Worker b succeeds, worker a fails.
        for _ in 0..3 {
            feedback.record(FeedbackEntry {
                worker_id: "b".into(),
                task_type: TaskType::Generation,
                success: true,
                latency_ms: 800,
                tokens_used: 100,
                cost: 0.001,
                quality: Some(0.9),
                user_rating: None,
            });
            feedback.record(FeedbackEntry {
                worker_id: "a".into(),
                task_type: TaskType::Generation,
                success: false,
                latency_ms: 2_000,
                tokens_used: 100,
                cost: 0.01,
                quality: Some(0.2),
                user_rating: None,
            });
        }

        let engine = RoutingEngine::new(2);
        let decision = engine.route(
            &generation_classification(),
            Strategy::Learned,
            &registry,
            &feedback,
        );
        assert_eq!(decision.selected[0], "b");
    }

    #[test]
    fn test_strategy_round_trips_through_str() {
        for strategy in [
            Strategy::BestMatch,
            Strategy::ParallelDiverse,
            Strategy::CostOptimized,
            Strategy::SpeedOptimized,
            Strategy::ReliabilityOptimized,
            Strategy::Hybrid,
            Strategy::Learned,
        ] {
            let parsed: Strategy = strategy.as_str().parse().unwrap();
            assert_eq!(parsed, strategy);
        }
        assert!("made-up".parse::<Strategy>().is_err());
    }
}
