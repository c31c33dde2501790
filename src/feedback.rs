//! Adaptive feedback store — per-worker outcome history and learned scores.
//!
//! Every completed worker call becomes a [`FeedbackEntry`]. Stats are folded
//! in incrementally with [`RunningStat`], never recomputed from scratch, and
//! each worker's row sits behind its own mutex so unrelated workers never
//! serialize against each other. Persistence is best-effort: a failing store
//! is logged and the task result still returns.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::classify::TaskType;
use crate::stats::RunningStat;
use crate::store::PersistenceStore;

/// Store key for the persisted snapshot.
const SNAPSHOT_KEY: &str = "feedback";

/// One observed outcome sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub worker_id: String,
    pub task_type: TaskType,
    pub success: bool,
    pub latency_ms: u64,
    pub tokens_used: u64,
    pub cost: f64,
    /// Caller-supplied quality score in `[0, 1]`. `None` when no judgement
    /// exists yet; the core never fabricates one.
    pub quality: Option<f64>,
    /// Optional explicit user rating, 1..=5.
    pub user_rating: Option<u8>,
}

/// Running statistics for one worker (or one worker/task-type pair).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub executions: u64,
    pub successes: u64,
    pub latency_ms: RunningStat,
    pub tokens: RunningStat,
    pub cost: RunningStat,
    pub quality: RunningStat,
    pub user_rating: RunningStat,
}

impl WorkerStats {
    fn record(&mut self, entry: &FeedbackEntry) {
        self.executions += 1;
        if entry.success {
            self.successes += 1;
        }
        self.latency_ms.record(entry.latency_ms as f64);
        self.tokens.record(entry.tokens_used as f64);
        self.cost.record(entry.cost);
        if let Some(quality) = entry.quality {
            self.quality.record(quality.clamp(0.0, 1.0));
        }
        if let Some(rating) = entry.user_rating {
            self.user_rating.record(f64::from(rating.clamp(1, 5)));
        }
    }

    /// Fold in a subjective judgement without counting an execution.
    fn rate(&mut self, quality: f64, user_rating: Option<u8>) {
        self.quality.record(quality.clamp(0.0, 1.0));
        if let Some(rating) = user_rating {
            self.user_rating.record(f64::from(rating.clamp(1, 5)));
        }
    }

    /// Fraction of successful executions, zero when empty.
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }

    /// Task-specific learned composite: success rate 0.4, quality 0.3,
    /// inverse latency 0.2, inverse cost 0.1. Quality defaults to 0.5 until
    /// a judgement arrives.
    pub fn learned_score(&self) -> f64 {
        let latency_secs = self.latency_ms.mean / 1000.0;
        self.success_rate() * 0.4
            + self.quality.mean_or(0.5) * 0.3
            + (1.0 / (1.0 + latency_secs)) * 0.2
            + (1.0 / (1.0 + self.cost.mean)) * 0.1
    }

    /// General health blend, distinct from the routing composite: success
    /// rate 0.3, efficiency 0.2, quality 0.3, user satisfaction 0.2 (0.5
    /// when no rating has ever been given).
    pub fn health_score(&self) -> f64 {
        let efficiency = 1.0 / (1.0 + self.latency_ms.mean / 1000.0);
        let satisfaction = if self.user_rating.is_empty() {
            0.5
        } else {
            self.user_rating.mean / 5.0
        };
        self.success_rate() * 0.3
            + efficiency * 0.2
            + self.quality.mean_or(0.5) * 0.3
            + satisfaction * 0.2
    }
}

/// One worker's learned standing for a task type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedWorker {
    pub worker_id: String,
    pub samples: u64,
    pub success_rate: f64,
    pub avg_quality: f64,
    pub score: f64,
}

/// Prediction of the best worker for a task type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// `None` when no history exists for the task type.
    pub worker_id: Option<String>,
    pub confidence: f64,
    pub reason: String,
}

/// High-level view over accumulated history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackInsights {
    pub total_entries: u64,
    pub total_workers: usize,
    pub top_performers: Vec<(String, f64)>,
    pub bottom_performers: Vec<(String, f64)>,
    pub best_per_task_type: HashMap<String, String>,
}

/// Serializable snapshot for persistence.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    total_entries: u64,
    workers: HashMap<String, WorkerStats>,
    /// Keyed `"{worker_id}\u{1f}{task_type}"` to stay a JSON object.
    task_pairs: HashMap<String, WorkerStats>,
}

fn pair_key(worker_id: &str, task_type: TaskType) -> String {
    format!("{worker_id}\u{1f}{task_type}")
}

/// Thread-safe feedback store with per-row locking.
pub struct FeedbackStore {
    workers: RwLock<HashMap<String, Arc<Mutex<WorkerStats>>>>,
    task_pairs: RwLock<HashMap<String, Arc<Mutex<WorkerStats>>>>,
    total_entries: AtomicU64,
    persistence: Option<Arc<dyn PersistenceStore>>,
}

impl FeedbackStore {
    /// Store with no persistence backing.
    pub fn in_memory() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            task_pairs: RwLock::new(HashMap::new()),
            total_entries: AtomicU64::new(0),
            persistence: None,
        }
    }

    /// Store backed by a persistence collaborator; hydrates from any
    /// previously saved snapshot.
    pub fn with_persistence(store: Arc<dyn PersistenceStore>) -> Self {
        let mut hydrated = Self::in_memory();
        match store.load(SNAPSHOT_KEY) {
            Ok(Some(doc)) => match serde_json::from_value::<Snapshot>(doc) {
                Ok(snapshot) => hydrated.apply_snapshot(snapshot),
                Err(e) => warn!(error = %e, "discarding unreadable feedback snapshot"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not load feedback snapshot"),
        }
        hydrated.persistence = Some(store);
        hydrated
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        let workers = snapshot
            .workers
            .into_iter()
            .map(|(k, v)| (k, Arc::new(Mutex::new(v))))
            .collect();
        let task_pairs = snapshot
            .task_pairs
            .into_iter()
            .map(|(k, v)| (k, Arc::new(Mutex::new(v))))
            .collect();
        self.workers = RwLock::new(workers);
        self.task_pairs = RwLock::new(task_pairs);
        self.total_entries = AtomicU64::new(snapshot.total_entries);
    }

    fn row(
        map: &RwLock<HashMap<String, Arc<Mutex<WorkerStats>>>>,
        key: &str,
    ) -> Arc<Mutex<WorkerStats>> {
        if let Some(row) = map.read().expect("feedback lock poisoned").get(key) {
            return Arc::clone(row);
        }
        let mut guard = map.write().expect("feedback lock poisoned");
        Arc::clone(guard.entry(key.to_string()).or_default())
    }

    /// Record one outcome sample, updating both the worker row and the
    /// worker/task-type row atomically per row.
    pub fn record(&self, entry: FeedbackEntry) {
        {
            let row = Self::row(&self.workers, &entry.worker_id);
            row.lock().expect("feedback row poisoned").record(&entry);
        }
        {
            let row = Self::row(&self.task_pairs, &pair_key(&entry.worker_id, entry.task_type));
            row.lock().expect("feedback row poisoned").record(&entry);
        }
        self.total_entries.fetch_add(1, Ordering::SeqCst);
        debug!(
            worker_id = %entry.worker_id,
            task_type = %entry.task_type,
            success = entry.success,
            latency_ms = entry.latency_ms,
            "feedback recorded"
        );
        self.persist();
    }

    /// Attach a subjective quality judgement (and optional 1..=5 rating) to
    /// a worker's history for a task type. Does not count as an execution;
    /// only the quality and satisfaction stats move.
    ///
    /// Refused (returns `false`) when the worker has no recorded executions
    /// for the task type, so a mistyped id cannot create a ghost stats row.
    pub fn rate(
        &self,
        worker_id: &str,
        task_type: TaskType,
        quality: f64,
        user_rating: Option<u8>,
    ) -> bool {
        let pair = self
            .task_pairs
            .read()
            .expect("feedback lock poisoned")
            .get(&pair_key(worker_id, task_type))
            .cloned();
        let Some(pair_row) = pair else {
            warn!(
                worker_id,
                task_type = %task_type,
                "ignoring rating for worker with no recorded executions"
            );
            return false;
        };
        {
            let row = Self::row(&self.workers, worker_id);
            row.lock().expect("feedback row poisoned").rate(quality, user_rating);
        }
        pair_row
            .lock()
            .expect("feedback row poisoned")
            .rate(quality, user_rating);
        debug!(worker_id, task_type = %task_type, quality, "quality rating recorded");
        self.persist();
        true
    }

    /// Best-effort snapshot persistence. A failing store never blocks the
    /// task result.
    fn persist(&self) {
        let Some(store) = &self.persistence else {
            return;
        };
        let snapshot = self.snapshot();
        match serde_json::to_value(&snapshot) {
            Ok(doc) => {
                if let Err(e) = store.save(SNAPSHOT_KEY, &doc) {
                    warn!(error = %e, "feedback persistence failed; continuing");
                }
            }
            Err(e) => warn!(error = %e, "feedback snapshot serialization failed"),
        }
    }

    fn snapshot(&self) -> Snapshot {
        let workers = self
            .workers
            .read()
            .expect("feedback lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().expect("feedback row poisoned").clone()))
            .collect();
        let task_pairs = self
            .task_pairs
            .read()
            .expect("feedback lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().expect("feedback row poisoned").clone()))
            .collect();
        Snapshot {
            total_entries: self.total_entries.load(Ordering::SeqCst),
            workers,
            task_pairs,
        }
    }

    /// Total recorded entries across all workers.
    pub fn total_entries(&self) -> u64 {
        self.total_entries.load(Ordering::SeqCst)
    }

    /// Samples recorded for one worker across all task types.
    pub fn sample_count(&self, worker_id: &str) -> u64 {
        self.workers
            .read()
            .expect("feedback lock poisoned")
            .get(worker_id)
            .map(|row| row.lock().expect("feedback row poisoned").executions)
            .unwrap_or(0)
    }

    /// Stats for one worker across all task types.
    pub fn worker_stats(&self, worker_id: &str) -> Option<WorkerStats> {
        self.workers
            .read()
            .expect("feedback lock poisoned")
            .get(worker_id)
            .map(|row| row.lock().expect("feedback row poisoned").clone())
    }

    /// Workers ranked by learned composite score for a task type, best
    /// first. Only workers with at least one sample for that task type
    /// appear. Ties fall back to worker id for determinism.
    pub fn ranked_for(&self, task_type: TaskType) -> Vec<RankedWorker> {
        let suffix = pair_key("", task_type);
        let mut ranked: Vec<RankedWorker> = self
            .task_pairs
            .read()
            .expect("feedback lock poisoned")
            .iter()
            .filter(|(key, _)| key.ends_with(&suffix))
            .map(|(key, row)| {
                let stats = row.lock().expect("feedback row poisoned");
                let worker_id = key[..key.len() - suffix.len()].to_string();
                RankedWorker {
                    worker_id,
                    samples: stats.executions,
                    success_rate: stats.success_rate(),
                    avg_quality: stats.quality.mean,
                    score: stats.learned_score(),
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });
        ranked
    }

    /// Top `n` workers for a task type by learned score.
    pub fn best_for(&self, task_type: TaskType, n: usize) -> Vec<RankedWorker> {
        let mut ranked = self.ranked_for(task_type);
        ranked.truncate(n);
        ranked
    }

    /// Predict the best worker for a task type, with a human-readable
    /// justification.
    pub fn predict(&self, task_type: TaskType) -> Prediction {
        match self.ranked_for(task_type).into_iter().next() {
            Some(top) => Prediction {
                confidence: top.score,
                reason: format!(
                    "based on {} previous executions with {:.0}% success rate",
                    top.samples,
                    top.success_rate * 100.0
                ),
                worker_id: Some(top.worker_id),
            },
            None => Prediction {
                worker_id: None,
                confidence: 0.0,
                reason: format!("no historical data for {task_type} tasks"),
            },
        }
    }

    /// General worker health score; `None` when the worker has no history.
    pub fn health_score(&self, worker_id: &str) -> Option<f64> {
        self.worker_stats(worker_id).map(|s| s.health_score())
    }

    /// High-level view: top/bottom performers and the best worker per task
    /// type seen so far.
    pub fn insights(&self) -> FeedbackInsights {
        let mut by_health: Vec<(String, f64)> = self
            .workers
            .read()
            .expect("feedback lock poisoned")
            .iter()
            .map(|(id, row)| {
                (id.clone(), row.lock().expect("feedback row poisoned").health_score())
            })
            .collect();
        by_health.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut best_per_task_type = HashMap::new();
        for key in self
            .task_pairs
            .read()
            .expect("feedback lock poisoned")
            .keys()
        {
            if let Some((_, task_part)) = key.split_once('\u{1f}') {
                best_per_task_type.entry(task_part.to_string()).or_default();
            }
        }
        for task_name in best_per_task_type.keys().cloned().collect::<Vec<_>>() {
            // Resolve task names back through the ranked view.
            if let Some(task_type) = TaskType::all()
                .iter()
                .find(|t| t.to_string() == task_name)
            {
                if let Some(top) = self.ranked_for(*task_type).into_iter().next() {
                    best_per_task_type.insert(task_name, top.worker_id);
                }
            }
        }

        FeedbackInsights {
            total_entries: self.total_entries(),
            total_workers: by_health.len(),
            top_performers: by_health.iter().take(3).cloned().collect(),
            bottom_performers: by_health.iter().rev().take(3).cloned().collect(),
            best_per_task_type,
        }
    }

    /// Drop all history. The cleared state is persisted as well.
    pub fn clear(&self) {
        self.workers.write().expect("feedback lock poisoned").clear();
        self.task_pairs.write().expect("feedback lock poisoned").clear();
        self.total_entries.store(0, Ordering::SeqCst);
        self.persist();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError, StoreResult};
    use serde_json::Value;

    fn entry(worker: &str, task: TaskType, success: bool, latency: u64) -> FeedbackEntry {
        FeedbackEntry {
            worker_id: worker.to_string(),
            task_type: task,
            success,
            latency_ms: latency,
            tokens_used: 500,
            cost: 0.01,
            quality: Some(if success { 0.9 } else { 0.3 }),
            user_rating: None,
        }
    }

    #[test]
    fn test_running_latency_matches_exact_mean() {
        let store = FeedbackStore::in_memory();
        for latency in [2000, 3000, 1000] {
            store.record(entry("x", TaskType::Generation, true, latency));
        }
        let stats = store.worker_stats("x").unwrap();
        assert_eq!(stats.latency_ms.mean, 2000.0);
        assert_eq!(stats.executions, 3);
    }

    #[test]
    fn test_ranked_for_orders_by_score() {
        let store = FeedbackStore::in_memory();
        store.record(entry("good", TaskType::Review, true, 500));
        store.record(entry("good", TaskType::Review, true, 500));
        store.record(entry("bad", TaskType::Review, false, 4000));

        let ranked = store.ranked_for(TaskType::Review);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].worker_id, "good");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_ranked_for_scoped_to_task_type() {
        let store = FeedbackStore::in_memory();
        store.record(entry("x", TaskType::Generation, true, 500));
        assert!(store.ranked_for(TaskType::Review).is_empty());
        assert_eq!(store.ranked_for(TaskType::Generation).len(), 1);
    }

    #[test]
    fn test_predict_with_and_without_history() {
        let store = FeedbackStore::in_memory();
        let empty = store.predict(TaskType::Docs);
        assert!(empty.worker_id.is_none());
        assert_eq!(empty.confidence, 0.0);

        store.record(entry("writer", TaskType::Docs, true, 800));
        let predicted = store.predict(TaskType::Docs);
        assert_eq!(predicted.worker_id.as_deref(), Some("writer"));
        assert!(predicted.reason.contains("1 previous executions"));
        assert!(predicted.reason.contains("100%"));
    }

    #[test]
    fn test_health_score_defaults_satisfaction() {
        let store = FeedbackStore::in_memory();
        store.record(FeedbackEntry {
            user_rating: None,
            ..entry("x", TaskType::Generation, true, 0)
        });
        // success 1.0*0.3 + efficiency 1.0*0.2 + quality 0.9*0.3 + 0.5*0.2
        let health = store.health_score("x").unwrap();
        assert!((health - (0.3 + 0.2 + 0.27 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_user_rating_moves_health() {
        let store = FeedbackStore::in_memory();
        store.record(FeedbackEntry {
            user_rating: Some(5),
            ..entry("rated", TaskType::Generation, true, 0)
        });
        store.record(FeedbackEntry {
            user_rating: None,
            ..entry("unrated", TaskType::Generation, true, 0)
        });
        assert!(store.health_score("rated").unwrap() > store.health_score("unrated").unwrap());
    }

    #[test]
    fn test_rate_moves_quality_without_counting_execution() {
        let store = FeedbackStore::in_memory();
        store.record(FeedbackEntry {
            quality: None,
            ..entry("x", TaskType::Generation, true, 100)
        });
        let before = store.worker_stats("x").unwrap();
        assert!(before.quality.is_empty());

        assert!(store.rate("x", TaskType::Generation, 0.9, Some(5)));
        let after = store.worker_stats("x").unwrap();
        assert_eq!(after.executions, 1);
        assert_eq!(after.quality.mean, 0.9);
        assert_eq!(after.user_rating.mean, 5.0);
    }

    #[test]
    fn test_rate_refused_without_recorded_executions() {
        let store = FeedbackStore::in_memory();
        // Never-seen worker id.
        assert!(!store.rate("typo", TaskType::Generation, 0.9, None));
        assert!(store.worker_stats("typo").is_none());
        assert_eq!(store.insights().total_workers, 0);

        // Known worker, but no executions for this task type.
        store.record(entry("x", TaskType::Generation, true, 100));
        assert!(!store.rate("x", TaskType::Review, 0.9, None));
        assert!(store.ranked_for(TaskType::Review).is_empty());
    }

    #[test]
    fn test_unrated_quality_defaults_in_scores() {
        let store = FeedbackStore::in_memory();
        store.record(FeedbackEntry {
            quality: None,
            ..entry("x", TaskType::Generation, true, 0)
        });
        let stats = store.worker_stats("x").unwrap();
        // success 1.0*0.4 + default quality 0.5*0.3 + latency 1.0*0.2 + cost term
        let expected = 0.4 + 0.15 + 0.2 + (1.0 / 1.01) * 0.1;
        assert!((stats.learned_score() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_persistence_round_trip() {
        let backing = Arc::new(MemoryStore::new());
        {
            let store = FeedbackStore::with_persistence(backing.clone());
            store.record(entry("x", TaskType::Generation, true, 1000));
            store.record(entry("x", TaskType::Generation, false, 3000));
        }
        let rehydrated = FeedbackStore::with_persistence(backing);
        assert_eq!(rehydrated.total_entries(), 2);
        let stats = rehydrated.worker_stats("x").unwrap();
        assert_eq!(stats.executions, 2);
        assert_eq!(stats.latency_ms.mean, 2000.0);
    }

    struct FailingStore;

    impl PersistenceStore for FailingStore {
        fn load(&self, _key: &str) -> StoreResult<Option<Value>> {
            Err(StoreError::InvalidKey("down".into()))
        }
        fn save(&self, _key: &str, _doc: &Value) -> StoreResult<()> {
            Err(StoreError::InvalidKey("down".into()))
        }
    }

    #[test]
    fn test_persistence_failure_does_not_block_record() {
        let store = FeedbackStore::with_persistence(Arc::new(FailingStore));
        store.record(entry("x", TaskType::Generation, true, 100));
        assert_eq!(store.total_entries(), 1);
        assert!(store.worker_stats("x").is_some());
    }

    #[test]
    fn test_concurrent_records_lose_nothing() {
        let store = Arc::new(FeedbackStore::in_memory());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    store.record(entry("shared", TaskType::Generation, true, 100));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.total_entries(), 400);
        assert_eq!(store.worker_stats("shared").unwrap().executions, 400);
    }

    #[test]
    fn test_clear_resets_everything() {
        let store = FeedbackStore::in_memory();
        store.record(entry("x", TaskType::Generation, true, 100));
        store.clear();
        assert_eq!(store.total_entries(), 0);
        assert!(store.worker_stats("x").is_none());
        assert!(store.ranked_for(TaskType::Generation).is_empty());
    }

    #[test]
    fn test_insights_surface_top_performers() {
        let store = FeedbackStore::in_memory();
        for _ in 0..3 {
            store.record(entry("strong", TaskType::Generation, true, 400));
            store.record(entry("weak", TaskType::Generation, false, 4000));
        }
        let insights = store.insights();
        assert_eq!(insights.total_entries, 6);
        assert_eq!(insights.total_workers, 2);
        assert_eq!(insights.top_performers[0].0, "strong");
        assert_eq!(insights.best_per_task_type["generation"], "strong");
    }
}
