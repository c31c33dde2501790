//! Worker registry — capability, cost, and reliability metadata.
//!
//! The registry is the static/dynamic catalogue of invocable backends. Worker
//! records are immutable once registered; learned scores live in the feedback
//! store and are joined at routing time, never written back onto the worker.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Capability label describing what kind of task a worker can perform.
///
/// Kept as a transparent string so dynamically registered workers can carry
/// tags outside the built-in task taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(pub String);

impl Capability {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Speed tier of a worker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeedTier {
    VerySlow,
    Slow,
    Medium,
    Fast,
    VeryFast,
}

impl SpeedTier {
    /// Fixed ordinal score, shared by every component that compares speeds.
    pub fn score(self) -> u8 {
        match self {
            Self::VerySlow => 1,
            Self::Slow => 2,
            Self::Medium => 3,
            Self::Fast => 4,
            Self::VeryFast => 5,
        }
    }
}

impl std::fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VerySlow => write!(f, "very-slow"),
            Self::Slow => write!(f, "slow"),
            Self::Medium => write!(f, "medium"),
            Self::Fast => write!(f, "fast"),
            Self::VeryFast => write!(f, "very-fast"),
        }
    }
}

/// Reliability tier of a worker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReliabilityTier {
    Low,
    Medium,
    MediumHigh,
    High,
    VeryHigh,
}

impl ReliabilityTier {
    /// Fixed ordinal score, shared by every component that compares reliability.
    pub fn score(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::MediumHigh => 3,
            Self::High => 4,
            Self::VeryHigh => 5,
        }
    }
}

impl std::fmt::Display for ReliabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::MediumHigh => write!(f, "medium-high"),
            Self::High => write!(f, "high"),
            Self::VeryHigh => write!(f, "very-high"),
        }
    }
}

/// One invocable backend with its capability/cost/speed/reliability profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Unique identifier within the registry.
    pub id: String,
    /// Provider family grouping tag (used for cross-provider diversity).
    pub provider_family: String,
    /// Human-readable name.
    pub display_name: String,
    /// Non-empty set of capability tags.
    pub capabilities: BTreeSet<Capability>,
    /// Maximum request payload size in tokens.
    pub max_payload_tokens: u32,
    /// Cost per thousand tokens; zero for local/free workers.
    pub cost_per_k_tokens: f64,
    /// Speed tier.
    pub speed: SpeedTier,
    /// Reliability tier.
    pub reliability: ReliabilityTier,
    /// Whether the worker runs locally (no per-token cost, no network).
    pub is_local: bool,
    /// One-line description of the worker's specialty.
    #[serde(default)]
    pub description: String,
}

impl Worker {
    /// Whether this worker advertises the given capability.
    pub fn has_capability(&self, tag: &Capability) -> bool {
        self.capabilities.contains(tag)
    }

    /// Whether this worker advertises any of the given capabilities.
    pub fn has_any_capability(&self, tags: &BTreeSet<Capability>) -> bool {
        tags.iter().any(|t| self.capabilities.contains(t))
    }
}

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("worker already registered: {0}")]
    DuplicateWorker(String),

    #[error("worker has no capabilities: {0}")]
    EmptyCapabilities(String),
}

/// Aggregate counts over the catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total_workers: usize,
    pub by_family: HashMap<String, usize>,
    pub local_workers: usize,
    pub cloud_workers: usize,
    pub capabilities: BTreeSet<Capability>,
}

/// Catalogue of available workers.
///
/// Registration order is preserved and used as the final tie-breaker in every
/// ranking, so identical inputs always produce identical orderings.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Vec<Worker>,
    index: HashMap<String, usize>,
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Fails on duplicate id or an empty capability set.
    pub fn register(&mut self, worker: Worker) -> Result<(), RegistryError> {
        if self.index.contains_key(&worker.id) {
            return Err(RegistryError::DuplicateWorker(worker.id));
        }
        if worker.capabilities.is_empty() {
            return Err(RegistryError::EmptyCapabilities(worker.id));
        }
        tracing::debug!(worker_id = %worker.id, family = %worker.provider_family, "worker registered");
        self.index.insert(worker.id.clone(), self.workers.len());
        self.workers.push(worker);
        Ok(())
    }

    /// Build a registry from a persisted seed document (an array of workers).
    pub fn from_seed(doc: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let workers: Vec<Worker> = serde_json::from_value(doc.clone())?;
        let mut registry = Self::new();
        for worker in workers {
            // Seed documents are trusted; duplicates keep the first entry.
            let _ = registry.register(worker);
        }
        Ok(registry)
    }

    /// Serialize the catalogue as a seed document.
    pub fn seed_doc(&self) -> serde_json::Value {
        serde_json::to_value(&self.workers).unwrap_or(serde_json::Value::Null)
    }

    /// Look up a worker by id.
    pub fn get(&self, id: &str) -> Option<&Worker> {
        self.index.get(id).map(|&i| &self.workers[i])
    }

    /// All workers in registration order.
    pub fn all(&self) -> &[Worker] {
        &self.workers
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// All workers advertising the given capability, in registration order.
    pub fn by_capability(&self, tag: &Capability) -> Vec<&Worker> {
        self.workers.iter().filter(|w| w.has_capability(tag)).collect()
    }

    /// All workers of the given provider family, in registration order.
    pub fn by_family(&self, family: &str) -> Vec<&Worker> {
        self.workers
            .iter()
            .filter(|w| w.provider_family == family)
            .collect()
    }

    /// All workers running locally.
    pub fn local_workers(&self) -> Vec<&Worker> {
        self.workers.iter().filter(|w| w.is_local).collect()
    }

    /// Distinct provider families in first-seen order.
    pub fn families(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for w in &self.workers {
            if !seen.contains(&w.provider_family.as_str()) {
                seen.push(w.provider_family.as_str());
            }
        }
        seen
    }

    /// Top `n` workers supporting `capability`, ordered by reliability then
    /// speed. Reliability is the primary sort key, not a blended score, so a
    /// very reliable but slow worker always outranks a fast unreliable one.
    pub fn best(&self, capability: &Capability, n: usize) -> Vec<&Worker> {
        let mut candidates = self.by_capability(capability);
        // Stable sort keeps registration order for full ties.
        candidates.sort_by(|a, b| {
            b.reliability
                .score()
                .cmp(&a.reliability.score())
                .then_with(|| b.speed.score().cmp(&a.speed.score()))
        });
        candidates.truncate(n);
        candidates
    }

    /// Aggregate counts over the catalogue.
    pub fn statistics(&self) -> RegistryStatistics {
        let mut by_family: HashMap<String, usize> = HashMap::new();
        let mut capabilities = BTreeSet::new();
        let mut local = 0;
        for w in &self.workers {
            *by_family.entry(w.provider_family.clone()).or_default() += 1;
            capabilities.extend(w.capabilities.iter().cloned());
            if w.is_local {
                local += 1;
            }
        }
        RegistryStatistics {
            total_workers: self.workers.len(),
            by_family,
            local_workers: local,
            cloud_workers: self.workers.len() - local,
            capabilities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str, family: &str, caps: &[&str], speed: SpeedTier, rel: ReliabilityTier) -> Worker {
        Worker {
            id: id.to_string(),
            provider_family: family.to_string(),
            display_name: id.to_string(),
            capabilities: caps.iter().map(|c| Capability::from(*c)).collect(),
            max_payload_tokens: 8_000,
            cost_per_k_tokens: 0.01,
            speed,
            reliability: rel,
            is_local: false,
            description: String::new(),
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(worker("a", "acme", &["generation"], SpeedTier::Fast, ReliabilityTier::High))
            .unwrap();
        assert!(registry.get("a").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_worker_rejected() {
        let mut registry = WorkerRegistry::new();
        let w = worker("a", "acme", &["generation"], SpeedTier::Fast, ReliabilityTier::High);
        registry.register(w.clone()).unwrap();
        assert!(matches!(
            registry.register(w),
            Err(RegistryError::DuplicateWorker(_))
        ));
    }

    #[test]
    fn test_empty_capabilities_rejected() {
        let mut registry = WorkerRegistry::new();
        let mut w = worker("a", "acme", &[], SpeedTier::Fast, ReliabilityTier::High);
        w.capabilities.clear();
        assert!(matches!(
            registry.register(w),
            Err(RegistryError::EmptyCapabilities(_))
        ));
    }

    #[test]
    fn test_best_prefers_reliability_over_speed() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(worker("a", "acme", &["code-generation"], SpeedTier::Medium, ReliabilityTier::VeryHigh))
            .unwrap();
        registry
            .register(worker("b", "zeta", &["code-generation"], SpeedTier::VeryFast, ReliabilityTier::Medium))
            .unwrap();

        let best = registry.best(&Capability::from("code-generation"), 1);
        assert_eq!(best[0].id, "a");
    }

    #[test]
    fn test_best_ties_broken_by_registration_order() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(worker("first", "acme", &["review"], SpeedTier::Fast, ReliabilityTier::High))
            .unwrap();
        registry
            .register(worker("second", "zeta", &["review"], SpeedTier::Fast, ReliabilityTier::High))
            .unwrap();

        let best = registry.best(&Capability::from("review"), 2);
        assert_eq!(best[0].id, "first");
        assert_eq!(best[1].id, "second");
    }

    #[test]
    fn test_by_capability_and_family() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(worker("a", "acme", &["generation", "review"], SpeedTier::Fast, ReliabilityTier::High))
            .unwrap();
        registry
            .register(worker("b", "zeta", &["review"], SpeedTier::Fast, ReliabilityTier::High))
            .unwrap();

        assert_eq!(registry.by_capability(&Capability::from("review")).len(), 2);
        assert_eq!(registry.by_capability(&Capability::from("generation")).len(), 1);
        assert_eq!(registry.by_family("acme").len(), 1);
        assert_eq!(registry.families(), vec!["acme", "zeta"]);
    }

    #[test]
    fn test_seed_round_trip() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(worker("a", "acme", &["generation"], SpeedTier::Fast, ReliabilityTier::High))
            .unwrap();
        let doc = registry.seed_doc();
        let restored = WorkerRegistry::from_seed(&doc).unwrap();
        assert_eq!(restored.len(), 1);
        assert!(restored.get("a").is_some());
    }

    #[test]
    fn test_statistics() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(worker("a", "acme", &["generation"], SpeedTier::Fast, ReliabilityTier::High))
            .unwrap();
        let mut local = worker("b", "home", &["generation"], SpeedTier::Medium, ReliabilityTier::Medium);
        local.is_local = true;
        registry.register(local).unwrap();

        let stats = registry.statistics();
        assert_eq!(stats.total_workers, 2);
        assert_eq!(stats.local_workers, 1);
        assert_eq!(stats.cloud_workers, 1);
        assert_eq!(stats.by_family["acme"], 1);
    }
}
