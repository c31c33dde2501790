//! Task Routing and Orchestration Core
//!
//! This library provides:
//! - A worker registry describing heterogeneous workers and their capabilities
//! - A keyword-based task classifier (type, complexity, priority, token estimate)
//! - A routing policy engine with seven selection strategies
//! - A settle-all executor that fans a task out to workers concurrently
//! - A rule-based aggregator merging settled outcomes into one result
//! - An adaptive feedback store that learns worker performance over time
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use taskmesh::{Orchestrator, OrchestratorConfig, WorkerRegistry};
//! # use std::time::Duration;
//! # struct MyAdapter;
//! # #[async_trait::async_trait]
//! # impl taskmesh::WorkerAdapter for MyAdapter {
//! #     async fn invoke(
//! #         &self,
//! #         _worker_id: &str,
//! #         _request: &taskmesh::TaskRequest,
//! #         _timeout: Duration,
//! #     ) -> Result<taskmesh::AdapterResponse, taskmesh::AdapterError> {
//! #         unimplemented!()
//! #     }
//! # }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! # let seed_doc = serde_json::json!([]);
//! let registry = WorkerRegistry::from_seed(&seed_doc)?;
//!
//! let orchestrator = Orchestrator::new(
//!     OrchestratorConfig::default(),
//!     Arc::new(registry),
//!     Arc::new(MyAdapter),
//! )?;
//!
//! let report = orchestrator
//!     .execute("implement a rate limiter", None, &CancellationToken::new())
//!     .await;
//! println!("{} workers succeeded", report.aggregated.successful_workers);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod classify;
pub mod cost;
pub mod executor;
pub mod feedback;
pub mod knowledge;
pub mod orchestrator;
pub mod registry;
pub mod routing;
pub mod stats;
pub mod store;

// Re-export key registry types
pub use registry::{
    Capability, RegistryError, RegistryStatistics, ReliabilityTier, SpeedTier, Worker,
    WorkerRegistry,
};

// Re-export key classification types
pub use classify::{
    Complexity, Priority, TaskClassification, TaskClassifier, TaskType, TokenEstimate,
};

// Re-export key routing types
pub use routing::{Domain, RoutingDecision, RoutingEngine, Strategy, UnknownStrategy};

// Re-export key execution types
pub use executor::{
    AdapterError, AdapterResponse, Executor, OutcomeError, TaskRequest, WorkerAdapter,
    WorkerOutcome,
};

// Re-export key aggregation types
pub use aggregate::{aggregate, AggregatedResult, Consensus, WorkerFailure, WorkerResponse};

// Re-export key feedback types
pub use feedback::{
    FeedbackEntry, FeedbackInsights, FeedbackStore, Prediction, RankedWorker, WorkerStats,
};

// Re-export key orchestrator types
pub use orchestrator::{
    ConfigError, ExecutionRecord, Orchestrator, OrchestratorConfig, OrchestratorStatistics,
    TaskReport,
};

// Re-export collaborator seams
pub use knowledge::{KnowledgeError, KnowledgeStore, MemoryKnowledgeStore, SkillHit};
pub use store::{JsonFileStore, MemoryStore, PersistenceStore, StoreError, StoreResult};

// Re-export cost tracking types
pub use cost::{BudgetStatus, CostSample, CostSummary, CostTracker};
