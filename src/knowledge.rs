//! Knowledge collaborator — named skill/context lookup.
//!
//! Skill loading, file formats, and rendering live outside the core; this is
//! only the seam. The orchestrator uses `search` to prepend relevant skill
//! names to a worker request's context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Error type for knowledge lookups.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("skill not found: {0}")]
    NotFound(String),
}

/// A search hit with its relevance to the query, in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillHit {
    pub name: String,
    pub relevance: f64,
}

/// Read-only knowledge store the caller provides.
pub trait KnowledgeStore: Send + Sync {
    /// Fetch a skill body by name.
    fn get(&self, name: &str) -> Result<String, KnowledgeError>;

    /// Skills relevant to a free-text query, best first.
    fn search(&self, query: &str) -> Vec<SkillHit>;

    /// All known skill names.
    fn list(&self) -> Vec<String>;
}

/// In-memory store with naive term-overlap relevance. Suitable for tests
/// and small embedded skill sets.
#[derive(Debug, Default)]
pub struct MemoryKnowledgeStore {
    skills: RwLock<BTreeMap<String, String>>,
}

impl MemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a skill.
    pub fn insert(&self, name: impl Into<String>, body: impl Into<String>) {
        self.skills
            .write()
            .expect("knowledge lock poisoned")
            .insert(name.into(), body.into());
    }
}

impl KnowledgeStore for MemoryKnowledgeStore {
    fn get(&self, name: &str) -> Result<String, KnowledgeError> {
        self.skills
            .read()
            .expect("knowledge lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| KnowledgeError::NotFound(name.to_string()))
    }

    fn search(&self, query: &str) -> Vec<SkillHit> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|t| t.len() > 2)
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let skills = self.skills.read().expect("knowledge lock poisoned");
        let mut hits: Vec<SkillHit> = skills
            .iter()
            .filter_map(|(name, body)| {
                let haystack = format!("{} {}", name.to_lowercase(), body.to_lowercase());
                let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                if matched == 0 {
                    return None;
                }
                Some(SkillHit {
                    name: name.clone(),
                    relevance: matched as f64 / terms.len() as f64,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        hits
    }

    fn list(&self) -> Vec<String> {
        self.skills
            .read()
            .expect("knowledge lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
