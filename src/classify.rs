//! Task classification — free text to task type, complexity, and priority.
//!
//! Classification is a pure keyword-scoring pass: each task type carries a
//! fixed keyword list, the type with the most hits wins, and ties fall to
//! declaration order so identical input always classifies identically. The
//! token estimate is a fixed-ratio heuristic and must never be treated as
//! billing-accurate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::registry::Capability;

/// Fixed task taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Generate new code or content from a description.
    Generation,
    /// Review existing code for issues or quality.
    Review,
    /// Restructure existing code without changing behavior.
    Refactor,
    /// Architecture and system design questions.
    Design,
    /// Documentation, explanations, guides.
    Docs,
    /// Test writing and coverage work.
    Test,
    /// Examination of code or data for insight.
    Analysis,
    /// Open-ended investigation of a topic.
    Research,
    /// Multi-step problem solving and algorithms.
    Reasoning,
    /// Fallback when no category keyword matches.
    General,
}

impl TaskType {
    /// All task types in declaration order. The order is load-bearing: it is
    /// the tie-break for classification and the iteration order for scoring.
    pub fn all() -> &'static [TaskType] {
        &[
            Self::Generation,
            Self::Review,
            Self::Refactor,
            Self::Design,
            Self::Docs,
            Self::Test,
            Self::Analysis,
            Self::Research,
            Self::Reasoning,
            Self::General,
        ]
    }

    /// Capability tags a worker needs to take on this task type.
    pub fn required_capabilities(self) -> BTreeSet<Capability> {
        let tags: &[&str] = match self {
            Self::Generation => &["code-generation"],
            Self::Review => &["code-review"],
            Self::Refactor => &["refactoring"],
            Self::Design => &["system-design", "architecture"],
            Self::Docs => &["documentation"],
            Self::Test => &["testing"],
            Self::Analysis => &["analysis"],
            Self::Research => &["research"],
            Self::Reasoning => &["complex-reasoning"],
            Self::General => &["general-tasks"],
        };
        tags.iter().map(|t| Capability::from(*t)).collect()
    }

    /// Keywords whose presence votes for this task type.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Generation => &["generate", "create", "write", "implement", "build", "code"],
            Self::Review => &["review", "audit", "examine", "quality", "check"],
            Self::Refactor => &["refactor", "improve", "optimize", "clean", "restructure"],
            Self::Design => &["design", "architecture", "structure", "plan", "blueprint"],
            Self::Docs => &["document", "explain", "describe", "guide", "tutorial"],
            Self::Test => &["test", "unit test", "integration test", "e2e", "coverage"],
            Self::Analysis => &["analyze", "investigate", "data", "statistics", "metrics"],
            Self::Research => &["research", "explore", "study", "learn"],
            Self::Reasoning => &["complex", "solve", "problem", "algorithm", "logic"],
            Self::General => &["help", "assist", "support", "general"],
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation => write!(f, "generation"),
            Self::Review => write!(f, "review"),
            Self::Refactor => write!(f, "refactor"),
            Self::Design => write!(f, "design"),
            Self::Docs => write!(f, "docs"),
            Self::Test => write!(f, "test"),
            Self::Analysis => write!(f, "analysis"),
            Self::Research => write!(f, "research"),
            Self::Reasoning => write!(f, "reasoning"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Complexity tier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Priority of a task, derived from urgency keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Fixed-ratio token estimate. Input is len/4 rounded up; output and total
/// are 1.5x and 2.5x input. Approximate by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub input: u32,
    pub output: u32,
    pub total: u32,
}

impl TokenEstimate {
    fn for_text(text: &str) -> Self {
        let input = text.len().div_ceil(4) as u32;
        Self {
            input,
            output: (input as f64 * 1.5).ceil() as u32,
            total: (input as f64 * 2.5).ceil() as u32,
        }
    }
}

/// Result of classifying one task description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskClassification {
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub priority: Priority,
    /// Always non-empty; falls back to the general capability.
    pub required_capabilities: BTreeSet<Capability>,
    /// Whether the task looks safe to fan out to diverse workers.
    pub parallelizable: bool,
    pub estimated_tokens: TokenEstimate,
    /// Up to ten salient keywords from the description.
    pub keywords: Vec<String>,
    pub word_count: usize,
}

const HIGH_COMPLEXITY_KEYWORDS: &[&str] = &[
    "complex",
    "advanced",
    "sophisticated",
    "intricate",
    "architecture",
    "design pattern",
    "algorithm",
    "optimization",
];

const MEDIUM_COMPLEXITY_KEYWORDS: &[&str] =
    &["refactor", "improve", "enhance", "integrate", "multiple"];

const CRITICAL_PRIORITY_KEYWORDS: &[&str] =
    &["urgent", "asap", "critical", "emergency", "immediately"];

const HIGH_PRIORITY_KEYWORDS: &[&str] = &["important", "high priority", "soon"];

const LOW_PRIORITY_KEYWORDS: &[&str] = &["low priority", "when possible", "no rush"];

const PARALLEL_KEYWORDS: &[&str] = &[
    "multiple",
    "several",
    "different",
    "various",
    "both",
    "compare",
    "in parallel",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "this", "that",
];

/// Keyword-driven task classifier.
///
/// `classify` is a pure function: same text in, same classification out.
#[derive(Debug, Default, Clone)]
pub struct TaskClassifier;

impl TaskClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a free-text task description.
    pub fn classify(&self, text: &str) -> TaskClassification {
        let lower = text.to_lowercase();
        let word_count = lower.split_whitespace().count();

        let task_type = Self::detect_task_type(&lower);
        let complexity = Self::estimate_complexity(&lower, word_count);
        let priority = Self::determine_priority(&lower);

        TaskClassification {
            task_type,
            complexity,
            priority,
            required_capabilities: task_type.required_capabilities(),
            parallelizable: PARALLEL_KEYWORDS.iter().any(|k| lower.contains(k)),
            estimated_tokens: TokenEstimate::for_text(text),
            keywords: Self::extract_keywords(&lower),
            word_count,
        }
    }

    fn detect_task_type(lower: &str) -> TaskType {
        let mut best = TaskType::General;
        let mut best_score = 0usize;
        for &ty in TaskType::all() {
            let score = ty.keywords().iter().filter(|k| lower.contains(*k)).count();
            // Strict greater-than keeps the earliest declared type on ties.
            if score > best_score {
                best_score = score;
                best = ty;
            }
        }
        best
    }

    fn estimate_complexity(lower: &str, word_count: usize) -> Complexity {
        if word_count > 500 || HIGH_COMPLEXITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Complexity::High
        } else if word_count > 200 || MEDIUM_COMPLEXITY_KEYWORDS.iter().any(|k| lower.contains(k))
        {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }

    fn determine_priority(lower: &str) -> Priority {
        if CRITICAL_PRIORITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Priority::Critical
        } else if HIGH_PRIORITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Priority::High
        } else if LOW_PRIORITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Priority::Low
        } else {
            Priority::Normal
        }
    }

    fn extract_keywords(lower: &str) -> Vec<String> {
        lower
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| w.len() > 3 && !STOP_WORDS.contains(w))
            .map(str::to_string)
            .take(10)
            .collect()
    }
}
