//! Domain-profile strategy selection.
//!
//! Some task domains have a natural routing posture: consensus-hungry data
//! work fans out across providers, infrastructure work wants the most
//! reliable workers, and so on. Profiles are consulted only when the caller
//! does not force a strategy.

use serde::{Deserialize, Serialize};

use super::Strategy;

/// Recognized task domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    Frontend,
    Backend,
    DataScience,
    DevOps,
    Mobile,
    Testing,
}

impl Domain {
    /// All domains in declaration order; the order breaks detection ties.
    pub fn all() -> &'static [Domain] {
        &[
            Self::Frontend,
            Self::Backend,
            Self::DataScience,
            Self::DevOps,
            Self::Mobile,
            Self::Testing,
        ]
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Frontend => &[
                "react", "vue", "angular", "css", "html", "javascript", "typescript", "ui", "ux",
                "component", "styling",
            ],
            Self::Backend => &[
                "api", "database", "express", "django", "flask", "sql", "rest", "graphql",
                "authentication", "middleware", "server",
            ],
            Self::DataScience => &[
                "machine learning", "data science", "pandas", "numpy", "tensorflow", "pytorch",
                "statistics", "visualization", "model",
            ],
            Self::DevOps => &[
                "docker", "kubernetes", "ci/cd", "terraform", "aws", "gcp", "azure", "monitoring",
                "deployment", "infrastructure",
            ],
            Self::Mobile => &[
                "react-native", "flutter", "swift", "kotlin", "mobile", "ios", "android",
            ],
            Self::Testing => &[
                "jest", "pytest", "mocha", "unit test", "integration test", "e2e", "qa",
                "coverage",
            ],
        }
    }

    /// Preferred routing posture for this domain.
    pub fn preferred_strategy(self) -> Strategy {
        match self {
            Self::Frontend => Strategy::BestMatch,
            Self::Backend => Strategy::ReliabilityOptimized,
            Self::DataScience => Strategy::ParallelDiverse,
            Self::DevOps => Strategy::ReliabilityOptimized,
            Self::Mobile => Strategy::BestMatch,
            Self::Testing => Strategy::SpeedOptimized,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frontend => write!(f, "frontend"),
            Self::Backend => write!(f, "backend"),
            Self::DataScience => write!(f, "data-science"),
            Self::DevOps => write!(f, "devops"),
            Self::Mobile => write!(f, "mobile"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Minimum keyword hits before a domain match is trusted.
const DETECTION_THRESHOLD: usize = 2;

/// Detect the dominant domain of a task description, if any.
///
/// Scores keyword hits per domain; below the threshold the result is `None`
/// and callers should stick with their default strategy.
pub fn detect(text: &str) -> Option<Domain> {
    let lower = text.to_lowercase();
    let mut best: Option<Domain> = None;
    let mut best_score = 0usize;
    for &domain in Domain::all() {
        let score = domain
            .keywords()
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        if score > best_score {
            best_score = score;
            best = Some(domain);
        }
    }
    if best_score >= DETECTION_THRESHOLD {
        best
    } else {
        None
    }
}
