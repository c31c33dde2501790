//! Incremental running statistics.
//!
//! A single `RunningStat` value type replaces the `(old_avg * count + new) /
//! (count + 1)` arithmetic that would otherwise be repeated at every feedback
//! update site. The mean is exact for the samples observed so far.

use serde::{Deserialize, Serialize};

/// Incrementally updated sample count and mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStat {
    /// Number of samples observed.
    pub count: u64,
    /// Exact mean of all observed samples.
    pub mean: f64,
}

impl RunningStat {
    /// Create an empty stat.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the running mean.
    pub fn record(&mut self, sample: f64) {
        let count = self.count as f64;
        self.mean = (self.mean * count + sample) / (count + 1.0);
        self.count += 1;
    }

    /// Whether any sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The mean, or a caller-supplied default when no samples exist.
    pub fn mean_or(&self, default: f64) -> f64 {
        if self.is_empty() {
            default
        } else {
            self.mean
        }
    }
}
