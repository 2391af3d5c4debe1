//! Subject tier classification
//!
//! Subjects are grouped into tiers by size so that tasks without an explicit
//! execution limit inherit a sensible one. Thresholds and per-tier timeouts
//! live in `TieredTimeoutConfig`.

use serde::{Deserialize, Serialize};

/// Processing tier based on subject size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectTier {
    /// Small subjects (<10MB by default)
    Fast,
    /// Medium subjects (10-100MB by default)
    Medium,
    /// Large subjects
    Heavy,
}

impl std::fmt::Display for SubjectTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectTier::Fast => write!(f, "fast"),
            SubjectTier::Medium => write!(f, "medium"),
            SubjectTier::Heavy => write!(f, "heavy"),
        }
    }
}
