//! Similarity scoring for candidate classification.
//!
//! The server scores each candidate per grouping feature; this module folds
//! those per-feature scores into one aggregate and classifies the candidate
//! against a threshold. Weights and the threshold are configuration: the
//! shipped defaults trust stacktrace evidence most, and one strong weighted
//! signal is enough to clear the bar. Scoring a candidate marked `None` for
//! a feature treats that feature as absent rather than as zero, so the
//! server withholding a score never drags a candidate down.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::records::IssueRef;

/// Per-feature scores as received; `None` where the server hid the score.
pub type SimilarityScores = BTreeMap<String, Option<f64>>;

/// Stacktrace frame-pair similarity.
pub const FEATURE_STACKTRACE_PAIRS: &str = "exception:stacktrace:pairs";
/// Application-code stacktrace chunk similarity.
pub const FEATURE_STACKTRACE_CHUNKS: &str = "exception:stacktrace:application-chunks";
/// Message character-shingle similarity.
pub const FEATURE_MESSAGE_SHINGLES: &str = "message:message:character-shingles";

/// Weight table and threshold for candidate classification.
///
/// Features absent from the weight table contribute nothing to the
/// aggregate, so deploying a new server-side feature is a no-op until a
/// weight is configured for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Multiplicative weight per feature key.
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, f64>,
    /// Aggregate at or above this value classifies a candidate as similar.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            threshold: default_threshold(),
        }
    }
}

fn default_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([
        (FEATURE_STACKTRACE_PAIRS.to_string(), 1.0),
        (FEATURE_MESSAGE_SHINGLES.to_string(), 0.9),
        (FEATURE_STACKTRACE_CHUNKS.to_string(), 0.75),
    ])
}

const fn default_threshold() -> f64 {
    0.5
}

/// Fold per-feature scores into a single aggregate.
///
/// Each feature with a non-null score and a configured weight contributes
/// `weight * score`; the aggregate is the strongest contribution. Returns
/// `None` when nothing contributes, which classifies as below threshold
/// without pretending the candidate scored zero.
#[must_use]
pub fn aggregate_score(scores: &SimilarityScores, config: &ScoringConfig) -> Option<f64> {
    scores
        .iter()
        .filter_map(|(feature, score)| {
            let score = (*score)?;
            let weight = config.weights.get(feature).copied()?;
            Some(weight * score)
        })
        .reduce(f64::max)
}

/// A scored candidate duplicate of the primary issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarIssue {
    pub issue: IssueRef,
    /// Raw per-feature scores, kept for display.
    pub scores: SimilarityScores,
    /// Strongest weighted feature score; `None` when no feature contributed.
    pub aggregate: Option<f64>,
    /// True when the candidate failed to clear the configured threshold.
    pub below_threshold: bool,
}

impl SimilarIssue {
    /// Derive the aggregate and threshold classification for one candidate.
    #[must_use]
    pub fn classify(issue: IssueRef, scores: SimilarityScores, config: &ScoringConfig) -> Self {
        let aggregate = aggregate_score(&scores, config);
        let below_threshold = aggregate.is_none_or(|score| score < config.threshold);
        Self {
            issue,
            scores,
            aggregate,
            below_threshold,
        }
    }
}
