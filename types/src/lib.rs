//! Core domain types for Regroup.
//!
//! Pure data: no IO, no async, no HTTP. Everything here can be depended on
//! from any layer, and the store and client crates communicate exclusively
//! in these types.

mod ids;
mod patch;
mod records;
mod scoring;
mod selection;

pub use ids::{EventId, GroupId, HashId, IssueId};
pub use patch::{FetchState, MergeSelection, StorePatch, UnmergeSelection};
pub use records::{FetchKind, FetchRequest, HashState, IssueRef, LatestEvent, MergedHash};
pub use scoring::{
    FEATURE_MESSAGE_SHINGLES, FEATURE_STACKTRACE_CHUNKS, FEATURE_STACKTRACE_PAIRS, ScoringConfig,
    SimilarIssue, SimilarityScores, aggregate_score,
};
pub use selection::CheckboxState;
