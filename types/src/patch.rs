//! Patch payloads published to store subscribers.
//!
//! Subscribers receive partial updates, not snapshots: each variant carries
//! exactly the fields its operation can change, and a consumer merges
//! patches into its own copy of the state. Toggle and `*Started` variants
//! are intent, published synchronously before any request is in flight;
//! `*Settled` variants are the single settlement for an operation's
//! outcome, success and failure alike.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{HashId, IssueId};
use crate::records::MergedHash;
use crate::scoring::SimilarIssue;
use crate::selection::CheckboxState;

/// Fetch-cycle fields: everything a fetch resets and repopulates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FetchState {
    pub loading: bool,
    pub error: bool,
    pub similar_items: Vec<SimilarIssue>,
    pub filtered_similar_items: Vec<SimilarIssue>,
    pub similar_links: String,
    pub merged_items: Vec<MergedHash>,
    pub merged_links: String,
    pub merge_state: BTreeMap<IssueId, CheckboxState>,
    pub unmerge_state: BTreeMap<HashId, CheckboxState>,
}

/// Merge-domain selection fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeSelection {
    /// Whether submission should be blocked: empty selection on a toggle,
    /// or a merge currently in flight.
    pub merge_disabled: bool,
    pub merge_list: BTreeSet<IssueId>,
    pub merge_state: BTreeMap<IssueId, CheckboxState>,
}

/// Unmerge-domain selection fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnmergeSelection {
    /// Whether submission should be blocked: empty selection on a toggle,
    /// or an unmerge currently in flight.
    pub unmerge_disabled: bool,
    pub unmerge_list: BTreeSet<HashId>,
    pub unmerge_state: BTreeMap<HashId, CheckboxState>,
}

/// One notification per logical store change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorePatch {
    /// A fetch began; collections and selection are reset, `loading` is on.
    FetchStarted(FetchState),
    /// Every read of the fetch settled; collections reflect the results.
    FetchSettled(FetchState),
    /// A merge checkbox flipped.
    MergeToggled(MergeSelection),
    /// A merge request is about to go out; its snapshot is busy.
    MergeStarted(MergeSelection),
    /// The merge request resolved, successfully or not.
    MergeSettled(MergeSelection),
    /// An unmerge checkbox flipped.
    UnmergeToggled(UnmergeSelection),
    /// An unmerge request is about to go out; its snapshot is busy.
    UnmergeStarted(UnmergeSelection),
    /// The unmerge request resolved, successfully or not.
    UnmergeSettled(UnmergeSelection),
}
