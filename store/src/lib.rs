//! Grouping selection state machine for Regroup.
//!
//! This crate is the coordination core of the duplicate-issue workflow,
//! with no view dependencies: it owns the fetched collections, the
//! checkbox selection for both grouping domains, and the publish side of
//! the subscriber contract.
//!
//! # Architecture
//!
//! [`GroupingStore`] is a single-owner state machine. Every entry point
//! takes `&mut self`, mutates synchronously, and publishes typed
//! [`StorePatch`] values to subscribers; async work is confined to the
//! network requests themselves, and their outcomes are applied by the same
//! entry point that issued them. Nothing changes behind the owner's back,
//! so there is no locking anywhere in this crate.
//!
//! The two domains carry different invariants:
//!
//! - **Merge** (similar issues): free toggling. Merging candidates into the
//!   primary issue never empties anything, so any candidate may be selected
//!   at any time.
//! - **Unmerge** (hashes): server-locked records are untouchable for the
//!   fetch epoch, and the derived last-remaining-hash guard refuses the
//!   selection that would empty the group.
//!
//! A mutation marks its checked snapshot busy while the request is in
//! flight. The single settlement patch then either clears the selection
//! (success) or restores it to re-submittable (failure); a settlement never
//! leaves a row busy.

use std::collections::{BTreeMap, BTreeSet};

use futures_util::future;
use tokio::sync::mpsc;

use regroup_client::{ClientError, GroupingClient, MergeRequest, Page};
use regroup_types::{
    CheckboxState, FetchKind, FetchRequest, FetchState, GroupId, HashId, IssueId, IssueRef,
    MergeSelection, MergedHash, ScoringConfig, SimilarIssue, SimilarityScores, StorePatch,
    UnmergeSelection,
};

// ============================================================================
// Operation contexts
// ============================================================================

/// Routing context for the merge mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeContext {
    pub org_id: String,
    pub project_id: String,
    /// The primary issue; always merged alongside the checked candidates.
    pub group_id: GroupId,
    /// Issue-search filter forwarded verbatim with the mutation.
    pub query: Option<String>,
}

impl MergeContext {
    #[must_use]
    pub fn new(
        org_id: impl Into<String>,
        project_id: impl Into<String>,
        group_id: GroupId,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            project_id: project_id.into(),
            group_id,
            query: None,
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Routing context for the unmerge mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmergeContext {
    /// The issue whose hashes are being split back out.
    pub group_id: GroupId,
}

impl UnmergeContext {
    #[must_use]
    pub fn new(group_id: GroupId) -> Self {
        Self { group_id }
    }
}

// ============================================================================
// GroupingStore
// ============================================================================

/// Outcome of one read within a fetch, tagged with its collection.
enum ReadOutcome {
    Similar(Result<Page<Vec<(IssueRef, SimilarityScores)>>, ClientError>),
    Merged(Result<Page<Vec<MergedHash>>, ClientError>),
}

/// Client-side coordinator for the issue-grouping workflow.
///
/// One instance per primary issue under review. A fresh
/// [`fetch`](Self::fetch) replaces the wire collections wholesale and
/// starts a new selection epoch; everything else mutates in place and
/// notifies subscribers with partial patches.
#[derive(Debug)]
pub struct GroupingStore {
    client: GroupingClient,
    scoring: ScoringConfig,

    loading: bool,
    error: bool,

    similar_items: Vec<SimilarIssue>,
    filtered_similar_items: Vec<SimilarIssue>,
    similar_links: String,

    merged_items: Vec<MergedHash>,
    merged_links: String,

    merge_state: BTreeMap<IssueId, CheckboxState>,
    merge_list: BTreeSet<IssueId>,

    unmerge_state: BTreeMap<HashId, CheckboxState>,
    unmerge_list: BTreeSet<HashId>,
    remaining_item: Option<MergedHash>,

    remembered: Vec<FetchRequest>,
    subscribers: Vec<mpsc::UnboundedSender<StorePatch>>,
}

impl GroupingStore {
    /// Build a store over `client` with the default scoring configuration.
    #[must_use]
    pub fn new(client: GroupingClient) -> Self {
        Self {
            client,
            scoring: ScoringConfig::default(),
            loading: false,
            error: false,
            similar_items: Vec::new(),
            filtered_similar_items: Vec::new(),
            similar_links: String::new(),
            merged_items: Vec::new(),
            merged_links: String::new(),
            merge_state: BTreeMap::new(),
            merge_list: BTreeSet::new(),
            unmerge_state: BTreeMap::new(),
            unmerge_list: BTreeSet::new(),
            remaining_item: None,
            remembered: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Replace the scoring configuration (weights and threshold).
    #[must_use]
    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    /// Subscribe to state-change patches.
    ///
    /// Dropping the receiver unsubscribes; closed channels are pruned on
    /// the next publish, so an abandoned subscriber costs one failed send.
    #[must_use]
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StorePatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, patch: &StorePatch) {
        self.subscribers.retain(|tx| tx.send(patch.clone()).is_ok());
    }

    // ========================================================================
    // Read access
    // ========================================================================

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Candidates that cleared the similarity threshold, in server order.
    #[must_use]
    pub fn similar_items(&self) -> &[SimilarIssue] {
        &self.similar_items
    }

    /// Candidates below the similarity threshold, in server order.
    #[must_use]
    pub fn filtered_similar_items(&self) -> &[SimilarIssue] {
        &self.filtered_similar_items
    }

    /// Raw `Link` header of the last similar read; empty when absent.
    #[must_use]
    pub fn similar_links(&self) -> &str {
        &self.similar_links
    }

    /// Merged hash records, in server order.
    #[must_use]
    pub fn merged_items(&self) -> &[MergedHash] {
        &self.merged_items
    }

    /// Raw `Link` header of the last hashes read; empty when absent.
    #[must_use]
    pub fn merged_links(&self) -> &str {
        &self.merged_links
    }

    #[must_use]
    pub fn merge_state(&self) -> &BTreeMap<IssueId, CheckboxState> {
        &self.merge_state
    }

    #[must_use]
    pub fn merge_list(&self) -> &BTreeSet<IssueId> {
        &self.merge_list
    }

    #[must_use]
    pub fn unmerge_state(&self) -> &BTreeMap<HashId, CheckboxState> {
        &self.unmerge_state
    }

    #[must_use]
    pub fn unmerge_list(&self) -> &BTreeSet<HashId> {
        &self.unmerge_list
    }

    /// The hash protected by the last-remaining-hash guard, if any.
    #[must_use]
    pub fn remaining_item(&self) -> Option<&MergedHash> {
        self.remaining_item.as_ref()
    }

    /// The scoring configuration classification currently runs under.
    #[must_use]
    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    // ========================================================================
    // Fetch & classification
    // ========================================================================

    /// Issue every read in `requests` concurrently and repopulate the wire
    /// collections from the results.
    ///
    /// Publishes [`StorePatch::FetchStarted`] synchronously with everything
    /// reset and `loading` on, then exactly one
    /// [`StorePatch::FetchSettled`] once all reads have settled. A failed
    /// read leaves its collection empty and flips the error flag; it does
    /// not cancel the other read. A non-empty `requests` slice is
    /// remembered for [`refetch`](Self::refetch).
    pub async fn fetch(&mut self, requests: &[FetchRequest]) {
        if !requests.is_empty() {
            self.remembered = requests.to_vec();
        }
        self.run_fetch(requests).await;
    }

    /// Re-issue the most recently remembered fetch.
    ///
    /// A no-request fetch cycle (reset, then immediate settle) when nothing
    /// has been remembered yet.
    pub async fn refetch(&mut self) {
        let requests = self.remembered.clone();
        self.run_fetch(&requests).await;
    }

    async fn run_fetch(&mut self, requests: &[FetchRequest]) {
        self.reset_fetch_state();
        let patch = StorePatch::FetchStarted(self.fetch_state());
        self.publish(&patch);

        let client = &self.client;
        let reads = requests.iter().map(|request| async move {
            let outcome = match request.data_key {
                FetchKind::Similar => ReadOutcome::Similar(client.similar(&request.endpoint).await),
                FetchKind::Merged => ReadOutcome::Merged(client.hashes(&request.endpoint).await),
            };
            (request, outcome)
        });
        let settled = future::join_all(reads).await;

        for (request, outcome) in settled {
            match outcome {
                ReadOutcome::Similar(Ok(page)) => self.apply_similar(page),
                ReadOutcome::Merged(Ok(page)) => self.apply_merged(page),
                ReadOutcome::Similar(Err(err)) | ReadOutcome::Merged(Err(err)) => {
                    tracing::warn!(
                        %err,
                        endpoint = %request.endpoint,
                        data_key = request.data_key.as_str(),
                        "grouping read failed"
                    );
                    self.error = true;
                }
            }
        }

        self.loading = false;
        tracing::debug!(
            similar = self.similar_items.len(),
            filtered = self.filtered_similar_items.len(),
            merged = self.merged_items.len(),
            error = self.error,
            "fetch settled"
        );
        let patch = StorePatch::FetchSettled(self.fetch_state());
        self.publish(&patch);
    }

    fn reset_fetch_state(&mut self) {
        self.loading = true;
        self.error = false;
        self.similar_items.clear();
        self.filtered_similar_items.clear();
        self.similar_links.clear();
        self.merged_items.clear();
        self.merged_links.clear();
        self.merge_state.clear();
        self.merge_list.clear();
        self.unmerge_state.clear();
        self.unmerge_list.clear();
        self.remaining_item = None;
    }

    fn fetch_state(&self) -> FetchState {
        FetchState {
            loading: self.loading,
            error: self.error,
            similar_items: self.similar_items.clone(),
            filtered_similar_items: self.filtered_similar_items.clone(),
            similar_links: self.similar_links.clone(),
            merged_items: self.merged_items.clone(),
            merged_links: self.merged_links.clone(),
            merge_state: self.merge_state.clone(),
            unmerge_state: self.unmerge_state.clone(),
        }
    }

    /// Classify each scored pair against the threshold and split the
    /// candidates into the similar and filtered collections.
    fn apply_similar(&mut self, page: Page<Vec<(IssueRef, SimilarityScores)>>) {
        self.similar_links = page.links;
        for (issue, scores) in page.body {
            let item = SimilarIssue::classify(issue, scores, &self.scoring);
            if item.below_threshold {
                self.filtered_similar_items.push(item);
            } else {
                self.similar_items.push(item);
            }
        }
    }

    /// Store the hash records and seed their selection entries; locked
    /// records start busy.
    fn apply_merged(&mut self, page: Page<Vec<MergedHash>>) {
        self.merged_links = page.links;
        for hash in &page.body {
            self.unmerge_state
                .insert(hash.id.clone(), CheckboxState::seeded(hash.is_locked()));
        }
        self.merged_items = page.body;
    }

    // ========================================================================
    // Merge domain (similar issues)
    // ========================================================================

    /// Flip the merge checkbox for `id` and publish the updated selection.
    ///
    /// There is no locking in this domain, so any candidate may be toggled
    /// at any time; submission during an in-flight merge is gated by the
    /// published `merge_disabled` flag instead.
    pub fn toggle_merge(&mut self, id: &IssueId) {
        let entry = self.merge_state.entry(id.clone()).or_default();
        entry.checked = !entry.checked;
        let checked = entry.checked;
        if checked {
            self.merge_list.insert(id.clone());
        } else {
            self.merge_list.remove(id);
        }
        let patch = self.merge_selection(self.merge_list.is_empty());
        self.publish(&StorePatch::MergeToggled(patch));
    }

    /// Merge every currently-checked candidate into `ctx.group_id`.
    ///
    /// The checked snapshot is marked busy and a
    /// [`StorePatch::MergeStarted`] goes out before the request does.
    /// Exactly one [`StorePatch::MergeSettled`] follows: on success the
    /// snapshot's selection is cleared, on failure only `busy` is cleared
    /// so the same selection can be re-submitted. Candidates toggled while
    /// the request was in flight are left alone either way.
    pub async fn merge(&mut self, ctx: &MergeContext) {
        let snapshot: Vec<IssueId> = self.merge_list.iter().cloned().collect();
        for id in &snapshot {
            if let Some(entry) = self.merge_state.get_mut(id) {
                entry.busy = true;
            }
        }
        let patch = self.merge_selection(true);
        self.publish(&StorePatch::MergeStarted(patch));

        let mut item_ids: Vec<String> =
            snapshot.iter().map(|id| id.as_str().to_owned()).collect();
        item_ids.push(ctx.group_id.as_str().to_owned());
        let request = MergeRequest {
            org_id: ctx.org_id.clone(),
            project_id: ctx.project_id.clone(),
            item_ids,
            query: ctx.query.clone(),
        };

        let outcome = self.client.merge_issues(&request).await;
        match outcome {
            Ok(()) => {
                for id in &snapshot {
                    if let Some(entry) = self.merge_state.get_mut(id) {
                        entry.checked = false;
                        entry.busy = false;
                    }
                    self.merge_list.remove(id);
                }
                tracing::debug!(items = snapshot.len(), group = %ctx.group_id, "merge settled");
            }
            Err(err) => {
                for id in &snapshot {
                    if let Some(entry) = self.merge_state.get_mut(id) {
                        entry.busy = false;
                    }
                }
                tracing::warn!(%err, group = %ctx.group_id, "merge failed; selection preserved");
            }
        }

        let patch = self.merge_selection(false);
        self.publish(&StorePatch::MergeSettled(patch));
    }

    fn merge_selection(&self, merge_disabled: bool) -> MergeSelection {
        MergeSelection {
            merge_disabled,
            merge_list: self.merge_list.clone(),
            merge_state: self.merge_state.clone(),
        }
    }

    // ========================================================================
    // Unmerge domain (hashes)
    // ========================================================================

    /// Flip the unmerge checkbox for `id` and publish the updated selection.
    ///
    /// Silent no-op when the record is server-locked or when `id` is the
    /// current remaining item: both refusals leave the store untouched and
    /// publish nothing.
    pub fn toggle_unmerge(&mut self, id: &HashId) {
        let locked = self
            .merged_items
            .iter()
            .any(|hash| hash.id == *id && hash.is_locked());
        let guarded = self
            .unmerge_state
            .get(id)
            .is_some_and(|entry| entry.disabled);
        if locked || guarded {
            return;
        }

        let entry = self.unmerge_state.entry(id.clone()).or_default();
        entry.checked = !entry.checked;
        let checked = entry.checked;
        if checked {
            self.unmerge_list.insert(id.clone());
        } else {
            self.unmerge_list.remove(id);
        }

        self.recompute_remaining();

        let patch = self.unmerge_selection(self.unmerge_list.is_empty());
        self.publish(&StorePatch::UnmergeToggled(patch));
    }

    /// Split every currently-checked hash out of `ctx.group_id`.
    ///
    /// Same optimistic protocol as [`merge`](Self::merge): busy snapshot
    /// plus [`StorePatch::UnmergeStarted`] up front, one
    /// [`StorePatch::UnmergeSettled`] on resolution, selection preserved on
    /// failure. The remaining-item guard is not recomputed here; it depends
    /// only on checked and locked state, which settlement of a failure
    /// leaves untouched.
    pub async fn unmerge(&mut self, ctx: &UnmergeContext) {
        let snapshot: Vec<HashId> = self.unmerge_list.iter().cloned().collect();
        for id in &snapshot {
            if let Some(entry) = self.unmerge_state.get_mut(id) {
                entry.busy = true;
            }
        }
        let patch = self.unmerge_selection(true);
        self.publish(&StorePatch::UnmergeStarted(patch));

        let outcome = self.client.unmerge_hashes(&ctx.group_id, &snapshot).await;
        match outcome {
            Ok(()) => {
                for id in &snapshot {
                    if let Some(entry) = self.unmerge_state.get_mut(id) {
                        entry.checked = false;
                        entry.busy = false;
                    }
                    self.unmerge_list.remove(id);
                }
                tracing::debug!(hashes = snapshot.len(), group = %ctx.group_id, "unmerge settled");
            }
            Err(err) => {
                for id in &snapshot {
                    if let Some(entry) = self.unmerge_state.get_mut(id) {
                        entry.busy = false;
                    }
                }
                tracing::warn!(%err, group = %ctx.group_id, "unmerge failed; selection preserved");
            }
        }

        let patch = self.unmerge_selection(false);
        self.publish(&StorePatch::UnmergeSettled(patch));
    }

    /// Recompute the derived last-remaining-hash guard.
    ///
    /// Among unlocked records, when exactly one is left unchecked it must
    /// stay that way: checking it would queue every remaining hash for
    /// removal and empty the group. That record is flagged `disabled` and
    /// surfaced as the remaining item. Any other count clears the guard.
    fn recompute_remaining(&mut self) {
        let unchecked: Vec<&MergedHash> = self
            .merged_items
            .iter()
            .filter(|hash| !hash.is_locked())
            .filter(|hash| {
                !self
                    .unmerge_state
                    .get(&hash.id)
                    .is_some_and(|entry| entry.checked)
            })
            .collect();

        if let [last] = unchecked.as_slice() {
            let last = (*last).clone();
            self.unmerge_state.entry(last.id.clone()).or_default().disabled = true;
            self.remaining_item = Some(last);
        } else {
            for entry in self.unmerge_state.values_mut() {
                entry.disabled = false;
            }
            self.remaining_item = None;
        }
    }

    fn unmerge_selection(&self, unmerge_disabled: bool) -> UnmergeSelection {
        UnmergeSelection {
            unmerge_disabled,
            unmerge_list: self.unmerge_list.clone(),
            unmerge_state: self.unmerge_state.clone(),
        }
    }
}
