//! End-to-end store flows against a mock grouping service: fetch and
//! classification, merge and unmerge settlement, and the patch sequences
//! subscribers observe along the way.

use regroup_client::GroupingClient;
use regroup_store::{GroupingStore, MergeContext, UnmergeContext};
use regroup_types::{
    CheckboxState, FetchKind, FetchRequest, GroupId, HashId, IssueId, StorePatch,
};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn similar_body() -> serde_json::Value {
    json!([
        [
            { "id": "274" },
            {
                "exception:stacktrace:pairs": 0.375,
                "exception:stacktrace:application-chunks": 0.175,
                "message:message:character-shingles": 0.775
            }
        ],
        [
            { "id": "275" },
            { "exception:stacktrace:pairs": 1.0 }
        ],
        [
            { "id": "216" },
            {
                "exception:stacktrace:application-chunks": 0.000_235,
                "exception:stacktrace:pairs": 0.001_488
            }
        ]
    ])
}

fn hashes_body() -> serde_json::Value {
    json!([
        { "latestEvent": { "eventID": "event-1" }, "state": "locked", "id": "1" },
        { "latestEvent": { "eventID": "event-2" }, "state": "unlocked", "id": "2" },
        { "latestEvent": { "eventID": "event-3" }, "state": "unlocked", "id": "3" },
        { "latestEvent": { "eventID": "event-4" }, "state": "unlocked", "id": "4" },
        { "latestEvent": { "eventID": "event-5" }, "state": "locked", "id": "5" }
    ])
}

fn similar_request() -> FetchRequest {
    FetchRequest::new(FetchKind::Similar, "/issues/groupId/similar/")
}

fn merged_request() -> FetchRequest {
    FetchRequest::new(FetchKind::Merged, "/issues/groupId/hashes/")
}

async fn mount_similar(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/issues/groupId/similar/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(similar_body())
                .insert_header("Link", "<http://127.0.0.1/similar/?cursor=0:100:0>; rel=\"next\""),
        )
        .mount(server)
        .await;
}

async fn mount_hashes(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/issues/groupId/hashes/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hashes_body()))
        .mount(server)
        .await;
}

fn drain(rx: &mut mpsc::UnboundedReceiver<StorePatch>) -> Vec<StorePatch> {
    let mut patches = Vec::new();
    while let Ok(patch) = rx.try_recv() {
        patches.push(patch);
    }
    patches
}

fn merge_ctx() -> MergeContext {
    MergeContext::new("orgId", "projectId", GroupId::new("groupId"))
}

#[tokio::test]
async fn empty_fetch_publishes_reset_then_settled() {
    let server = MockServer::start().await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));
    let mut rx = store.subscribe();

    store.fetch(&[]).await;

    let patches = drain(&mut rx);
    assert_eq!(patches.len(), 2);
    match &patches[0] {
        StorePatch::FetchStarted(state) => {
            assert!(state.loading);
            assert!(!state.error);
            assert!(state.similar_items.is_empty());
            assert!(state.merged_items.is_empty());
            assert_eq!(state.similar_links, "");
            assert_eq!(state.merged_links, "");
            assert!(state.merge_state.is_empty());
            assert!(state.unmerge_state.is_empty());
        }
        other => panic!("expected FetchStarted, got {other:?}"),
    }
    match &patches[1] {
        StorePatch::FetchSettled(state) => {
            assert!(!state.loading);
            assert!(!state.error);
        }
        other => panic!("expected FetchSettled, got {other:?}"),
    }
    assert!(!store.is_loading());
}

#[tokio::test]
async fn fetch_classifies_candidates_against_threshold() {
    let server = MockServer::start().await;
    mount_similar(&server).await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));

    store.fetch(&[similar_request()]).await;

    let similar: Vec<&str> = store
        .similar_items()
        .iter()
        .map(|item| item.issue.id.as_str())
        .collect();
    let filtered: Vec<&str> = store
        .filtered_similar_items()
        .iter()
        .map(|item| item.issue.id.as_str())
        .collect();
    assert_eq!(similar, ["274", "275"]);
    assert_eq!(filtered, ["216"]);
    assert!(store.similar_items().iter().all(|item| !item.below_threshold));
    assert!(store.filtered_similar_items()[0].below_threshold);
    assert!(store.similar_links().contains("rel=\"next\""));
    assert!(!store.has_error());
    assert!(!store.is_loading());
}

#[tokio::test]
async fn fetch_seeds_unmerge_state_from_hash_records() {
    let server = MockServer::start().await;
    mount_hashes(&server).await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));

    store.fetch(&[merged_request()]).await;

    assert_eq!(store.merged_items().len(), 5);
    assert_eq!(store.unmerge_state().len(), 5);
    for (id, entry) in store.unmerge_state() {
        let expect_busy = id.as_str() == "1" || id.as_str() == "5";
        assert_eq!(entry.busy, expect_busy, "hash {id}");
        assert!(!entry.checked);
        assert!(!entry.disabled);
    }
    assert!(store.unmerge_list().is_empty());
}

#[tokio::test]
async fn both_reads_populate_in_one_fetch() {
    let server = MockServer::start().await;
    mount_similar(&server).await;
    mount_hashes(&server).await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));
    let mut rx = store.subscribe();

    store.fetch(&[similar_request(), merged_request()]).await;

    assert_eq!(store.similar_items().len(), 2);
    assert_eq!(store.merged_items().len(), 5);
    let patches = drain(&mut rx);
    assert_eq!(patches.len(), 2, "one started and one settled patch");
    match &patches[1] {
        StorePatch::FetchSettled(state) => {
            assert_eq!(state.similar_items.len(), 2);
            assert_eq!(state.merged_items.len(), 5);
            assert!(!state.error);
        }
        other => panic!("expected FetchSettled, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_read_flags_error_and_keeps_the_other_domain() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues/groupId/similar/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_hashes(&server).await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));
    let mut rx = store.subscribe();

    store.fetch(&[similar_request(), merged_request()]).await;

    assert!(store.has_error());
    assert!(!store.is_loading());
    assert!(store.similar_items().is_empty());
    assert_eq!(store.merged_items().len(), 5);

    let patches = drain(&mut rx);
    match patches.last() {
        Some(StorePatch::FetchSettled(state)) => {
            assert!(state.error);
            assert!(!state.loading);
            assert_eq!(state.merged_items.len(), 5);
        }
        other => panic!("expected FetchSettled, got {other:?}"),
    }
}

#[tokio::test]
async fn merge_success_clears_the_selection() {
    let server = MockServer::start().await;
    mount_similar(&server).await;
    Mock::given(method("PUT"))
        .and(path("/projects/orgId/projectId/issues/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "merge": { "parent": "groupId" } })),
        )
        .expect(1)
        .mount(&server)
        .await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));
    store.fetch(&[similar_request()]).await;

    let id = IssueId::new("274");
    store.toggle_merge(&id);
    let mut rx = store.subscribe();
    store.merge(&merge_ctx()).await;

    let patches = drain(&mut rx);
    assert_eq!(patches.len(), 2);
    match &patches[0] {
        StorePatch::MergeStarted(selection) => {
            assert!(selection.merge_disabled);
            assert!(selection.merge_state[&id].busy);
            assert!(selection.merge_state[&id].checked);
        }
        other => panic!("expected MergeStarted, got {other:?}"),
    }
    match &patches[1] {
        StorePatch::MergeSettled(selection) => {
            assert!(!selection.merge_disabled);
            assert!(selection.merge_list.is_empty());
            assert_eq!(selection.merge_state[&id], CheckboxState::default());
        }
        other => panic!("expected MergeSettled, got {other:?}"),
    }
    assert!(store.merge_list().is_empty());
}

#[tokio::test]
async fn merge_failure_preserves_the_selection() {
    let server = MockServer::start().await;
    mount_similar(&server).await;
    Mock::given(method("PUT"))
        .and(path("/projects/orgId/projectId/issues/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));
    store.fetch(&[similar_request()]).await;

    let id = IssueId::new("274");
    store.toggle_merge(&id);
    let mut rx = store.subscribe();
    store.merge(&merge_ctx()).await;

    let patches = drain(&mut rx);
    match patches.last() {
        Some(StorePatch::MergeSettled(selection)) => {
            assert!(!selection.merge_disabled, "failure must re-enable submission");
            assert!(selection.merge_list.contains(&id));
            assert_eq!(
                selection.merge_state[&id],
                CheckboxState {
                    checked: true,
                    busy: false,
                    disabled: false
                }
            );
        }
        other => panic!("expected MergeSettled, got {other:?}"),
    }
    assert!(store.merge_list().contains(&id));
}

#[tokio::test]
async fn unmerge_success_clears_the_selection() {
    let server = MockServer::start().await;
    mount_hashes(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/issues/groupId/hashes/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));
    store.fetch(&[merged_request()]).await;

    let id = HashId::new("3");
    store.toggle_unmerge(&id);
    let mut rx = store.subscribe();
    store.unmerge(&UnmergeContext::new(GroupId::new("groupId"))).await;

    let patches = drain(&mut rx);
    assert_eq!(patches.len(), 2);
    match &patches[0] {
        StorePatch::UnmergeStarted(selection) => {
            assert!(selection.unmerge_disabled);
            assert!(selection.unmerge_state[&id].busy);
        }
        other => panic!("expected UnmergeStarted, got {other:?}"),
    }
    match &patches[1] {
        StorePatch::UnmergeSettled(selection) => {
            assert!(!selection.unmerge_disabled);
            assert!(selection.unmerge_list.is_empty());
            assert_eq!(selection.unmerge_state[&id], CheckboxState::default());
        }
        other => panic!("expected UnmergeSettled, got {other:?}"),
    }
    assert!(store.unmerge_list().is_empty());
}

#[tokio::test]
async fn unmerge_failure_preserves_selection_and_guard() {
    let server = MockServer::start().await;
    mount_hashes(&server).await;
    Mock::given(method("DELETE"))
        .and(path("/issues/groupId/hashes/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));
    store.fetch(&[merged_request()]).await;

    store.toggle_unmerge(&HashId::new("3"));
    store.toggle_unmerge(&HashId::new("4"));
    assert_eq!(
        store.remaining_item().map(|hash| hash.id.as_str()),
        Some("2")
    );

    store.unmerge(&UnmergeContext::new(GroupId::new("groupId"))).await;

    assert_eq!(store.unmerge_list().len(), 2);
    let entry = store.unmerge_state()[&HashId::new("3")];
    assert!(entry.checked);
    assert!(!entry.busy);
    // Settlement does not touch the derived guard.
    assert!(store.unmerge_state()[&HashId::new("2")].disabled);
    assert_eq!(
        store.remaining_item().map(|hash| hash.id.as_str()),
        Some("2")
    );
}

#[tokio::test]
async fn refetch_reissues_the_remembered_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues/groupId/similar/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(similar_body()))
        .expect(2)
        .mount(&server)
        .await;
    let mut store = GroupingStore::new(GroupingClient::new(server.uri()));

    store.fetch(&[similar_request()]).await;
    // An empty fetch resets state but must not clobber the remembered reads.
    store.fetch(&[]).await;
    assert!(store.similar_items().is_empty());

    store.refetch().await;
    assert_eq!(store.similar_items().len(), 2);
}
