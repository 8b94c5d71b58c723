//! Wire-facing records for the grouping endpoints.
//!
//! Field names follow the upstream JSON (camelCase) via serde renames. The
//! structs stay dumb on purpose: all derivation (scoring, selection
//! seeding) lives with the store, so a record decodes the same way no
//! matter which layer asked for it.

use serde::{Deserialize, Serialize};

use crate::ids::{EventId, HashId, IssueId};

/// The server's issue representation, opaque beyond its id.
///
/// Candidate rows carry fields this core never interprets (title, culprit,
/// event counts); they ride along untyped so the embedding UI can render
/// them without this crate chasing the server's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRef {
    pub id: IssueId,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl IssueRef {
    /// Reference with no fields beyond the id; mostly useful in tests.
    #[must_use]
    pub fn from_id(id: IssueId) -> Self {
        Self {
            id,
            fields: serde_json::Map::new(),
        }
    }
}

/// Pointer to the most recent event recorded for a merged hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestEvent {
    #[serde(rename = "eventID")]
    pub event_id: EventId,
}

/// Server-side lifecycle state of a merged hash.
///
/// `Locked` marks a hash already claimed by a server-side grouping task; it
/// stays untouchable until the next fetch epoch. Unknown values decode as
/// `Unlocked` so a new server state cannot fail a whole fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashState {
    Locked,
    // serde requires the fallback variant to come last.
    #[default]
    #[serde(other)]
    Unlocked,
}

impl HashState {
    #[must_use]
    pub const fn is_locked(self) -> bool {
        matches!(self, Self::Locked)
    }
}

/// One event-hash group currently merged into the primary issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedHash {
    pub id: HashId,
    #[serde(default)]
    pub latest_event: Option<LatestEvent>,
    #[serde(default)]
    pub state: HashState,
}

impl MergedHash {
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.state.is_locked()
    }
}

/// Which collection a read populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
    Similar,
    Merged,
}

impl FetchKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Similar => "similar",
            Self::Merged => "merged",
        }
    }
}

/// One read the store should issue: which collection, from which endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub data_key: FetchKind,
    pub endpoint: String,
}

impl FetchRequest {
    #[must_use]
    pub fn new(data_key: FetchKind, endpoint: impl Into<String>) -> Self {
        Self {
            data_key,
            endpoint: endpoint.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_hash_decodes_full_record() {
        let json = serde_json::json!({
            "latestEvent": { "eventID": "event-1" },
            "state": "locked",
            "id": "1"
        });
        let hash: MergedHash = serde_json::from_value(json).unwrap();
        assert_eq!(hash.id, HashId::new("1"));
        assert!(hash.is_locked());
        // Checked last: unwrap consumes the option.
        assert_eq!(hash.latest_event.unwrap().event_id, EventId::new("event-1"));
    }

    #[test]
    fn merged_hash_defaults_missing_fields() {
        let hash: MergedHash = serde_json::from_value(serde_json::json!({ "id": "2" })).unwrap();
        assert!(hash.latest_event.is_none());
        assert_eq!(hash.state, HashState::Unlocked);
    }

    #[test]
    fn hash_state_keeps_lowercase_wire_names() {
        assert_eq!(serde_json::to_value(HashState::Locked).unwrap(), "locked");
        assert_eq!(serde_json::to_value(HashState::Unlocked).unwrap(), "unlocked");
        let state: HashState = serde_json::from_value(serde_json::json!("locked")).unwrap();
        assert!(state.is_locked());
    }

    #[test]
    fn unknown_hash_state_decodes_as_unlocked() {
        let hash: MergedHash = serde_json::from_value(serde_json::json!({
            "id": "3",
            "state": "quarantined"
        }))
        .unwrap();
        assert!(!hash.is_locked());
    }

    #[test]
    fn issue_ref_keeps_uninterpreted_fields() {
        let json = serde_json::json!({
            "id": "274",
            "title": "ZeroDivisionError",
            "count": 17
        });
        let issue: IssueRef = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(issue.id, IssueId::new("274"));
        assert_eq!(issue.fields["title"], "ZeroDivisionError");
        assert_eq!(serde_json::to_value(&issue).unwrap(), json);
    }

    #[test]
    fn fetch_request_decodes_camel_case() {
        let request: FetchRequest = serde_json::from_value(serde_json::json!({
            "endpoint": "/issues/groupId/similar/",
            "dataKey": "similar"
        }))
        .unwrap();
        assert_eq!(request.data_key, FetchKind::Similar);
        assert_eq!(request.endpoint, "/issues/groupId/similar/");
    }
}
