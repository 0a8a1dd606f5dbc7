//! Serialized view state
//!
//! One snapshot per library view. The `kind` tag says how the item list was
//! encoded; the cursor fields are shared by all kinds:
//!
//! ```json
//! {"version":2,"viewId":"abc","ts":1700000000000,"scrollY":812.0,
//!  "searchTerm":"","startIndex":60,"total":1432,"done":false,
//!  "kind":"compact","items":[{"Id":"1","Name":"Alien","Type":"Movie"}]}
//! ```

use serde::{Deserialize, Serialize};

use crate::models::{CompactItem, Item};
use crate::paging::ViewPagingState;

pub const SNAPSHOT_VERSION: u32 = 2;
pub const KEY_PREFIX: &str = "viewstate_v2:";

pub fn key_for(view_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, view_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Memory,
    Compact,
    Ids,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SnapshotPayload {
    /// Full records, kept in process memory only
    Memory { items: Vec<Item> },
    Compact { items: Vec<CompactItem> },
    /// Identifiers to re-hydrate on restore
    Ids { ids: Vec<String> },
}

impl SnapshotPayload {
    pub fn kind(&self) -> SnapshotKind {
        match self {
            SnapshotPayload::Memory { .. } => SnapshotKind::Memory,
            SnapshotPayload::Compact { .. } => SnapshotKind::Compact,
            SnapshotPayload::Ids { .. } => SnapshotKind::Ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStateSnapshot {
    /// Snapshots written before versioning count as version 1
    #[serde(default = "legacy_version")]
    pub version: u32,
    pub view_id: String,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub scroll_y: f32,
    #[serde(default)]
    pub search_term: String,
    #[serde(default)]
    pub start_index: usize,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub done: bool,
    #[serde(flatten)]
    pub payload: SnapshotPayload,
}

fn legacy_version() -> u32 {
    1
}

impl ViewStateSnapshot {
    fn capture(view_id: &str, state: &ViewPagingState, scroll_y: f32, payload: SnapshotPayload) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            view_id: view_id.to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            scroll_y,
            search_term: state.search_term.clone(),
            start_index: state.start_index,
            total: state.total,
            done: state.done,
            payload,
        }
    }

    pub fn memory(view_id: &str, state: &ViewPagingState, scroll_y: f32) -> Self {
        Self::capture(view_id, state, scroll_y, SnapshotPayload::Memory { items: state.items.clone() })
    }

    pub fn compact(view_id: &str, state: &ViewPagingState, scroll_y: f32) -> Self {
        let items = state.items.iter().map(CompactItem::from).collect();
        Self::capture(view_id, state, scroll_y, SnapshotPayload::Compact { items })
    }

    pub fn ids(view_id: &str, state: &ViewPagingState, scroll_y: f32) -> Self {
        let ids = state.items.iter().map(|i| i.id.clone()).collect();
        Self::capture(view_id, state, scroll_y, SnapshotPayload::Ids { ids })
    }

    pub fn kind(&self) -> SnapshotKind {
        self.payload.kind()
    }

    /// Items usable without a network round trip; empty for `ids`
    pub fn ready_items(&self) -> Vec<Item> {
        match &self.payload {
            SnapshotPayload::Memory { items } => items.clone(),
            SnapshotPayload::Compact { items } => items.iter().cloned().map(Item::from).collect(),
            SnapshotPayload::Ids { .. } => Vec::new(),
        }
    }

    /// Cursor to resume from. A memory snapshot without a cursor resumes
    /// after the items it holds.
    pub fn resume_index(&self) -> usize {
        match &self.payload {
            SnapshotPayload::Memory { items } if self.start_index == 0 => items.len(),
            _ => self.start_index,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a stored snapshot; unreadable, unknown-kind and newer-version
    /// snapshots are all treated as absent.
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Self>(raw) {
            Ok(snapshot) if snapshot.version <= SNAPSHOT_VERSION => Some(snapshot),
            Ok(snapshot) => {
                log::debug!(
                    "Ignoring snapshot for {} with version {}",
                    snapshot.view_id,
                    snapshot.version
                );
                None
            }
            Err(e) => {
                log::debug!("Ignoring unreadable snapshot: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;

    fn state() -> ViewPagingState {
        let mut state = ViewPagingState::new("lib", 20);
        state.items = vec![
            Item::new("1", "Alien", ItemKind::Movie),
            Item::new("2", "Heat", ItemKind::Movie),
        ];
        state.start_index = 2;
        state.total = 9;
        state.search_term = "a".into();
        state
    }

    #[test]
    fn test_compact_layout() {
        let snap = ViewStateSnapshot::compact("lib", &state(), 120.0);
        let value: serde_json::Value = serde_json::from_str(&snap.encode().unwrap()).unwrap();
        assert_eq!(value["kind"], "compact");
        assert_eq!(value["version"], 2);
        assert_eq!(value["viewId"], "lib");
        assert_eq!(value["scrollY"], 120.0);
        assert_eq!(value["startIndex"], 2);
        assert_eq!(value["items"][0]["Id"], "1");
        assert_eq!(value["items"][1]["Type"], "Movie");
    }

    #[test]
    fn test_ids_round_trip() {
        let snap = ViewStateSnapshot::ids("lib", &state(), 0.0);
        let back = ViewStateSnapshot::decode(&snap.encode().unwrap()).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.payload, SnapshotPayload::Ids { ids: vec!["1".into(), "2".into()] });
    }

    #[test]
    fn test_newer_version_is_a_miss() {
        let raw = r#"{"version":3,"viewId":"lib","kind":"ids","ids":[]}"#;
        assert!(ViewStateSnapshot::decode(raw).is_none());
    }

    #[test]
    fn test_unknown_kind_is_a_miss() {
        let raw = r#"{"version":2,"viewId":"lib","kind":"delta","ops":[]}"#;
        assert!(ViewStateSnapshot::decode(raw).is_none());
        assert!(ViewStateSnapshot::decode("not json").is_none());
    }

    #[test]
    fn test_unversioned_snapshot_is_accepted() {
        let raw = r#"{"viewId":"lib","kind":"ids","ids":["a"],"startIndex":1,"done":true}"#;
        let snap = ViewStateSnapshot::decode(raw).unwrap();
        assert_eq!(snap.version, 1);
        assert!(snap.done);
        assert_eq!(snap.kind(), SnapshotKind::Ids);
    }

    #[test]
    fn test_memory_resume_index_falls_back_to_len() {
        let mut s = state();
        s.start_index = 0;
        let snap = ViewStateSnapshot::memory("lib", &s, 0.0);
        assert_eq!(snap.resume_index(), 2);
    }
}
