//! Saving and restoring the paging state of library views
//!
//! Every save keeps a full in-memory snapshot for same-run back/forward
//! navigation and writes a durable one to the session store. The durable
//! snapshot is `compact` unless it cannot be encoded or exceeds the character
//! budget, in which case only the ids are written.

use std::collections::HashMap;

use crate::api::ItemSource;
use crate::error::ApiError;
use crate::models::Item;
use crate::paging::ViewPagingState;

use super::session_store::SessionStore;
use super::snapshot::{key_for, SnapshotKind, SnapshotPayload, ViewStateSnapshot, KEY_PREFIX};

/// Callbacks into the view during a restore
pub trait RestoreHooks {
    fn build_view_shell(&mut self);

    fn render_grid(&mut self, state: &ViewPagingState, replace_all: bool);

    fn reattach_sentinel(&mut self);

    fn set_load_indicator(&mut self, visible: bool, label: &str);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RestoreOutcome {
    Miss,
    Restored { kind: SnapshotKind, scroll_y: f32 },
}

/// What a save managed to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    /// `None` when the durable write was skipped or dropped
    pub durable: Option<SnapshotKind>,
}

pub struct ViewPersistence<S> {
    memory: HashMap<String, ViewStateSnapshot>,
    store: S,
    budget_chars: usize,
    hydrate_batch: usize,
}

impl<S: SessionStore> ViewPersistence<S> {
    pub fn new(store: S, budget_chars: usize, hydrate_batch: usize) -> Self {
        Self {
            memory: HashMap::new(),
            store,
            budget_chars,
            hydrate_batch: hydrate_batch.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn hydrate_batch(&self) -> usize {
        self.hydrate_batch
    }

    /// Drop every durable view snapshot
    pub fn clear_durable(&mut self) -> usize {
        self.store.remove_prefixed(KEY_PREFIX)
    }

    pub fn forget_memory(&mut self, view_id: &str) {
        self.memory.remove(view_id);
    }

    pub fn save_view_state(&mut self, view_id: &str, state: &ViewPagingState, scroll_y: f32) -> SaveReport {
        if view_id.is_empty() {
            return SaveReport { durable: None };
        }
        self.memory
            .insert(view_id.to_string(), ViewStateSnapshot::memory(view_id, state, scroll_y));

        let Some((json, kind)) = self.durable_json(view_id, state, scroll_y) else {
            return SaveReport { durable: None };
        };
        if self.write_with_retry(&key_for(view_id), &json) {
            log::debug!("Saved {:?} snapshot for {} ({} chars)", kind, view_id, json.len());
            SaveReport { durable: Some(kind) }
        } else {
            SaveReport { durable: None }
        }
    }

    fn durable_json(&self, view_id: &str, state: &ViewPagingState, scroll_y: f32) -> Option<(String, SnapshotKind)> {
        match ViewStateSnapshot::compact(view_id, state, scroll_y).encode() {
            Ok(json) if json.len() <= self.budget_chars => return Some((json, SnapshotKind::Compact)),
            Ok(json) => log::debug!(
                "Compact snapshot for {} is {} chars, over budget {}; writing ids",
                view_id,
                json.len(),
                self.budget_chars
            ),
            Err(e) => log::debug!("Compact snapshot for {} failed to encode: {}", view_id, e),
        }

        match ViewStateSnapshot::ids(view_id, state, scroll_y).encode() {
            Ok(json) => Some((json, SnapshotKind::Ids)),
            Err(e) => {
                log::warn!("Skipping durable snapshot for {}: {}", view_id, e);
                None
            }
        }
    }

    /// On failure evict all view snapshots and try once more
    fn write_with_retry(&mut self, key: &str, json: &str) -> bool {
        let first = match self.store.set(key, json) {
            Ok(()) => return true,
            Err(e) => e,
        };
        let evicted = self.store.remove_prefixed(KEY_PREFIX);
        log::info!("Durable write for {} failed ({}); evicted {} snapshots", key, first, evicted);
        match self.store.set(key, json) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Dropping durable snapshot {}: {}", key, e);
                false
            }
        }
    }

    /// Memory snapshot first, then the durable one
    pub fn read_snapshot(&self, view_id: &str) -> Option<ViewStateSnapshot> {
        if let Some(snapshot) = self.memory.get(view_id) {
            return Some(snapshot.clone());
        }
        let raw = self.store.get(&key_for(view_id))?;
        ViewStateSnapshot::decode(&raw).filter(|s| s.view_id == view_id)
    }

    /// Restore `view_id` into `state`, hydrating id-only snapshots from `source`
    pub fn restore_view_state<I: ItemSource + ?Sized>(
        &self,
        view_id: &str,
        state: &mut ViewPagingState,
        source: &I,
        hooks: &mut dyn RestoreHooks,
    ) -> Result<RestoreOutcome, ApiError> {
        let Some(snapshot) = self.read_snapshot(view_id) else {
            return Ok(RestoreOutcome::Miss);
        };
        let kind = snapshot.kind();
        apply_cursor(view_id, &snapshot, state);
        hooks.build_view_shell();

        match &snapshot.payload {
            SnapshotPayload::Memory { .. } | SnapshotPayload::Compact { .. } => {
                hooks.render_grid(state, true);
                hooks.reattach_sentinel();
            }
            SnapshotPayload::Ids { ids } => {
                hooks.render_grid(state, true);
                hooks.reattach_sentinel();
                hooks.set_load_indicator(true, "Restoring list…");
                let result = self.hydrate(ids, state, source, hooks);
                hooks.set_load_indicator(false, "");
                result?;
            }
        }

        log::info!("Restored {:?} snapshot for {} ({} items)", kind, view_id, state.items.len());
        Ok(RestoreOutcome::Restored { kind, scroll_y: snapshot.scroll_y })
    }

    fn hydrate<I: ItemSource + ?Sized>(
        &self,
        ids: &[String],
        state: &mut ViewPagingState,
        source: &I,
        hooks: &mut dyn RestoreHooks,
    ) -> Result<(), ApiError> {
        for chunk in ids.chunks(self.hydrate_batch) {
            let items = source.fetch_items_by_ids(chunk)?;
            state.append_hydrated(items);
            hooks.render_grid(state, true);
        }
        Ok(())
    }

    /// Patch `scrollY` of both snapshots without touching the item lists
    pub fn update_scroll_position(&mut self, view_id: &str, scroll_y: f32) {
        if let Some(snapshot) = self.memory.get_mut(view_id) {
            snapshot.scroll_y = scroll_y;
        }

        let key = key_for(view_id);
        let Some(raw) = self.store.get(&key) else {
            return;
        };
        let mut value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("Not patching unreadable snapshot {}: {}", key, e);
                return;
            }
        };
        if let Some(obj) = value.as_object_mut() {
            obj.insert("scrollY".to_string(), serde_json::json!(scroll_y));
        }
        match serde_json::to_string(&value) {
            Ok(json) => {
                self.write_with_retry(&key, &json);
            }
            Err(e) => log::debug!("Could not re-encode snapshot {}: {}", key, e),
        }
    }
}

/// Re-establish the cursor fields of a snapshot; `ids` start with no items
pub fn apply_cursor(view_id: &str, snapshot: &ViewStateSnapshot, state: &mut ViewPagingState) {
    let items: Vec<Item> = snapshot.ready_items();
    state.restore(
        view_id,
        items,
        &snapshot.search_term,
        snapshot.resume_index(),
        snapshot.total,
        snapshot.done,
    );
}
