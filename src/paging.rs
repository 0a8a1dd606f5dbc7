//! Paging cursor for the open library view
//!
//! `ViewPagingState` is the single source of truth for what has been fetched
//! for a collection and search term. Items are only ever appended; the only
//! ways to shrink the list are `reset`, `open` and `set_search_term`, which
//! replace the state wholesale and take a fresh `generation` so that a fetch
//! started before the reset can be recognised and dropped when it lands.
//! Generations come from one process-wide counter, so a ticket never matches
//! a state other than the one that issued it.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::api::{ItemSource, Page, PageQuery};
use crate::error::ApiError;
use crate::models::Item;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewPagingState {
    pub collection_id: String,
    pub items: Vec<Item>,
    /// Next offset to request
    pub start_index: usize,
    /// Server total for the current query, 0 while unknown
    pub total: usize,
    pub loading: bool,
    pub done: bool,
    pub search_term: String,
    pub page_size: usize,
    pub generation: u64,
}

/// A page fetch that has been started but not yet applied
#[derive(Debug, Clone, PartialEq)]
pub struct PageTicket {
    pub query: PageQuery,
    pub generation: u64,
    pub is_first: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Already loading or done; nothing was requested
    Skipped,
    Appended { count: usize, done: bool },
    /// The state was replaced while the fetch was in flight
    Stale,
    /// Handed to the shell as a fetch request; the page arrives later
    Queued,
}

/// Keeps `loading` set for as long as it lives
struct LoadingGuard<'a> {
    state: &'a mut ViewPagingState,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(state: &'a mut ViewPagingState) -> Self {
        state.loading = true;
        Self { state }
    }
}

impl Deref for LoadingGuard<'_> {
    type Target = ViewPagingState;

    fn deref(&self) -> &ViewPagingState {
        self.state
    }
}

impl DerefMut for LoadingGuard<'_> {
    fn deref_mut(&mut self) -> &mut ViewPagingState {
        self.state
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.loading = false;
    }
}

fn next_generation() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

impl ViewPagingState {
    pub fn new(collection_id: &str, page_size: usize) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            items: Vec::new(),
            start_index: 0,
            total: 0,
            loading: false,
            done: false,
            search_term: String::new(),
            page_size: page_size.max(1),
            generation: next_generation(),
        }
    }

    /// Point the state at another collection with an empty search
    pub fn open(&mut self, collection_id: &str) {
        self.collection_id = collection_id.to_string();
        self.search_term.clear();
        self.reset();
    }

    /// Drop everything fetched so far, keeping collection and search term
    pub fn reset(&mut self) {
        self.items.clear();
        self.start_index = 0;
        self.total = 0;
        self.loading = false;
        self.done = false;
        self.generation = next_generation();
    }

    /// Returns true when the term changed and the state was reset
    pub fn set_search_term(&mut self, term: &str) -> bool {
        let term = term.trim();
        if term == self.search_term {
            return false;
        }
        log::debug!("Search term for {} changed to {:?}", self.collection_id, term);
        self.search_term = term.to_string();
        self.reset();
        true
    }

    /// Replace the state with restored snapshot fields
    pub fn restore(
        &mut self,
        collection_id: &str,
        items: Vec<Item>,
        search_term: &str,
        start_index: usize,
        total: usize,
        done: bool,
    ) {
        self.collection_id = collection_id.to_string();
        self.items = items;
        self.search_term = search_term.to_string();
        self.start_index = start_index;
        self.total = total;
        self.done = done;
        self.loading = false;
        self.generation = next_generation();
    }

    /// Append re-hydrated records without moving the cursor
    pub fn append_hydrated(&mut self, items: Vec<Item>) {
        self.items.extend(items);
    }

    pub fn can_load(&self) -> bool {
        !self.loading && !self.done
    }

    fn query(&self) -> PageQuery {
        PageQuery {
            collection_id: self.collection_id.clone(),
            start_index: self.start_index,
            limit: self.page_size,
            search_term: self.search_term.clone(),
        }
    }

    /// Start a fetch; `None` when one is already in flight or the view is done
    pub fn begin(&mut self, is_first: bool) -> Option<PageTicket> {
        if !self.can_load() {
            return None;
        }
        self.loading = true;
        Some(PageTicket { query: self.query(), generation: self.generation, is_first })
    }

    /// True when `ticket` was issued by this state for its current cursor
    pub fn issued(&self, ticket: &PageTicket) -> bool {
        let q = &ticket.query;
        ticket.generation == self.generation
            && q.collection_id == self.collection_id
            && q.search_term == self.search_term
            && q.start_index == self.start_index
    }

    /// Apply the result of a fetch started with `begin`
    pub fn complete(&mut self, ticket: &PageTicket, result: Result<Page, ApiError>) -> Result<LoadOutcome, ApiError> {
        if !self.issued(ticket) {
            log::debug!(
                "Dropping page at {} for {}: state replaced while in flight",
                ticket.query.start_index,
                ticket.query.collection_id
            );
            return Ok(LoadOutcome::Stale);
        }
        self.loading = false;
        let page = result?;
        Ok(self.apply_page(page, ticket.query.limit, ticket.is_first))
    }

    fn apply_page(&mut self, page: Page, requested: usize, is_first: bool) -> LoadOutcome {
        if is_first || self.total == 0 {
            self.total = page.total;
        }
        let count = page.items.len();
        self.items.extend(page.items);
        self.start_index += count;

        let reached_total = self.total > 0 && self.start_index >= self.total;
        if count == 0 || count < requested || reached_total {
            self.done = true;
        }
        log::debug!(
            "Loaded {} items for {} (next {}, total {}, done {})",
            count,
            self.collection_id,
            self.start_index,
            self.total,
            self.done
        );
        LoadOutcome::Appended { count, done: self.done }
    }

    /// Fetch and append the next page on the calling thread.
    ///
    /// `on_progress(true)` / `on_progress(false)` bracket the fetch for every
    /// page except the first. `loading` is cleared on every exit path.
    pub fn load_next_page<S: ItemSource + ?Sized>(
        &mut self,
        source: &S,
        on_progress: &mut dyn FnMut(bool),
        is_first: bool,
    ) -> Result<LoadOutcome, ApiError> {
        if !self.can_load() {
            return Ok(LoadOutcome::Skipped);
        }

        let mut guard = LoadingGuard::acquire(self);
        let query = guard.query();
        if !is_first {
            on_progress(true);
        }
        let result = source.fetch_page(&query);
        if !is_first {
            on_progress(false);
        }

        match result {
            Ok(page) => Ok(guard.apply_page(page, query.limit, is_first)),
            Err(e) => {
                log::warn!("Page load at {} for {} failed: {}", query.start_index, query.collection_id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;
    use proptest::prelude::*;

    fn no_progress() -> impl FnMut(bool) {
        |_| {}
    }

    #[test]
    fn test_first_page_captures_total() {
        let source = FakeSource::with_items(45);
        let mut state = ViewPagingState::new("lib", 20);
        let outcome = state.load_next_page(&source, &mut no_progress(), true).unwrap();
        assert_eq!(outcome, LoadOutcome::Appended { count: 20, done: false });
        assert_eq!(state.total, 45);
        assert_eq!(state.start_index, 20);
        assert!(!state.loading);
    }

    #[test]
    fn test_later_pages_do_not_overwrite_total() {
        let source = FakeSource::with_items(60);
        let mut state = ViewPagingState::new("lib", 20);
        state.load_next_page(&source, &mut no_progress(), true).unwrap();
        let lying = FakeSource::with_items(60).reporting_total(999);
        state.load_next_page(&lying, &mut no_progress(), false).unwrap();
        assert_eq!(state.total, 60);
    }

    #[test]
    fn test_progress_only_for_later_pages() {
        let source = FakeSource::with_items(50);
        let mut state = ViewPagingState::new("lib", 20);
        let mut calls = Vec::new();
        state.load_next_page(&source, &mut |on| calls.push(on), true).unwrap();
        assert!(calls.is_empty());
        state.load_next_page(&source, &mut |on| calls.push(on), false).unwrap();
        assert_eq!(calls, vec![true, false]);
    }

    #[test]
    fn test_failure_clears_loading_and_propagates() {
        let source = FakeSource::with_items(50);
        source.fail_pages(true);
        let mut state = ViewPagingState::new("lib", 20);
        let result = state.load_next_page(&source, &mut no_progress(), true);
        assert!(matches!(result, Err(ApiError::Transport(_))));
        assert!(!state.loading);
        assert!(!state.done);
        assert!(state.items.is_empty());

        source.fail_pages(false);
        state.load_next_page(&source, &mut no_progress(), true).unwrap();
        assert_eq!(state.items.len(), 20);
    }

    #[test]
    fn test_single_flight() {
        let source = FakeSource::with_items(50);
        let mut state = ViewPagingState::new("lib", 20);
        let ticket = state.begin(true).unwrap();
        assert!(state.begin(false).is_none());
        assert_eq!(
            state.load_next_page(&source, &mut no_progress(), false).unwrap(),
            LoadOutcome::Skipped
        );

        let page = source.fetch_page(&ticket.query);
        state.complete(&ticket, page).unwrap();
        assert_eq!(source.page_calls(), 1);
        assert_eq!(state.items.len(), 20);
        assert!(!state.loading);
    }

    #[test]
    fn test_short_page_terminates() {
        let source = FakeSource::with_items(30).reporting_total(0);
        let mut state = ViewPagingState::new("lib", 20);
        state.load_next_page(&source, &mut no_progress(), true).unwrap();
        assert!(!state.done);
        let outcome = state.load_next_page(&source, &mut no_progress(), false).unwrap();
        assert_eq!(outcome, LoadOutcome::Appended { count: 10, done: true });
        assert_eq!(
            state.load_next_page(&source, &mut no_progress(), false).unwrap(),
            LoadOutcome::Skipped
        );
        assert_eq!(source.page_calls(), 2);
    }

    #[test]
    fn test_reaching_total_terminates() {
        let source = FakeSource::with_items(40);
        let mut state = ViewPagingState::new("lib", 20);
        state.load_next_page(&source, &mut no_progress(), true).unwrap();
        state.load_next_page(&source, &mut no_progress(), false).unwrap();
        assert!(state.done);
        assert_eq!(source.page_calls(), 2);
    }

    #[test]
    fn test_empty_collection_is_done_after_first_page() {
        let source = FakeSource::with_items(0);
        let mut state = ViewPagingState::new("lib", 20);
        let outcome = state.load_next_page(&source, &mut no_progress(), true).unwrap();
        assert_eq!(outcome, LoadOutcome::Appended { count: 0, done: true });
    }

    #[test]
    fn test_search_term_change_resets() {
        let source = FakeSource::with_names(&["The Matrix", "Matrix Reloaded", "Alien", "Heat"]);
        let mut state = ViewPagingState::new("lib", 2);
        state.load_next_page(&source, &mut no_progress(), true).unwrap();
        assert_eq!(state.items.len(), 2);

        assert!(state.set_search_term("matrix"));
        assert!(state.items.is_empty());
        assert_eq!(state.start_index, 0);
        assert!(!state.done);

        state.load_next_page(&source, &mut no_progress(), true).unwrap();
        let queries = source.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].search_term, "matrix");
        assert_eq!(queries[1].start_index, 0);
        assert_eq!(state.total, 2);
        assert!(!state.set_search_term(" matrix "));
    }

    #[test]
    fn test_stale_completion_is_dropped() {
        let source = FakeSource::with_items(50);
        let mut state = ViewPagingState::new("lib", 20);
        let ticket = state.begin(true).unwrap();
        state.open("other");
        let page = source.fetch_page(&ticket.query);
        assert_eq!(state.complete(&ticket, page).unwrap(), LoadOutcome::Stale);
        assert!(state.items.is_empty());
        assert!(state.begin(true).is_some());
    }

    #[test]
    fn test_ticket_from_another_state_is_dropped() {
        let source = FakeSource::with_items(100);
        let mut first = ViewPagingState::new("x", 40);
        let mut second = ViewPagingState::new("y", 40);
        first.open("x");
        second.open("y");
        let foreign = first.begin(true).unwrap();
        let own = second.begin(true).unwrap();
        assert_ne!(foreign.generation, own.generation);

        let page = source.fetch_page(&foreign.query);
        assert_eq!(second.complete(&foreign, page).unwrap(), LoadOutcome::Stale);
        assert!(second.loading);

        let page = source.fetch_page(&own.query);
        assert!(matches!(second.complete(&own, page).unwrap(), LoadOutcome::Appended { count: 40, .. }));
        assert_eq!(second.items.len(), 40);
    }

    #[test]
    fn test_ticket_for_other_cursor_is_dropped() {
        let source = FakeSource::with_items(100);
        let mut state = ViewPagingState::new("lib", 20);
        let mut ticket = state.begin(true).unwrap();
        ticket.query.start_index = 20;
        let page = source.fetch_page(&ticket.query);
        assert_eq!(state.complete(&ticket, page).unwrap(), LoadOutcome::Stale);
        assert!(state.items.is_empty());
    }

    #[test]
    fn test_failed_ticket_clears_loading() {
        let mut state = ViewPagingState::new("lib", 20);
        let ticket = state.begin(true).unwrap();
        let result = state.complete(&ticket, Err(ApiError::Malformed("no Items".into())));
        assert!(result.is_err());
        assert!(!state.loading);
    }

    proptest! {
        #[test]
        fn prop_items_only_grow(catalogue in 0usize..150, page_size in 1usize..30) {
            let source = FakeSource::with_items(catalogue);
            let mut state = ViewPagingState::new("lib", page_size);
            let mut first = true;
            let mut previous: Vec<Item> = Vec::new();
            while !state.done {
                let before = state.start_index;
                let outcome = state.load_next_page(&source, &mut |_| {}, first).unwrap();
                first = false;
                if let LoadOutcome::Appended { count, .. } = outcome {
                    prop_assert_eq!(state.start_index, before + count);
                }
                prop_assert!(state.items.starts_with(&previous));
                previous = state.items.clone();
            }
            prop_assert_eq!(state.items.len(), catalogue);
            let expected_calls = catalogue.div_ceil(page_size).max(1);
            prop_assert_eq!(source.page_calls(), expected_calls);
        }
    }
}
