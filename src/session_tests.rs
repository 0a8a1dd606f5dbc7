//! Tests for the session that drives the open library view

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::api::ItemSource;
    use crate::clock::ManualClock;
    use crate::config::AppConfig;
    use crate::nav::{Focus, KeyPress, NavKey};
    use crate::paging::{LoadOutcome, ViewPagingState};
    use crate::router::Route;
    use crate::session::*;
    use crate::storage::{key_for, MemorySessionStore, SessionStore, ViewStateSnapshot};
    use crate::testing::FakeSource;

    const VIEW: &str = "lib-movies";

    struct Harness {
        session: Session<MemorySessionStore>,
        source: Arc<FakeSource>,
        clock: ManualClock,
    }

    fn config() -> AppConfig {
        AppConfig { page_size: 40, ..AppConfig::default() }
    }

    /// 1000 px wide gives 5 columns of 353.6 px rows; 800 px tall viewport
    fn harness_with(source: FakeSource, store: MemorySessionStore, mode: FetchMode) -> Harness {
        let clock = ManualClock::new(10_000);
        let source = Arc::new(source);
        let mut session = Session::new(&config(), source.clone(), store, Box::new(clock.clone()), mode);
        session.set_viewport(1000.0, 800.0);
        session.set_views(source.fetch_views().unwrap());
        Harness { session, source, clock }
    }

    fn harness(n: usize) -> Harness {
        harness_with(FakeSource::with_items(n), MemorySessionStore::new(10_000_000), FetchMode::Inline)
    }

    fn key(k: NavKey) -> KeyPress {
        KeyPress::plain(k)
    }

    fn store_with_ids_snapshot(source: &FakeSource, scroll_y: f32) -> MemorySessionStore {
        let mut state = ViewPagingState::new(VIEW, 40);
        state.items = source.items().to_vec();
        state.start_index = state.items.len();
        state.total = state.items.len();
        state.done = true;
        let mut store = MemorySessionStore::new(10_000_000);
        let json = ViewStateSnapshot::ids(VIEW, &state, scroll_y).encode().unwrap();
        store.set(&key_for(VIEW), &json).unwrap();
        store
    }

    #[test]
    fn test_open_view_loads_first_page() {
        let mut h = harness(100);
        let events = h.session.open_view(VIEW);

        assert_eq!(events, vec![SessionEvent::RouteChanged(Route::view(VIEW))]);
        assert_eq!(h.session.paging().items.len(), 40);
        assert_eq!(h.session.paging().total, 100);
        assert_eq!(h.source.page_calls(), 1);
        assert!(h.session.sentinel().attached().is_some());
        assert!(h.session.indicator().is_none());
        assert!(h.session.persistence().read_snapshot(VIEW).is_some());

        let paint = h.session.last_paint().unwrap();
        assert_eq!(paint.header.as_deref(), Some("Movies • Loaded 40 / 100"));
        assert_eq!(paint.cols, 5);
        assert_eq!(h.session.card(3).map(|i| i.id.as_str()), Some("item-3"));
    }

    #[test]
    fn test_scroll_near_end_prefetches_when_idle() {
        let mut h = harness(100);
        h.session.open_view(VIEW);

        h.session.update_scroll_position(1500.0);
        assert!(h.session.is_pending(Task::Prefetch));

        h.session.tick(false);
        assert_eq!(h.source.page_calls(), 1);

        h.session.tick(true);
        assert_eq!(h.source.page_calls(), 2);
        assert_eq!(h.session.paging().items.len(), 80);
    }

    #[test]
    fn test_prefetch_is_rate_limited() {
        let mut h = harness(200);
        h.session.open_view(VIEW);
        h.session.update_scroll_position(1500.0);
        h.session.tick(true);
        assert_eq!(h.session.paging().items.len(), 80);

        h.session.update_scroll_position(4200.0);
        assert!(!h.session.is_pending(Task::Prefetch));

        h.clock.advance(1200);
        h.session.update_scroll_position(4250.0);
        assert!(h.session.is_pending(Task::Prefetch));
    }

    #[test]
    fn test_no_prefetch_while_searching() {
        let mut h = harness(100);
        h.session.open_view(VIEW);
        h.session.set_search_term("Item");
        h.clock.advance(300);
        h.session.tick(false);
        assert_eq!(h.session.paging().search_term, "Item");

        h.session.update_scroll_position(1500.0);
        assert!(!h.session.is_pending(Task::Prefetch));
    }

    #[test]
    fn test_sentinel_loads_when_bottom_is_visible() {
        let mut h = harness(100);
        h.session.open_view(VIEW);
        h.session.update_scroll_position(2100.0);

        h.session.tick(false);
        assert_eq!(h.source.page_calls(), 2);
        assert_eq!(h.session.paging().items.len(), 80);
    }

    #[test]
    fn test_stale_sentinel_report_is_ignored() {
        let mut h = harness(100);
        h.session.open_view(VIEW);
        let old = h.session.sentinel().attached().unwrap();
        let fresh = h.session.reattach_sentinel();

        assert!(!h.session.sentinel_visible(old, true, 0.0));
        assert_eq!(h.source.page_calls(), 1);
        assert!(h.session.sentinel_visible(fresh, true, 0.0));
        assert_eq!(h.source.page_calls(), 2);
    }

    #[test]
    fn test_search_is_debounced_and_resets() {
        let mut h = harness(100);
        h.session.open_view(VIEW);
        h.session.take_scroll_request();

        h.session.set_search_term("x");
        h.clock.advance(100);
        h.session.set_search_term("Item 002");
        h.clock.advance(299);
        h.session.tick(false);
        assert_eq!(h.session.paging().search_term, "");

        h.clock.advance(1);
        h.session.tick(false);
        assert_eq!(h.session.paging().search_term, "Item 002");
        assert_eq!(h.session.paging().items.len(), 10);
        assert!(h.session.paging().done);
        assert_eq!(h.source.page_calls(), 2);
        assert_eq!(h.source.queries().last().map(|q| q.search_term.clone()), Some("Item 002".to_string()));
        assert_eq!(h.session.take_scroll_request(), Some(0.0));
    }

    #[test]
    fn test_item_round_trip_restores_from_memory() {
        let mut h = harness(100);
        h.session.open_view(VIEW);
        h.session.update_scroll_position(700.0);
        h.session.set_focus(Focus::Grid(12));

        let events = h.session.handle_key(key(NavKey::Activate));
        assert_eq!(events, vec![SessionEvent::RouteChanged(Route::item("item-12"))]);
        assert!(h.session.sentinel().attached().is_none());

        let events = h.session.back();
        assert_eq!(events, vec![SessionEvent::RouteChanged(Route::view(VIEW))]);
        assert_eq!(h.session.paging().items.len(), 40);
        assert_eq!(h.source.page_calls(), 1);
        assert_eq!(h.session.take_scroll_request(), Some(700.0));
        assert!(h.session.sentinel().attached().is_some());
        assert_eq!(h.session.nav().remembered_grid_index(VIEW), Some(12));
    }

    #[test]
    fn test_back_key_on_item_page() {
        let mut h = harness(10);
        h.session.open_view(VIEW);
        h.session.open_item(Route::item("item-1"));
        let events = h.session.handle_key(key(NavKey::Back));
        assert_eq!(events, vec![SessionEvent::RouteChanged(Route::view(VIEW))]);
    }

    #[test]
    fn test_keyboard_reveals_focus_and_loads_near_end() {
        let mut h = harness(100);
        h.session.open_view(VIEW);
        h.session.take_scroll_request();

        let events = h.session.handle_key(key(NavKey::Down));
        assert_eq!(events, vec![SessionEvent::FocusChanged(Focus::Grid(5))]);
        assert_eq!(h.session.take_scroll_request(), None);

        h.session.handle_key(key(NavKey::Down));
        h.session.handle_key(key(NavKey::Down));
        assert_eq!(h.session.nav().focus(), Some(Focus::Grid(15)));
        let y = h.session.take_scroll_request().unwrap();
        assert!(y > 600.0 && y < 620.0, "scrolled to {}", y);

        for _ in 0..4 {
            h.session.handle_key(key(NavKey::Down));
        }
        assert_eq!(h.session.nav().focus(), Some(Focus::Grid(35)));
        assert_eq!(h.source.page_calls(), 2);
        assert_eq!(h.session.paging().items.len(), 80);
    }

    #[test]
    fn test_quick_jump_runs_after_debounce() {
        let source = FakeSource::with_names(&["Alien", "Brazil", "Casablanca", "Dune"]);
        let mut h = harness_with(source, MemorySessionStore::new(1_000_000), FetchMode::Inline);
        h.session.open_view(VIEW);

        assert!(h.session.handle_key(key(NavKey::Char('c'))).is_empty());
        assert_eq!(h.session.quick_jump_overlay(), Some("C"));

        h.clock.advance(89);
        assert!(h.session.tick(false).is_empty());

        h.clock.advance(1);
        assert_eq!(h.session.tick(false), vec![SessionEvent::FocusChanged(Focus::Grid(2))]);
        assert_eq!(h.session.quick_jump_overlay(), Some("C"));

        h.clock.advance(560);
        h.session.tick(false);
        assert_eq!(h.session.quick_jump_overlay(), None);
    }

    #[test]
    fn test_load_failure_is_reported_and_refresh_recovers() {
        let mut h = harness(100);
        h.source.fail_pages(true);
        h.session.open_view(VIEW);
        assert!(h.session.last_error().is_some());
        assert!(!h.session.paging().loading);
        assert!(h.session.paging().items.is_empty());

        h.source.fail_pages(false);
        h.session.refresh();
        assert!(h.session.last_error().is_none());
        assert_eq!(h.session.paging().items.len(), 40);
        assert_eq!(h.source.view_calls(), 2);
    }

    #[test]
    fn test_inline_load_errors_reach_the_caller() {
        let mut h = harness(100);
        h.session.open_view(VIEW);
        assert_eq!(h.session.paging().items.len(), 40);

        h.source.fail_pages(true);
        assert!(h.session.load_next_page().is_err());
        assert!(h.session.last_error().is_some());
        assert!(!h.session.paging().loading);
        assert!(h.session.reset_and_load_first_page(VIEW).is_err());

        h.source.fail_pages(false);
        let outcome = h.session.reset_and_load_first_page(VIEW).unwrap();
        assert_eq!(outcome, LoadOutcome::Appended { count: 40, done: false });
        assert_eq!(h.session.load_next_page().unwrap(), LoadOutcome::Appended { count: 40, done: false });
    }

    #[test]
    fn test_failed_hydration_falls_back_to_fresh_load() {
        let source = FakeSource::with_items(100);
        let store = store_with_ids_snapshot(&source, 50.0);
        let mut h = harness_with(source, store, FetchMode::Inline);
        h.source.fail_ids(true);

        h.session.open_view(VIEW);
        assert!(h.session.indicator().is_none());
        assert_eq!(h.session.paging().items.len(), 40);
        assert_eq!(h.source.page_calls(), 1);
    }

    #[test]
    fn test_deferred_mode_hands_out_tickets() {
        let mut h = harness_with(FakeSource::with_items(100), MemorySessionStore::new(10_000_000), FetchMode::Deferred);
        h.session.open_view(VIEW);
        assert_eq!(h.source.page_calls(), 0);
        assert!(h.session.paging().loading);

        let requests = h.session.take_requests();
        let [FetchRequest::Page(first)] = requests.as_slice() else {
            panic!("expected one page request, got {:?}", requests);
        };
        let outcome = h.session.complete_page_load(first, h.source.fetch_page(&first.query)).unwrap();
        assert_eq!(outcome, LoadOutcome::Appended { count: 40, done: false });

        assert_eq!(h.session.load_next_page().unwrap(), LoadOutcome::Queued);
        assert_eq!(h.session.indicator(), Some("Loading more…"));
        let requests = h.session.take_requests();
        let [FetchRequest::Page(second)] = requests.as_slice() else {
            panic!("expected one page request, got {:?}", requests);
        };

        // Search lands while page two is still in flight
        h.session.set_search_term("Item 001");
        h.clock.advance(300);
        h.session.tick(false);
        let requests = h.session.take_requests();
        let [FetchRequest::Page(searched)] = requests.as_slice() else {
            panic!("expected one page request, got {:?}", requests);
        };
        assert_eq!(searched.query.search_term, "Item 001");

        let stale = h.session.complete_page_load(second, h.source.fetch_page(&second.query)).unwrap();
        assert_eq!(stale, LoadOutcome::Stale);
        assert!(h.session.paging().items.is_empty());

        h.session.complete_page_load(searched, h.source.fetch_page(&searched.query)).unwrap();
        assert_eq!(h.session.paging().items.len(), 10);
        assert!(h.session.paging().items.iter().all(|i| i.name.starts_with("Item 001")));
    }

    #[test]
    fn test_deferred_hydration_in_batches() {
        let source = FakeSource::with_items(450);
        let store = store_with_ids_snapshot(&source, 321.0);
        let mut h = harness_with(source, store, FetchMode::Deferred);

        h.session.open_view(VIEW);
        assert_eq!(h.session.indicator(), Some("Restoring list…"));
        let requests = h.session.take_requests();
        let [FetchRequest::Hydrate { generation, batches }] = requests.as_slice() else {
            panic!("expected a hydrate request, got {:?}", requests);
        };
        assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![200, 200, 50]);

        for (i, batch) in batches.iter().enumerate() {
            let last = i + 1 == batches.len();
            h.session.complete_hydration_batch(*generation, h.source.fetch_items_by_ids(batch), last);
        }

        assert_eq!(h.session.paging().items.len(), 450);
        assert_eq!(h.session.paging().start_index, 450);
        assert!(h.session.paging().done);
        assert!(h.session.indicator().is_none());
        assert_eq!(h.session.take_scroll_request(), Some(321.0));
        assert_eq!(h.source.page_calls(), 0);
    }

    #[test]
    fn test_deferred_hydration_result_after_leaving_is_ignored() {
        let source = FakeSource::with_items(50);
        let store = store_with_ids_snapshot(&source, 0.0);
        let mut h = harness_with(source, store, FetchMode::Deferred);

        h.session.open_view(VIEW);
        let requests = h.session.take_requests();
        let [FetchRequest::Hydrate { generation, batches }] = requests.as_slice() else {
            panic!("expected a hydrate request, got {:?}", requests);
        };

        h.session.open_view("lib-shows");
        h.session.complete_hydration_batch(*generation, h.source.fetch_items_by_ids(&batches[0]), true);
        assert_eq!(h.session.paging().collection_id, "lib-shows");
        assert!(h.session.paging().items.is_empty());
    }

    #[test]
    fn test_no_page_loads_while_hydrating() {
        let source = FakeSource::with_items(450);
        let mut state = ViewPagingState::new(VIEW, 40);
        state.items = source.items()[..100].to_vec();
        state.start_index = 100;
        state.total = 450;
        let mut store = MemorySessionStore::new(10_000_000);
        let json = ViewStateSnapshot::ids(VIEW, &state, 0.0).encode().unwrap();
        store.set(&key_for(VIEW), &json).unwrap();
        let mut h = harness_with(source, store, FetchMode::Deferred);

        h.session.open_view(VIEW);
        let requests = h.session.take_requests();
        let [FetchRequest::Hydrate { generation, batches }] = requests.as_slice() else {
            panic!("expected a hydrate request, got {:?}", requests);
        };

        h.clock.advance(5_000);
        h.session.tick(false);
        h.session.tick(true);
        assert_eq!(h.session.load_next_page().unwrap(), LoadOutcome::Skipped);
        h.session.handle_key(key(NavKey::Down));
        assert!(h.session.take_requests().iter().all(|r| !matches!(r, FetchRequest::Page(_))));

        for (i, batch) in batches.iter().enumerate() {
            let last = i + 1 == batches.len();
            h.session.complete_hydration_batch(*generation, h.source.fetch_items_by_ids(batch), last);
        }
        let paging = h.session.paging();
        assert_eq!(paging.items.len(), 100);
        assert_eq!(paging.items[0].id, "item-0");
        assert_eq!(paging.items[99].id, "item-99");
        assert_eq!(paging.start_index, 100);
        assert!(!paging.done);

        assert_eq!(h.session.load_next_page().unwrap(), LoadOutcome::Queued);
        let requests = h.session.take_requests();
        let [FetchRequest::Page(ticket)] = requests.as_slice() else {
            panic!("expected one page request, got {:?}", requests);
        };
        assert_eq!(ticket.query.start_index, 100);
    }

    #[test]
    fn test_page_from_a_previous_session_is_dropped() {
        let mut old = harness_with(FakeSource::with_items(100), MemorySessionStore::new(10_000_000), FetchMode::Deferred);
        old.session.open_view(VIEW);
        let requests = old.session.take_requests();
        let [FetchRequest::Page(old_ticket)] = requests.as_slice() else {
            panic!("expected one page request, got {:?}", requests);
        };

        let mut h = harness_with(FakeSource::with_items(100), MemorySessionStore::new(10_000_000), FetchMode::Deferred);
        h.session.open_view(VIEW);
        let requests = h.session.take_requests();
        let [FetchRequest::Page(ticket)] = requests.as_slice() else {
            panic!("expected one page request, got {:?}", requests);
        };

        let outcome = h.session.complete_page_load(old_ticket, old.source.fetch_page(&old_ticket.query)).unwrap();
        assert_eq!(outcome, LoadOutcome::Stale);
        assert!(h.session.paging().loading);
        assert!(h.session.paging().items.is_empty());

        h.session.complete_page_load(ticket, h.source.fetch_page(&ticket.query)).unwrap();
        assert_eq!(h.session.paging().items.len(), 40);
    }

    #[test]
    fn test_first_library_opens_on_startup() {
        let mut h = harness(100);
        h.session.start(Route::Home);
        let events = h.session.open_first_view();

        assert_eq!(events, vec![SessionEvent::RouteChanged(Route::view(VIEW))]);
        assert_eq!(h.session.route(), &Route::view(VIEW));
        assert!(!h.session.history().can_go_back());
        assert_eq!(h.session.paging().items.len(), 40);
        assert!(h.session.open_first_view().is_empty());
    }

    #[test]
    fn test_first_library_does_not_override_navigation() {
        let mut h = harness(100);
        h.session.start(Route::Home);
        h.session.open_view("lib-shows");
        h.session.back();
        assert_eq!(h.session.route(), &Route::Home);
        assert!(h.session.open_first_view().is_empty());

        let mut h = harness(100);
        h.session.start(Route::Home);
        h.session.set_views(Vec::new());
        assert!(h.session.open_first_view().is_empty());
        assert_eq!(h.session.route(), &Route::Home);
    }
}
