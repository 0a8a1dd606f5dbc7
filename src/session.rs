//! The open library view and everything that drives it
//!
//! `Session` owns the paging state of the current view, the grid renderer,
//! both paging triggers (prefetch and sentinel), view-state persistence,
//! keyboard navigation and the deferred-task scheduler. The shell feeds it
//! input (viewport size, scroll offset, keys, fetch results, one `tick` per
//! frame) and reads back what to paint.
//!
//! Every page load, whatever triggered it, goes through `trigger_load`, so the
//! paging state's single-flight rule covers the sentinel, prefetch and the
//! keyboard alike. In `FetchMode::Deferred` the session never touches the
//! network itself: it queues `FetchRequest`s for the shell to run on worker
//! threads and applies the results when they come back.

use std::sync::Arc;

use crate::api::{ItemSource, Page};
use crate::clock::Clock;
use crate::config::{AppConfig, Timings};
use crate::error::ApiError;
use crate::grid::{GridPaint, GridRenderer, VirtualizationMetrics};
use crate::models::Item;
use crate::nav::{Focus, KeyPress, NavCommand, NavEngine, PagingHint, ZoneEntry};
use crate::paging::{LoadOutcome, PageTicket, ViewPagingState};
use crate::prefetch::{PrefetchDecision, Prefetcher, Proximity};
use crate::router::{History, Route, Transition};
use crate::scheduler::{Deferral, Scheduler};
use crate::sentinel::{marker_visible, Sentinel, SentinelId};
use crate::storage::{
    apply_cursor, RestoreHooks, RestoreOutcome, SaveReport, SessionStore, SnapshotKind, SnapshotPayload,
    ViewPersistence, ViewStateSnapshot,
};

const LOADING_MORE: &str = "Loading more…";
const RESTORING: &str = "Restoring list…";
const DEFAULT_VIEW_NAME: &str = "Library";

/// Deferred work owned by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    SearchApply,
    ScrollPersist,
    Prefetch,
    QuickJumpExec,
    QuickJumpHide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Fetch on the calling thread
    Inline,
    /// Queue requests for the shell, see `take_requests`
    Deferred,
}

/// Network work for the shell to run off the UI thread
#[derive(Debug, Clone, PartialEq)]
pub enum FetchRequest {
    Page(PageTicket),
    /// Re-hydrate an id-only snapshot; report each batch in order
    Hydrate { generation: u64, batches: Vec<Vec<String>> },
    Views,
}

/// Things the shell reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RouteChanged(Route),
    FocusChanged(Focus),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Hydration {
    generation: u64,
    scroll_y: f32,
}

/// Paint the grid and keep the navigation engine's grid zone in step
fn paint_grid(
    grid: &mut GridRenderer,
    nav: &mut NavEngine,
    view_name: &str,
    state: &ViewPagingState,
    replace_all: bool,
    virtual_only_tick: bool,
) -> GridPaint {
    let paint = grid.render(view_name, state, replace_all, virtual_only_tick);
    if replace_all || nav.grid_len() != grid.browsable_len() {
        let entries = grid
            .browsable_items(&state.items)
            .map(|item| ZoneEntry::new(item.display_name(), Route::item(&item.id)))
            .collect();
        nav.publish_grid(entries, grid.cols());
    }
    nav.set_paging_hint(PagingHint {
        loaded: grid.browsable_len(),
        loading: state.loading,
        done: state.done,
    });
    paint
}

/// Restore callbacks routed to the session's own parts
struct ViewHooks<'a> {
    grid: &'a mut GridRenderer,
    sentinel: &'a mut Sentinel,
    nav: &'a mut NavEngine,
    indicator: &'a mut Option<String>,
    last_paint: &'a mut Option<GridPaint>,
    shell_builds: &'a mut u64,
    view_name: &'a str,
}

impl RestoreHooks for ViewHooks<'_> {
    fn build_view_shell(&mut self) {
        *self.shell_builds += 1;
        self.grid.invalidate();
        self.sentinel.disconnect();
        *self.last_paint = None;
    }

    fn render_grid(&mut self, state: &ViewPagingState, replace_all: bool) {
        let paint = paint_grid(self.grid, self.nav, self.view_name, state, replace_all, false);
        *self.last_paint = Some(paint);
    }

    fn reattach_sentinel(&mut self) {
        self.sentinel.reattach();
    }

    fn set_load_indicator(&mut self, visible: bool, label: &str) {
        *self.indicator = visible.then(|| label.to_string());
    }
}

pub struct Session<S: SessionStore> {
    source: Arc<dyn ItemSource>,
    clock: Box<dyn Clock>,
    mode: FetchMode,
    timings: Timings,
    paging: ViewPagingState,
    persistence: ViewPersistence<S>,
    grid: GridRenderer,
    prefetcher: Prefetcher,
    sentinel: Sentinel,
    nav: NavEngine,
    scheduler: Scheduler<Task>,
    history: History,
    views: Vec<Item>,
    view_name: String,
    indicator: Option<String>,
    last_paint: Option<GridPaint>,
    shell_builds: u64,
    pending_search: Option<String>,
    scroll_request: Option<f32>,
    /// Set by the first `navigate`; the startup landing only applies before it
    navigated: bool,
    quick_jump_overlay: Option<String>,
    requests: Vec<FetchRequest>,
    hydration: Option<Hydration>,
    last_error: Option<String>,
}

impl<S: SessionStore> Session<S> {
    pub fn new(
        config: &AppConfig,
        source: Arc<dyn ItemSource>,
        store: S,
        clock: Box<dyn Clock>,
        mode: FetchMode,
    ) -> Self {
        let timings = config.timings;
        Self {
            source,
            clock,
            mode,
            timings,
            paging: ViewPagingState::new("", config.page_size),
            persistence: ViewPersistence::new(store, config.snapshot_budget_chars, config.hydrate_batch_size),
            grid: GridRenderer::new(config.grid),
            prefetcher: Prefetcher::new(&timings, true),
            sentinel: Sentinel::new(timings.sentinel_margin),
            nav: NavEngine::new(&timings),
            scheduler: Scheduler::new(),
            history: History::new(),
            views: Vec::new(),
            view_name: DEFAULT_VIEW_NAME.to_string(),
            indicator: None,
            last_paint: None,
            shell_builds: 0,
            pending_search: None,
            scroll_request: None,
            navigated: false,
            quick_jump_overlay: None,
            requests: Vec::new(),
            hydration: None,
            last_error: None,
        }
    }

    // Accessors for the shell

    pub fn paging(&self) -> &ViewPagingState {
        &self.paging
    }

    pub fn grid(&self) -> &GridRenderer {
        &self.grid
    }

    pub fn nav(&self) -> &NavEngine {
        &self.nav
    }

    pub fn sentinel(&self) -> &Sentinel {
        &self.sentinel
    }

    pub fn persistence(&self) -> &ViewPersistence<S> {
        &self.persistence
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn route(&self) -> &Route {
        self.history.current()
    }

    pub fn views(&self) -> &[Item] {
        &self.views
    }

    pub fn view_name(&self) -> &str {
        &self.view_name
    }

    pub fn last_paint(&self) -> Option<&GridPaint> {
        self.last_paint.as_ref()
    }

    /// Label of the load indicator when it is showing
    pub fn indicator(&self) -> Option<&str> {
        self.indicator.as_deref()
    }

    pub fn quick_jump_overlay(&self) -> Option<&str> {
        self.quick_jump_overlay.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn shell_builds(&self) -> u64 {
        self.shell_builds
    }

    pub fn is_pending(&self, task: Task) -> bool {
        self.scheduler.is_pending(&task)
    }

    /// Earliest scheduler deadline, for asking the UI to wake up
    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline()
    }

    pub fn take_requests(&mut self) -> Vec<FetchRequest> {
        std::mem::take(&mut self.requests)
    }

    /// Scroll offset the shell should jump to, once
    pub fn take_scroll_request(&mut self) -> Option<f32> {
        self.scroll_request.take()
    }

    /// Browsable item at a grid position
    pub fn card(&self, position: usize) -> Option<&Item> {
        self.grid.browsable_item(&self.paging.items, position)
    }

    fn on_view(&self) -> bool {
        matches!(self.history.current(), Route::View { .. })
    }

    // View shell and grid

    pub fn build_view_shell(&mut self) {
        self.shell_builds += 1;
        self.grid.invalidate();
        self.sentinel.disconnect();
        self.last_paint = None;
    }

    pub fn render_grid(&mut self, replace_all: bool, virtual_only_tick: bool) {
        let mut paint = paint_grid(
            &mut self.grid,
            &mut self.nav,
            &self.view_name,
            &self.paging,
            replace_all,
            virtual_only_tick,
        );
        if virtual_only_tick {
            if let Some(previous) = &self.last_paint {
                paint.header = previous.header.clone();
                paint.status = previous.status;
            }
        }
        self.last_paint = Some(paint);
    }

    pub fn ensure_sentinel(&mut self) -> SentinelId {
        self.sentinel.ensure()
    }

    pub fn reattach_sentinel(&mut self) -> SentinelId {
        self.sentinel.reattach()
    }

    pub fn set_virtualization_metrics(&mut self, metrics: VirtualizationMetrics) {
        self.grid.set_virtualization_metrics(metrics);
        self.nav.set_grid_cols(self.grid.cols());
        self.render_grid(false, false);
    }

    /// Content area size; call whenever it may have changed
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        if self.grid.resize(width, height) {
            log::debug!("Grid now {} columns at width {:.0}", self.grid.cols(), width);
            self.nav.set_grid_cols(self.grid.cols());
        }
        self.render_grid(false, true);
        self.maybe_prefetch();
    }

    // Paging

    /// Clear the view's cursor and load its first page.
    ///
    /// In `FetchMode::Deferred` the fetch is only queued and the outcome is
    /// `Queued`; the result arrives through `complete_page_load`.
    pub fn reset_and_load_first_page(&mut self, collection_id: &str) -> Result<LoadOutcome, ApiError> {
        if self.paging.collection_id != collection_id {
            self.paging.open(collection_id);
        } else {
            self.paging.reset();
        }
        self.hydration = None;
        self.indicator = None;
        self.scheduler.cancel_key(&Task::Prefetch);
        self.build_view_shell();
        self.render_grid(true, false);
        self.trigger_load(true)
    }

    /// Load the next page of the open view
    pub fn load_next_page(&mut self) -> Result<LoadOutcome, ApiError> {
        self.trigger_load(false)
    }

    /// Reload on behalf of the session itself; failures are kept in `last_error`
    fn reload(&mut self, view_id: &str) {
        if let Err(e) = self.reset_and_load_first_page(view_id) {
            log::debug!("First page of {} not loaded: {}", view_id, e);
        }
    }

    /// Next page for the sentinel, prefetch or keyboard
    fn load_more(&mut self) {
        if let Err(e) = self.trigger_load(false) {
            log::debug!("Next page of {} not loaded: {}", self.paging.collection_id, e);
        }
    }

    fn trigger_load(&mut self, is_first: bool) -> Result<LoadOutcome, ApiError> {
        // The cursor of an id snapshot points past items not yet re-fetched
        if self.hydration.is_some() {
            return Ok(LoadOutcome::Skipped);
        }
        match self.mode {
            FetchMode::Inline => self.load_inline(is_first),
            FetchMode::Deferred => {
                let Some(ticket) = self.paging.begin(is_first) else {
                    return Ok(LoadOutcome::Skipped);
                };
                if !is_first {
                    self.indicator = Some(LOADING_MORE.to_string());
                }
                self.render_grid(false, false);
                self.requests.push(FetchRequest::Page(ticket));
                Ok(LoadOutcome::Queued)
            }
        }
    }

    fn load_inline(&mut self, is_first: bool) -> Result<LoadOutcome, ApiError> {
        let indicator = &mut self.indicator;
        let result = self.paging.load_next_page(
            self.source.as_ref(),
            &mut |visible| *indicator = visible.then(|| LOADING_MORE.to_string()),
            is_first,
        );
        self.after_load(result)
    }

    /// Apply a page fetched by the shell for a `FetchRequest::Page`
    pub fn complete_page_load(
        &mut self,
        ticket: &PageTicket,
        result: Result<Page, ApiError>,
    ) -> Result<LoadOutcome, ApiError> {
        let current = self.paging.issued(ticket);
        if current && !ticket.is_first {
            self.indicator = None;
        }
        if let Err(e) = &result {
            if current {
                log::warn!("Page load at {} for {} failed: {}", ticket.query.start_index, ticket.query.collection_id, e);
            }
        }
        let outcome = self.paging.complete(ticket, result);
        self.after_load(outcome)
    }

    fn after_load(&mut self, result: Result<LoadOutcome, ApiError>) -> Result<LoadOutcome, ApiError> {
        match &result {
            Ok(LoadOutcome::Appended { .. }) => {
                self.last_error = None;
                self.render_grid(false, false);
                self.ensure_sentinel();
                self.save_view_state();
            }
            Ok(LoadOutcome::Skipped) | Ok(LoadOutcome::Stale) | Ok(LoadOutcome::Queued) => {}
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.render_grid(false, false);
            }
        }
        result
    }

    fn maybe_prefetch(&mut self) -> PrefetchDecision {
        if !self.on_view() || self.hydration.is_some() {
            return PrefetchDecision::Ineligible;
        }
        let focused = match self.nav.focus() {
            Some(Focus::Grid(i)) => Some(i),
            _ => None,
        };
        let proximity = Proximity {
            scroll_y: self.grid.scroll_y(),
            viewport_height: self.grid.viewport_height(),
            content_height: self.grid.content_height(),
            focused,
            last_rendered: self.grid.last_rendered_position(),
            cols: self.grid.cols(),
        };
        let now = self.clock.now_ms();
        self.prefetcher.maybe_schedule(&self.paging, &proximity, now, &mut self.scheduler, Task::Prefetch)
    }

    /// Visibility report for the trailing marker
    pub fn sentinel_visible(&mut self, id: SentinelId, visible: bool, distance_to_bottom: f32) -> bool {
        if self.paging.done || !self.sentinel.should_fire(id, visible, self.paging.loading, distance_to_bottom) {
            return false;
        }
        log::debug!("Sentinel {:?} fired at {}", id, self.paging.start_index);
        self.load_more();
        true
    }

    fn check_sentinel(&mut self) {
        if !self.on_view() || self.hydration.is_some() {
            return;
        }
        let Some(id) = self.sentinel.attached() else {
            return;
        };
        let scroll_y = self.grid.scroll_y();
        let viewport_height = self.grid.viewport_height();
        let content_height = self.grid.content_height();
        let visible = marker_visible(scroll_y, viewport_height, content_height);
        self.sentinel_visible(id, visible, content_height - (scroll_y + viewport_height));
    }

    // Persistence

    /// Snapshot the open view; skipped while an id snapshot is still hydrating
    pub fn save_view_state(&mut self) -> Option<SaveReport> {
        if self.paging.collection_id.is_empty() || self.hydration.is_some() {
            return None;
        }
        Some(self.persistence.save_view_state(&self.paging.collection_id, &self.paging, self.grid.scroll_y()))
    }

    pub fn restore_view_state(&mut self, view_id: &str) -> Result<RestoreOutcome, ApiError> {
        if self.mode == FetchMode::Deferred {
            if let Some(snapshot) = self.persistence.read_snapshot(view_id) {
                if let SnapshotPayload::Ids { ids } = &snapshot.payload {
                    return Ok(self.begin_hydration(view_id, &snapshot, ids));
                }
            }
        }

        let mut hooks = ViewHooks {
            grid: &mut self.grid,
            sentinel: &mut self.sentinel,
            nav: &mut self.nav,
            indicator: &mut self.indicator,
            last_paint: &mut self.last_paint,
            shell_builds: &mut self.shell_builds,
            view_name: &self.view_name,
        };
        self.persistence.restore_view_state(view_id, &mut self.paging, self.source.as_ref(), &mut hooks)
    }

    fn begin_hydration(&mut self, view_id: &str, snapshot: &ViewStateSnapshot, ids: &[String]) -> RestoreOutcome {
        apply_cursor(view_id, snapshot, &mut self.paging);
        self.build_view_shell();
        self.render_grid(true, false);
        self.reattach_sentinel();

        if !ids.is_empty() {
            let generation = self.paging.generation;
            let batches = ids.chunks(self.persistence.hydrate_batch()).map(|c| c.to_vec()).collect();
            self.indicator = Some(RESTORING.to_string());
            self.hydration = Some(Hydration { generation, scroll_y: snapshot.scroll_y });
            self.requests.push(FetchRequest::Hydrate { generation, batches });
        }
        log::info!("Restoring {} ({} ids)", view_id, ids.len());
        RestoreOutcome::Restored { kind: SnapshotKind::Ids, scroll_y: snapshot.scroll_y }
    }

    /// Apply one hydrated batch of a `FetchRequest::Hydrate`
    pub fn complete_hydration_batch(&mut self, generation: u64, result: Result<Vec<Item>, ApiError>, last: bool) {
        let Some(hydration) = self.hydration else {
            return;
        };
        if hydration.generation != generation || self.paging.generation != generation {
            return;
        }

        match result {
            Ok(items) => {
                self.paging.append_hydrated(items);
                self.render_grid(true, false);
                if last {
                    self.hydration = None;
                    self.indicator = None;
                    self.grid.set_scroll(hydration.scroll_y);
                    self.scroll_request = Some(hydration.scroll_y);
                    self.render_grid(false, true);
                    self.save_view_state();
                }
            }
            Err(e) => {
                log::warn!("Restoring {} failed, loading fresh: {}", self.paging.collection_id, e);
                self.last_error = Some(e.to_string());
                let view_id = self.paging.collection_id.clone();
                self.paging.open(&view_id);
                self.reload(&view_id);
                self.scroll_request = Some(0.0);
            }
        }
    }

    /// Record the scroll offset reported by the shell
    pub fn update_scroll_position(&mut self, scroll_y: f32) {
        let scroll_y = scroll_y.max(0.0);
        if (scroll_y - self.grid.scroll_y()).abs() < 0.5 {
            return;
        }
        self.grid.set_scroll(scroll_y);
        self.render_grid(false, true);
        if self.on_view() {
            let now = self.clock.now_ms();
            self.scheduler.schedule(
                Task::ScrollPersist,
                now,
                Deferral::Timeout(self.timings.scroll_persist_debounce_ms),
            );
        }
        self.maybe_prefetch();
    }

    fn persist_scroll(&mut self) {
        if self.on_view() && !self.paging.collection_id.is_empty() {
            self.persistence.update_scroll_position(&self.paging.collection_id, self.grid.scroll_y());
        }
    }

    // Routing

    /// First route of the run; does not add a history entry
    pub fn start(&mut self, route: Route) -> Vec<SessionEvent> {
        let transition = self.history.replace(route);
        self.apply_transition(transition)
    }

    pub fn navigate(&mut self, route: Route) -> Vec<SessionEvent> {
        self.navigated = true;
        let transition = self.history.push(route);
        self.apply_transition(transition)
    }

    pub fn open_view(&mut self, view_id: &str) -> Vec<SessionEvent> {
        self.navigate(Route::view(view_id))
    }

    pub fn open_item(&mut self, route: Route) -> Vec<SessionEvent> {
        self.navigate(route)
    }

    pub fn back(&mut self) -> Vec<SessionEvent> {
        match self.history.back() {
            Some(transition) => self.apply_transition(transition),
            None => Vec::new(),
        }
    }

    fn apply_transition(&mut self, transition: Transition) -> Vec<SessionEvent> {
        if transition.from == transition.to {
            return Vec::new();
        }
        if transition.leaving_view.is_some() {
            self.scheduler.cancel_key(&Task::ScrollPersist);
            self.save_view_state();
        }
        log::info!("Route {} -> {}", transition.from.to_hash(), transition.to.to_hash());

        self.nav.set_route(transition.to.clone());
        match &transition.to {
            Route::View { view_id } => {
                let view_id = view_id.clone();
                self.enter_view(&view_id);
            }
            Route::Item { .. } | Route::Home => {
                self.sentinel.disconnect();
                self.scheduler.cancel_key(&Task::Prefetch);
                self.scheduler.cancel_key(&Task::SearchApply);
                self.pending_search = None;
            }
        }
        vec![SessionEvent::RouteChanged(transition.to)]
    }

    fn view_display_name(&self, view_id: &str) -> String {
        self.views
            .iter()
            .find(|v| v.id == view_id)
            .map(|v| v.display_name().to_string())
            .unwrap_or_else(|| DEFAULT_VIEW_NAME.to_string())
    }

    fn enter_view(&mut self, view_id: &str) {
        for task in [Task::SearchApply, Task::Prefetch, Task::ScrollPersist] {
            self.scheduler.cancel_key(&task);
        }
        self.pending_search = None;
        self.hydration = None;
        self.prefetcher.reset();
        self.view_name = self.view_display_name(view_id);
        self.grid.set_scroll(0.0);

        match self.restore_view_state(view_id) {
            Ok(RestoreOutcome::Restored { kind, scroll_y }) => {
                log::info!("Opened {} from {:?} snapshot", view_id, kind);
                if self.hydration.is_none() {
                    self.grid.set_scroll(scroll_y);
                    self.render_grid(false, true);
                }
                self.scroll_request = Some(scroll_y);
            }
            Ok(RestoreOutcome::Miss) => {
                log::info!("Opened {} fresh", view_id);
                self.paging.open(view_id);
                self.reload(view_id);
                self.scroll_request = Some(0.0);
            }
            Err(e) => {
                log::warn!("Restoring {} failed, loading fresh: {}", view_id, e);
                self.indicator = None;
                self.paging.open(view_id);
                self.reload(view_id);
                self.scroll_request = Some(0.0);
            }
        }
    }

    // Libraries

    /// Fetch the top-level libraries for the nav bar
    pub fn load_views(&mut self) {
        match self.mode {
            FetchMode::Inline => {
                let result = self.source.fetch_views();
                self.complete_views(result);
            }
            FetchMode::Deferred => self.requests.push(FetchRequest::Views),
        }
    }

    pub fn complete_views(&mut self, result: Result<Vec<Item>, ApiError>) {
        match result {
            Ok(views) => self.set_views(views),
            Err(e) => {
                log::warn!("Loading libraries failed: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
    }

    pub fn set_views(&mut self, views: Vec<Item>) {
        let mut entries = vec![ZoneEntry::new("Home", Route::Home)];
        entries.extend(views.iter().map(|v| ZoneEntry::new(v.display_name(), Route::view(&v.id))));
        self.nav.publish_nav(entries);
        self.views = views;
        if let Some(view_id) = self.history.current().view_id() {
            self.view_name = self.view_display_name(view_id);
        }
    }

    /// Startup landing: replace Home with the first library. Does nothing
    /// once the user has navigated or when there are no libraries.
    pub fn open_first_view(&mut self) -> Vec<SessionEvent> {
        if self.navigated || *self.history.current() != Route::Home {
            return Vec::new();
        }
        let Some(first) = self.views.first().map(|v| v.id.clone()) else {
            return Vec::new();
        };
        log::info!("Opening first library {}", first);
        self.start(Route::view(&first))
    }

    /// Snapshot, drop memoized lookups, re-fetch libraries and reload the view
    pub fn refresh(&mut self) {
        log::info!("Refreshing");
        self.save_view_state();
        self.source.invalidate();
        self.load_views();
        if let Some(view_id) = self.history.current().view_id().map(str::to_string) {
            self.reload(&view_id);
        }
    }

    /// Debounced search for the open view
    pub fn set_search_term(&mut self, term: &str) {
        if !self.on_view() {
            return;
        }
        self.pending_search = Some(term.to_string());
        let now = self.clock.now_ms();
        self.scheduler
            .schedule(Task::SearchApply, now, Deferral::Timeout(self.timings.search_debounce_ms));
    }

    fn apply_search(&mut self) {
        let Some(term) = self.pending_search.take() else {
            return;
        };
        if self.paging.set_search_term(&term) {
            self.grid.set_scroll(0.0);
            self.scroll_request = Some(0.0);
            let view_id = self.paging.collection_id.clone();
            self.reload(&view_id);
        }
    }

    // Keyboard

    pub fn set_text_input_active(&mut self, active: bool) {
        self.nav.set_text_input_active(active);
    }

    pub fn publish_item_zones(
        &mut self,
        seasons: Vec<ZoneEntry>,
        season_cols: usize,
        episodes: Vec<ZoneEntry>,
        rail: Vec<ZoneEntry>,
    ) {
        self.nav.publish_item_zones(seasons, season_cols, episodes, rail);
    }

    pub fn set_season_cols(&mut self, cols: usize) {
        self.nav.set_season_cols(cols);
    }

    /// Focus moved by pointer
    pub fn set_focus(&mut self, focus: Focus) -> Vec<SessionEvent> {
        let commands = self.nav.set_focus(focus).into_iter().collect();
        self.apply_nav_commands(commands)
    }

    pub fn focus_initial_in_view(&mut self, view_id: &str) -> Vec<SessionEvent> {
        let commands = self.nav.focus_initial_in_view(view_id);
        self.apply_nav_commands(commands)
    }

    pub fn handle_key(&mut self, press: KeyPress) -> Vec<SessionEvent> {
        let now = self.clock.now_ms();
        let commands = self.nav.handle_key(press, now);
        self.apply_nav_commands(commands)
    }

    fn apply_nav_commands(&mut self, commands: Vec<NavCommand>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        for command in commands {
            match command {
                NavCommand::FocusChanged(focus) => events.push(self.focus_changed(focus)),
                NavCommand::Navigate(route) => events.extend(self.navigate(route)),
                NavCommand::HistoryBack => events.extend(self.back()),
                NavCommand::LoadNextPage => self.load_more(),
                NavCommand::QuickJumpTyped(text) => {
                    let now = self.clock.now_ms();
                    self.quick_jump_overlay = Some(text);
                    self.scheduler
                        .schedule(Task::QuickJumpExec, now, Deferral::Timeout(self.timings.quick_jump_exec_ms));
                    self.scheduler
                        .schedule(Task::QuickJumpHide, now, Deferral::Timeout(self.timings.quick_jump_overlay_ms));
                }
            }
        }
        events
    }

    fn focus_changed(&mut self, focus: Focus) -> SessionEvent {
        if let Focus::Grid(position) = focus {
            let target = self.grid.scroll_to_reveal(position);
            if (target - self.grid.scroll_y()).abs() >= 0.5 {
                self.grid.set_scroll(target);
                self.scroll_request = Some(target);
                self.render_grid(false, true);
            }
            self.maybe_prefetch();
        }
        SessionEvent::FocusChanged(focus)
    }

    // Frame driver

    /// Run due tasks and the sentinel check; call once per frame
    pub fn tick(&mut self, idle: bool) -> Vec<SessionEvent> {
        let now = self.clock.now_ms();
        let mut events = Vec::new();
        for task in self.scheduler.poll(now, idle) {
            match task {
                Task::SearchApply => self.apply_search(),
                Task::ScrollPersist => self.persist_scroll(),
                Task::Prefetch => {
                    if self.on_view() && Prefetcher::should_run(&self.paging) {
                        log::debug!("Prefetching {} at {}", self.paging.collection_id, self.paging.start_index);
                        self.load_more();
                    }
                }
                Task::QuickJumpExec => {
                    if let Some(command) = self.nav.execute_quick_jump() {
                        events.extend(self.apply_nav_commands(vec![command]));
                    }
                }
                Task::QuickJumpHide => self.quick_jump_overlay = None,
            }
        }
        self.check_sentinel();
        events
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
