//! Keyboard navigation across the nav bar, the library grid and the
//! sub-lists of an item page
//!
//! The engine keeps its own focus instead of asking the UI what is focused.
//! Renderers publish each zone's entries when they paint; the engine answers
//! key presses with commands for the shell to carry out.

pub mod focus;
pub mod quick_jump;

pub use focus::{Focus, ItemFocus, NavFocus, ZoneKind};
pub use quick_jump::{find_match, is_jump_char, QuickJump};

use crate::config::Timings;
use crate::router::Route;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Left,
    Right,
    Up,
    Down,
    /// Enter or space
    Activate,
    /// Escape or backspace
    Back,
    Char(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: NavKey,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl KeyPress {
    pub fn plain(key: NavKey) -> Self {
        Self { key, ctrl: false, alt: false, meta: false }
    }

    fn has_modifier(&self) -> bool {
        self.ctrl || self.alt || self.meta
    }
}

/// One focusable element of a zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneEntry {
    pub name: String,
    pub route: Route,
}

impl ZoneEntry {
    pub fn new(name: &str, route: Route) -> Self {
        Self { name: name.to_string(), route }
    }
}

#[derive(Debug, Default)]
struct Zone {
    entries: Vec<ZoneEntry>,
    cols: usize,
}

impl Zone {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clamp(&self, index: isize) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        Some(index.clamp(0, self.entries.len() as isize - 1) as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavCommand {
    /// Move keyboard focus and scroll the element into view
    FocusChanged(Focus),
    Navigate(Route),
    HistoryBack,
    /// Keyboard reached the end of the loaded grid
    LoadNextPage,
    /// A jump key was typed: show the overlay and arm the debounced search
    QuickJumpTyped(String),
}

/// Paging facts the grid rules depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PagingHint {
    pub loaded: usize,
    pub loading: bool,
    pub done: bool,
}

pub struct NavEngine {
    route: Route,
    active_view: Option<String>,
    focus: Option<Focus>,
    nav: Zone,
    grid: Zone,
    seasons: Zone,
    episodes: Zone,
    rail: Zone,
    nav_focus: NavFocus,
    item_focus: ItemFocus,
    quick_jump: QuickJump,
    text_input_active: bool,
    paging: PagingHint,
    near_end_items: usize,
}

impl NavEngine {
    pub fn new(timings: &Timings) -> Self {
        Self {
            route: Route::Home,
            active_view: None,
            focus: None,
            nav: Zone::default(),
            grid: Zone { entries: Vec::new(), cols: 1 },
            seasons: Zone { entries: Vec::new(), cols: 1 },
            episodes: Zone { entries: Vec::new(), cols: 1 },
            rail: Zone::default(),
            nav_focus: NavFocus::default(),
            item_focus: ItemFocus::default(),
            quick_jump: QuickJump::new(timings.quick_jump_reset_ms, timings.quick_jump_max_len),
            text_input_active: false,
            paging: PagingHint::default(),
            near_end_items: timings.keyboard_near_end_items,
        }
    }

    pub fn focus(&self) -> Option<Focus> {
        self.focus
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn active_view(&self) -> Option<&str> {
        self.active_view.as_deref()
    }

    /// New page: focus is dropped and the item zones are cleared
    pub fn set_route(&mut self, route: Route) {
        if let Route::View { view_id } = &route {
            self.active_view = Some(view_id.clone());
        }
        if route != self.route {
            self.focus = None;
            self.seasons.entries.clear();
            self.episodes.entries.clear();
            self.rail.entries.clear();
            if !matches!(route, Route::View { .. }) {
                self.grid.entries.clear();
            }
        }
        self.route = route;
    }

    /// Suspend key handling while a text field has keyboard focus
    pub fn set_text_input_active(&mut self, active: bool) {
        self.text_input_active = active;
    }

    pub fn set_paging_hint(&mut self, hint: PagingHint) {
        self.paging = hint;
    }

    pub fn publish_nav(&mut self, entries: Vec<ZoneEntry>) {
        self.nav.entries = entries;
        self.revalidate_focus();
    }

    pub fn publish_grid(&mut self, entries: Vec<ZoneEntry>, cols: usize) {
        self.grid.entries = entries;
        self.grid.cols = cols.max(1);
        self.revalidate_focus();
    }

    pub fn set_grid_cols(&mut self, cols: usize) {
        self.grid.cols = cols.max(1);
    }

    pub fn grid_len(&self) -> usize {
        self.grid.len()
    }

    pub fn publish_item_zones(
        &mut self,
        seasons: Vec<ZoneEntry>,
        season_cols: usize,
        episodes: Vec<ZoneEntry>,
        rail: Vec<ZoneEntry>,
    ) {
        self.seasons.entries = seasons;
        self.seasons.cols = season_cols.max(1);
        self.episodes.entries = episodes;
        self.rail.entries = rail;
        self.revalidate_focus();
    }

    pub fn set_season_cols(&mut self, cols: usize) {
        self.seasons.cols = cols.max(1);
    }

    pub fn remembered_grid_index(&self, view_id: &str) -> Option<usize> {
        self.nav_focus.get(view_id)
    }

    pub fn remembered_item_index(&self, item_id: &str, zone: ZoneKind) -> Option<usize> {
        self.item_focus.get(item_id, zone)
    }

    pub fn quick_jump_buffer(&self) -> &str {
        self.quick_jump.buffer()
    }

    /// Mouse clicks and hover move the keyboard focus too
    pub fn set_focus(&mut self, focus: Focus) -> Option<NavCommand> {
        self.focus_at(focus.zone(), focus.index() as isize)
    }

    fn zone(&self, kind: ZoneKind) -> &Zone {
        match kind {
            ZoneKind::Nav => &self.nav,
            ZoneKind::Grid => &self.grid,
            ZoneKind::Season => &self.seasons,
            ZoneKind::Episode => &self.episodes,
            ZoneKind::Rail => &self.rail,
        }
    }

    /// Entry under a focus, used for labels and activation
    pub fn entry(&self, focus: Focus) -> Option<&ZoneEntry> {
        self.zone(focus.zone()).entries.get(focus.index())
    }

    fn revalidate_focus(&mut self) {
        if let Some(f) = self.focus {
            let zone = self.zone(f.zone());
            if zone.is_empty() {
                self.focus = None;
            } else if f.index() >= zone.len() {
                self.focus = Some(Focus::new(f.zone(), zone.len() - 1));
            }
        }
    }

    /// Clamp into the zone, focus it and remember the position
    fn focus_at(&mut self, kind: ZoneKind, index: isize) -> Option<NavCommand> {
        let clamped = self.zone(kind).clamp(index)?;
        let focus = Focus::new(kind, clamped);
        self.focus = Some(focus);

        match kind {
            ZoneKind::Grid => {
                if let Some(view_id) = self.route.view_id() {
                    let view_id = view_id.to_string();
                    self.nav_focus.set(&view_id, clamped);
                }
            }
            ZoneKind::Season | ZoneKind::Episode | ZoneKind::Rail => {
                if let Some(item_id) = self.route.item_id() {
                    let item_id = item_id.to_string();
                    self.item_focus.set(&item_id, kind, clamped);
                }
            }
            ZoneKind::Nav => {}
        }
        Some(NavCommand::FocusChanged(focus))
    }

    /// Nav link of the open library, else the first link
    fn focus_active_view_nav(&mut self) -> Option<NavCommand> {
        let target = self.active_view.as_ref().and_then(|id| {
            let route = Route::view(id);
            self.nav.entries.iter().position(|e| e.route == route)
        });
        self.focus_at(ZoneKind::Nav, target.unwrap_or(0) as isize)
    }

    fn near_end_load(&self, index: usize) -> Option<NavCommand> {
        let near_end = index + self.near_end_items >= self.paging.loaded;
        if near_end && !self.paging.loading && !self.paging.done {
            Some(NavCommand::LoadNextPage)
        } else {
            None
        }
    }

    /// Focus the remembered card of a view (first card by default)
    pub fn focus_initial_in_view(&mut self, view_id: &str) -> Vec<NavCommand> {
        let index = self.nav_focus.get(view_id).unwrap_or(0);
        let mut commands: Vec<NavCommand> = self.focus_at(ZoneKind::Grid, index as isize).into_iter().collect();
        commands.extend(self.near_end_load(index));
        commands
    }

    /// Seasons, then episodes, then the rail, at the remembered position
    pub fn focus_initial_in_item(&mut self, item_id: &str) -> Option<NavCommand> {
        let kind = [ZoneKind::Season, ZoneKind::Episode, ZoneKind::Rail]
            .into_iter()
            .find(|k| !self.zone(*k).is_empty())?;
        let index = self.item_focus.get(item_id, kind).unwrap_or(0);
        self.focus_at(kind, index as isize)
    }

    fn activate(&self, focus: Focus) -> Vec<NavCommand> {
        self.entry(focus).map(|e| NavCommand::Navigate(e.route.clone())).into_iter().collect()
    }

    pub fn handle_key(&mut self, press: KeyPress, now: u64) -> Vec<NavCommand> {
        if self.text_input_active {
            return Vec::new();
        }

        if let NavKey::Char(ch) = press.key {
            if !press.has_modifier() && is_jump_char(ch) {
                self.quick_jump.push(ch, now);
                return vec![NavCommand::QuickJumpTyped(self.quick_jump.overlay_text())];
            }
            return Vec::new();
        }

        if press.key == NavKey::Back {
            return if self.route.is_item() { vec![NavCommand::HistoryBack] } else { Vec::new() };
        }

        match self.focus {
            Some(Focus::Nav(i)) => self.nav_key(press.key, i),
            Some(Focus::Season(i)) => self.season_key(press.key, i),
            Some(Focus::Episode(i)) if self.route.is_item() => self.episode_key(press.key, i),
            Some(Focus::Rail(i)) if self.route.is_item() => self.rail_key(press.key, i),
            _ => self.page_key(press.key),
        }
    }

    fn nav_key(&mut self, key: NavKey, i: usize) -> Vec<NavCommand> {
        let i = i as isize;
        match key {
            NavKey::Left => self.focus_at(ZoneKind::Nav, i - 1).into_iter().collect(),
            NavKey::Right => self.focus_at(ZoneKind::Nav, i + 1).into_iter().collect(),
            NavKey::Down => match self.route.clone() {
                Route::View { view_id } => self.focus_initial_in_view(&view_id),
                Route::Item { item_id, .. } => self.focus_initial_in_item(&item_id).into_iter().collect(),
                Route::Home => Vec::new(),
            },
            NavKey::Activate => self.activate(Focus::Nav(i as usize)),
            _ => Vec::new(),
        }
    }

    fn season_key(&mut self, key: NavKey, i: usize) -> Vec<NavCommand> {
        let cols = self.seasons.cols.max(1);
        let i = i as isize;
        let command = match key {
            NavKey::Left => self.focus_at(ZoneKind::Season, i - 1),
            NavKey::Right => self.focus_at(ZoneKind::Season, i + 1),
            NavKey::Up if i < cols as isize => self.focus_active_view_nav(),
            NavKey::Up => self.focus_at(ZoneKind::Season, i - cols as isize),
            NavKey::Down => self.focus_at(ZoneKind::Season, i + cols as isize),
            NavKey::Activate => return self.activate(Focus::Season(i as usize)),
            _ => None,
        };
        command.into_iter().collect()
    }

    fn episode_key(&mut self, key: NavKey, i: usize) -> Vec<NavCommand> {
        let i = i as isize;
        let command = match key {
            NavKey::Up if i <= 0 => self.focus_active_view_nav(),
            NavKey::Up => self.focus_at(ZoneKind::Episode, i - 1),
            NavKey::Down => self.focus_at(ZoneKind::Episode, i + 1),
            NavKey::Activate => return self.activate(Focus::Episode(i as usize)),
            _ => None,
        };
        command.into_iter().collect()
    }

    fn rail_key(&mut self, key: NavKey, i: usize) -> Vec<NavCommand> {
        let i = i as isize;
        let command = match key {
            NavKey::Left => self.focus_at(ZoneKind::Rail, i - 1),
            NavKey::Right => self.focus_at(ZoneKind::Rail, i + 1),
            NavKey::Up => self.focus_active_view_nav(),
            NavKey::Down if !self.episodes.is_empty() => self.focus_at(ZoneKind::Episode, 0),
            NavKey::Activate => return self.activate(Focus::Rail(i as usize)),
            _ => None,
        };
        command.into_iter().collect()
    }

    /// Keys with focus in the grid, or with nothing focused yet
    fn page_key(&mut self, key: NavKey) -> Vec<NavCommand> {
        match self.route.clone() {
            Route::Item { item_id, .. } => {
                if matches!(key, NavKey::Left | NavKey::Right | NavKey::Up | NavKey::Down) {
                    return self.focus_initial_in_item(&item_id).into_iter().collect();
                }
                Vec::new()
            }
            Route::View { view_id } => self.grid_key(key, &view_id),
            Route::Home => {
                if matches!(key, NavKey::Left | NavKey::Right | NavKey::Up | NavKey::Down) {
                    return self.focus_at(ZoneKind::Nav, 0).into_iter().collect();
                }
                Vec::new()
            }
        }
    }

    fn grid_key(&mut self, key: NavKey, view_id: &str) -> Vec<NavCommand> {
        let focused = match self.focus {
            Some(Focus::Grid(i)) => Some(i),
            _ => None,
        };
        let idx = focused.or_else(|| self.nav_focus.get(view_id)).unwrap_or(0) as isize;
        let cols = self.grid.cols.max(1) as isize;

        let target = match key {
            NavKey::Left => idx - 1,
            NavKey::Right => idx + 1,
            NavKey::Up if idx < cols => return self.focus_active_view_nav().into_iter().collect(),
            NavKey::Up => idx - cols,
            NavKey::Down => idx + cols,
            NavKey::Activate => {
                return match focused {
                    Some(i) => self.activate(Focus::Grid(i)),
                    None => Vec::new(),
                }
            }
            _ => return Vec::new(),
        };

        let mut commands: Vec<NavCommand> = self.focus_at(ZoneKind::Grid, target).into_iter().collect();
        if let Some(Focus::Grid(landed)) = self.focus {
            commands.extend(self.near_end_load(landed));
        }
        commands
    }

    /// Zone and starting index for a quick jump
    fn quick_jump_scope(&self) -> Option<(ZoneKind, Option<usize>)> {
        if let Some(f) = self.focus {
            return Some((f.zone(), Some(f.index())));
        }
        match &self.route {
            Route::Item { .. } => [ZoneKind::Season, ZoneKind::Episode, ZoneKind::Rail]
                .into_iter()
                .find(|k| !self.zone(*k).is_empty())
                .map(|k| (k, Some(0))),
            Route::View { view_id } if !self.grid.is_empty() => {
                Some((ZoneKind::Grid, Some(self.nav_focus.get(view_id).unwrap_or(0))))
            }
            _ if !self.nav.is_empty() => Some((ZoneKind::Nav, Some(0))),
            _ => None,
        }
    }

    /// Run the debounced search for the typed prefix
    pub fn execute_quick_jump(&mut self) -> Option<NavCommand> {
        let prefix = self.quick_jump.buffer().to_string();
        if prefix.is_empty() {
            return None;
        }
        let (kind, current) = self.quick_jump_scope()?;
        let names: Vec<&str> = self.zone(kind).entries.iter().map(|e| e.name.as_str()).collect();
        let hit = find_match(&names, &prefix, current)?;
        log::debug!("Quick jump {:?} -> {:?}[{}]", prefix, kind, hit);
        self.focus_at(kind, hit as isize)
    }
}
