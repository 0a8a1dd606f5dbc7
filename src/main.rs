//! Library Browser
//! A desktop browser for media-server libraries with incremental paging

// Hide console window on Windows release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use eframe::egui;
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use library_browser::api::{AuthSession, CachingSource, ItemSource, JellyfinClient, Page};
use library_browser::blurhash;
use library_browser::clock::{Clock, SystemClock};
use library_browser::config::{session_store_dir, AppConfig};
use library_browser::error::{ApiError, PosterError, StorageError};
use library_browser::models::{truncate, Item, ItemKind};
use library_browser::nav::{Focus, KeyPress, NavKey, ZoneEntry};
use library_browser::paging::PageTicket;
use library_browser::posters::{self, DecodedPoster, PosterCache};
use library_browser::router::Route;
use library_browser::session::{FetchMode, FetchRequest, Session, SessionEvent};
use library_browser::storage::{FileSessionStore, MemorySessionStore, SessionStore, KEY_PREFIX};

const CONSOLE_LINES: usize = 500;
const SEASON_CARD_WIDTH: f32 = 140.0;
const RAIL_CARD_WIDTH: f32 = 120.0;
const PLACEHOLDER_SIZE: [usize; 2] = [16, 24];

/// Get current time as HH:MM:SS (local)
fn timestamp_now() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Application icon: a 3x2 grid of poster cards on a slate tile
fn load_icon() -> egui::IconData {
    let size: usize = 64;
    let mut rgba = vec![0u8; size * size * 4];

    for y in 0..size {
        for x in 0..size {
            let idx = (y * size + x) * 4;
            let nx = x as f32 / size as f32;
            let ny = y as f32 / size as f32;

            let corner = 0.125;
            let dx = if nx < corner { corner - nx } else if nx > 1.0 - corner { nx - (1.0 - corner) } else { 0.0 };
            let dy = if ny < corner { corner - ny } else if ny > 1.0 - corner { ny - (1.0 - corner) } else { 0.0 };
            if dx * dx + dy * dy > corner * corner {
                continue;
            }

            // Cards: 3 columns x 2 rows inside a margin
            let gx = (nx - 0.12) / 0.76 * 3.0;
            let gy = (ny - 0.14) / 0.72 * 2.0;
            let in_grid = (0.0..3.0).contains(&gx) && (0.0..2.0).contains(&gy);
            let in_card = in_grid && gx.fract() > 0.12 && gx.fract() < 0.88 && gy.fract() > 0.08 && gy.fract() < 0.92;

            let pixel: [u8; 4] = if in_card {
                // Poster gradient, teal to amber down the card
                let t = gy.fract();
                [(38.0 + 200.0 * t) as u8, (166.0 - 20.0 * t) as u8, (154.0 - 110.0 * t) as u8, 255]
            } else {
                [30, 36, 48, 255]
            };
            rgba[idx..idx + 4].copy_from_slice(&pixel);
        }
    }

    egui::IconData {
        rgba,
        width: size as u32,
        height: size as u32,
    }
}

/// Everything an item page shows
struct ItemDetail {
    item: Item,
    seasons: Vec<Item>,
    episodes: Vec<Item>,
    children: Vec<Item>,
}

/// Background task messages
enum TaskResult {
    Connected(Result<AuthSession, ApiError>),
    ViewsLoaded(Result<Vec<Item>, ApiError>),
    PageLoaded {
        ticket: PageTicket,
        result: Result<Page, ApiError>,
    },
    HydrateBatch {
        generation: u64,
        result: Result<Vec<Item>, ApiError>,
        last: bool,
    },
    DetailLoaded {
        route: Route,
        result: Result<ItemDetail, ApiError>,
    },
    PosterLoaded {
        item_id: String,
        result: Result<DecodedPoster, PosterError>,
    },
}

/// Context for background fetch operations
struct FetchContext {
    source: Arc<dyn ItemSource>,
    sender: Sender<TaskResult>,
    ctx: egui::Context,
}

impl FetchContext {
    fn spawn<F>(&self, work: F)
    where
        F: FnOnce(&dyn ItemSource, &dyn Fn(TaskResult)) + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        let sender = self.sender.clone();
        let ctx = self.ctx.clone();
        thread::spawn(move || {
            let send = |result: TaskResult| {
                let _ = sender.send(result);
                ctx.request_repaint();
            };
            work(source.as_ref(), &send);
        });
    }
}

/// Durable store, or an in-memory one when the cache dir is unusable
enum ShellStore {
    File(FileSessionStore),
    Memory(MemorySessionStore),
}

impl ShellStore {
    fn open(config: &AppConfig) -> (Self, Option<StorageError>) {
        match FileSessionStore::open(&session_store_dir(), config.session_quota_chars) {
            Ok(store) => (ShellStore::File(store), None),
            Err(e) => (ShellStore::Memory(MemorySessionStore::new(config.session_quota_chars)), Some(e)),
        }
    }
}

impl SessionStore for ShellStore {
    fn get(&self, key: &str) -> Option<String> {
        match self {
            ShellStore::File(s) => s.get(key),
            ShellStore::Memory(s) => s.get(key),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        match self {
            ShellStore::File(s) => s.set(key, value),
            ShellStore::Memory(s) => s.set(key, value),
        }
    }

    fn remove(&mut self, key: &str) {
        match self {
            ShellStore::File(s) => s.remove(key),
            ShellStore::Memory(s) => s.remove(key),
        }
    }

    fn keys(&self) -> Vec<String> {
        match self {
            ShellStore::File(s) => s.keys(),
            ShellStore::Memory(s) => s.keys(),
        }
    }
}

/// Sign in with whatever credentials the config carries
fn authenticate(config: &AppConfig) -> Result<AuthSession, ApiError> {
    let client = JellyfinClient::new(&config.server_url, config.token(), &config.user_id, &config.device_id);

    let api_key = config.api_key.trim();
    if !api_key.is_empty() {
        let user_id = if config.user_id.is_empty() { client.resolve_user_id()? } else { config.user_id.clone() };
        return Ok(AuthSession { access_token: api_key.to_string(), user_id });
    }
    if !config.username.is_empty() {
        return client.authenticate_by_name(&config.username, &config.password);
    }
    if !config.access_token.is_empty() && !config.user_id.is_empty() {
        return Ok(AuthSession {
            access_token: config.access_token.clone(),
            user_id: config.user_id.clone(),
        });
    }
    Err(ApiError::NotConfigured("no API key or username configured".to_string()))
}

/// Detail plus whatever the item's kind lists under it
fn fetch_item_detail(source: &dyn ItemSource, route: &Route) -> Result<ItemDetail, ApiError> {
    let Route::Item { item_id, series_id, .. } = route else {
        return Err(ApiError::Malformed(format!("{} is not an item route", route.to_hash())));
    };
    let item = source.fetch_item_detail(item_id)?;
    let mut detail = ItemDetail { item, seasons: Vec::new(), episodes: Vec::new(), children: Vec::new() };

    match detail.item.kind {
        ItemKind::Series => {
            detail.seasons = source.fetch_series_seasons(&detail.item.id)?;
        }
        ItemKind::Season => {
            let series = series_id.clone().or_else(|| detail.item.parent_id.clone()).unwrap_or_default();
            detail.episodes = source.fetch_season_episodes(&series, &detail.item.id)?;
        }
        ItemKind::BoxSet => {
            let mut children = source.fetch_box_set_children(&detail.item.id)?;
            // Movies first, server order otherwise
            children.sort_by_key(|c| c.kind != ItemKind::Movie);
            detail.children = children;
        }
        _ => {}
    }
    Ok(detail)
}

fn columns_for(width: f32, card_width: f32, gap: f32) -> usize {
    (((width + gap) / (card_width + gap)).floor() as usize).max(1)
}

/// Card artwork: blur-hash placeholders by hash and loaded posters by item id
struct Artwork {
    /// `None` marks an undecodable hash
    placeholders: HashMap<String, Option<egui::TextureHandle>>,
    posters: PosterCache<egui::TextureHandle>,
    /// Item ids painted this frame without a poster
    wanted: Vec<String>,
}

impl Artwork {
    fn new() -> Self {
        Self {
            placeholders: HashMap::new(),
            posters: PosterCache::default(),
            wanted: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.placeholders.clear();
        self.posters.clear();
        self.wanted.clear();
    }

    fn placeholder(&mut self, ctx: &egui::Context, hash: &str) -> Option<egui::TextureId> {
        if let Some(cached) = self.placeholders.get(hash) {
            return cached.as_ref().map(|t| t.id());
        }
        let [w, h] = PLACEHOLDER_SIZE;
        let texture = match blurhash::decode(hash, w, h, 1.0) {
            Ok(pixels) => {
                let image = egui::ColorImage::from_rgba_unmultiplied([w, h], &pixels);
                Some(ctx.load_texture(format!("blurhash-{}", hash), image, egui::TextureOptions::LINEAR))
            }
            Err(e) => {
                log::debug!("Bad blur hash {:?}: {}", hash, e);
                None
            }
        };
        let id = texture.as_ref().map(|t| t.id());
        self.placeholders.insert(hash.to_string(), texture);
        id
    }

    /// Loaded poster for `item`, else its placeholder; queues a poster fetch
    fn texture_for(&mut self, ctx: &egui::Context, item: &Item) -> Option<egui::TextureId> {
        if let Some(poster) = self.posters.get(&item.id) {
            return Some(poster.id());
        }
        if !self.wanted.contains(&item.id) {
            self.wanted.push(item.id.clone());
        }
        item.primary_placeholder().and_then(|hash| self.placeholder(ctx, hash))
    }

    fn poster_loaded(&mut self, ctx: &egui::Context, item_id: &str, result: Result<DecodedPoster, PosterError>) {
        let texture = match result {
            Ok(poster) => {
                let image = egui::ColorImage::from_rgba_unmultiplied([poster.width, poster.height], &poster.rgba);
                Some(ctx.load_texture(format!("poster-{}", item_id), image, egui::TextureOptions::LINEAR))
            }
            Err(e) => {
                log::debug!("No poster for {}: {}", item_id, e);
                None
            }
        };
        self.posters.finish(item_id, texture);
    }
}

fn paint_poster(artwork: &mut Artwork, ui: &egui::Ui, rect: egui::Rect, item: &Item) {
    let texture = artwork.texture_for(ui.ctx(), item);
    let painter = ui.painter();
    match texture {
        Some(id) => {
            let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
            painter.image(id, rect, uv, egui::Color32::WHITE);
        }
        None => {
            let fill = item
                .primary_placeholder()
                .and_then(blurhash::average_color)
                .map(|[r, g, b]| egui::Color32::from_rgb(r, g, b))
                .unwrap_or(egui::Color32::from_gray(60));
            painter.rect_filled(rect, 6.0, fill);
        }
    }
    if let Some(count) = item.season_badge_count() {
        let badge = egui::Rect::from_min_size(rect.right_top() + egui::vec2(-34.0, 6.0), egui::vec2(28.0, 20.0));
        painter.rect_filled(badge, 10.0, egui::Color32::from_black_alpha(180));
        painter.text(
            badge.center(),
            egui::Align2::CENTER_CENTER,
            count.to_string(),
            egui::FontId::proportional(12.0),
            egui::Color32::WHITE,
        );
    }
}

/// Poster, focus ring and the two footer lines of one grid card
fn paint_card(artwork: &mut Artwork, ui: &egui::Ui, rect: egui::Rect, poster_height: f32, item: &Item, highlighted: bool) {
    if !ui.clip_rect().intersects(rect) {
        return;
    }
    let poster = egui::Rect::from_min_size(rect.min, egui::vec2(rect.width(), poster_height.min(rect.height())));
    paint_poster(artwork, ui, poster, item);

    let painter = ui.painter();
    if highlighted {
        painter.rect_stroke(
            poster.expand(2.0),
            6.0,
            egui::Stroke::new(2.0, ui.visuals().selection.stroke.color),
            egui::StrokeKind::Outside,
        );
    }
    painter.text(
        poster.left_bottom() + egui::vec2(0.0, 6.0),
        egui::Align2::LEFT_TOP,
        truncate(item.display_name(), 28),
        egui::FontId::proportional(14.0),
        ui.visuals().text_color(),
    );
    painter.text(
        poster.left_bottom() + egui::vec2(0.0, 26.0),
        egui::Align2::LEFT_TOP,
        item.subtitle(),
        egui::FontId::proportional(12.0),
        ui.visuals().weak_text_color(),
    );
}

fn main() -> Result<(), eframe::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let icon = load_icon();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1250.0, 760.0])
            .with_min_inner_size([640.0, 480.0])
            .with_icon(icon),
        vsync: true,
        hardware_acceleration: eframe::HardwareAcceleration::Preferred,
        ..Default::default()
    };

    eframe::run_native(
        "Library Browser",
        options,
        Box::new(|cc| {
            let app = LibraryApp::new(cc.egui_ctx.clone());
            if app.config.dark_mode {
                cc.egui_ctx.set_visuals(egui::Visuals::dark());
            } else {
                cc.egui_ctx.set_visuals(egui::Visuals::light());
            }
            Ok(Box::new(app))
        }),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Browse,
    Settings,
    Console,
}

/// Item page as last fetched
struct ItemPage {
    route: Route,
    detail: Option<ItemDetail>,
    error: Option<String>,
}

struct LibraryApp {
    config: AppConfig,
    clock: SystemClock,
    ctx: egui::Context,

    // Connection
    session: Option<Session<ShellStore>>,
    source: Option<Arc<dyn ItemSource>>,
    connecting: bool,

    // UI state
    current_tab: Tab,
    search_text: String,
    pending_scroll_restore: Option<f32>,
    scroll_focus: Option<Focus>,
    item_page: Option<ItemPage>,
    titles: HashMap<String, String>,
    artwork: Artwork,
    in_flight: usize,
    status_message: String,

    // Background tasks
    task_sender: Sender<TaskResult>,
    task_receiver: Receiver<TaskResult>,

    console_log: Vec<String>,
}

impl LibraryApp {
    fn new(ctx: egui::Context) -> Self {
        let mut config = AppConfig::load();
        config.ensure_device_id();
        let (task_sender, task_receiver) = channel();

        let mut app = Self {
            config,
            clock: SystemClock::new(),
            ctx,
            session: None,
            source: None,
            connecting: false,
            current_tab: Tab::Browse,
            search_text: String::new(),
            pending_scroll_restore: None,
            scroll_focus: None,
            item_page: None,
            titles: HashMap::new(),
            artwork: Artwork::new(),
            in_flight: 0,
            status_message: "Not connected".to_string(),
            task_sender,
            task_receiver,
            console_log: Vec::new(),
        };
        app.log("[INFO] Library Browser started");

        let has_credentials = !app.config.api_key.trim().is_empty()
            || !app.config.username.is_empty()
            || !app.config.access_token.is_empty();
        if !app.config.server_url.trim().is_empty() && has_credentials {
            app.connect();
        } else {
            app.current_tab = Tab::Settings;
        }
        app
    }

    fn log(&mut self, message: &str) {
        let timestamp = timestamp_now();
        self.console_log.push(format!("[{}] {}", timestamp, message));
        // Keep last 500 lines
        if self.console_log.len() > CONSOLE_LINES {
            self.console_log.remove(0);
        }
    }

    fn connect(&mut self) {
        if self.connecting {
            return;
        }
        self.config.save();
        self.connecting = true;
        self.status_message = format!("Connecting to {}…", self.config.server_url.trim());
        self.log(&format!("[INFO] Connecting to {}", self.config.server_url.trim()));

        let config = self.config.clone();
        let sender = self.task_sender.clone();
        let ctx = self.ctx.clone();
        thread::spawn(move || {
            let _ = sender.send(TaskResult::Connected(authenticate(&config)));
            ctx.request_repaint();
        });
    }

    fn on_connected(&mut self, auth: AuthSession) {
        if self.config.api_key.trim().is_empty() {
            self.config.access_token = auth.access_token;
        }
        self.config.user_id = auth.user_id;
        self.config.save();

        let client = JellyfinClient::new(
            &self.config.server_url,
            self.config.token(),
            &self.config.user_id,
            &self.config.device_id,
        );
        let source: Arc<dyn ItemSource> = Arc::new(CachingSource::new(client));

        let (mut store, store_error) = ShellStore::open(&self.config);
        if let Some(e) = store_error {
            self.log(&format!("[WARN] Session store unavailable, keeping views in memory: {}", e));
        }
        if !self.config.restore_across_restarts {
            let cleared = store.remove_prefixed(KEY_PREFIX);
            if cleared > 0 {
                log::debug!("Cleared {} view snapshots from the previous run", cleared);
            }
        }

        let mut session = Session::new(
            &self.config,
            Arc::clone(&source),
            store,
            Box::new(self.clock),
            FetchMode::Deferred,
        );
        session.load_views();
        let events = session.start(Route::Home);

        self.source = Some(source);
        self.session = Some(session);
        self.artwork.clear();
        self.item_page = None;
        self.current_tab = Tab::Browse;
        self.status_message = "Connected".to_string();
        self.log(&format!("[INFO] Connected as user {}", self.config.user_id));
        self.handle_events(events, false);
    }

    /// Run the session's queued network work on worker threads
    fn dispatch_requests(&mut self) {
        let (Some(session), Some(source)) = (self.session.as_mut(), self.source.as_ref()) else {
            return;
        };
        let fetch = FetchContext {
            source: Arc::clone(source),
            sender: self.task_sender.clone(),
            ctx: self.ctx.clone(),
        };

        for request in session.take_requests() {
            self.in_flight += 1;
            match request {
                FetchRequest::Page(ticket) => fetch.spawn(move |source, send| {
                    let result = source.fetch_page(&ticket.query);
                    send(TaskResult::PageLoaded { ticket, result });
                }),
                FetchRequest::Hydrate { generation, batches } => fetch.spawn(move |source, send| {
                    let count = batches.len();
                    for (i, ids) in batches.iter().enumerate() {
                        let result = source.fetch_items_by_ids(ids);
                        let failed = result.is_err();
                        send(TaskResult::HydrateBatch { generation, result, last: failed || i + 1 == count });
                        if failed {
                            break;
                        }
                    }
                }),
                FetchRequest::Views => fetch.spawn(|source, send| {
                    send(TaskResult::ViewsLoaded(source.fetch_views()));
                }),
            }
        }
    }

    /// Fetch posters for cards painted this frame, within the fetch budget
    fn dispatch_posters(&mut self) {
        let wanted = std::mem::take(&mut self.artwork.wanted);
        let Some(source) = self.source.as_ref() else {
            return;
        };
        let fetch = FetchContext {
            source: Arc::clone(source),
            sender: self.task_sender.clone(),
            ctx: self.ctx.clone(),
        };
        for item_id in wanted {
            if !self.artwork.posters.begin(&item_id) {
                continue;
            }
            fetch.spawn(move |source, send| {
                let result = posters::load_poster(source, &item_id);
                send(TaskResult::PosterLoaded { item_id, result });
            });
        }
    }

    fn fetch_detail(&mut self, route: Route) {
        let Some(source) = self.source.as_ref() else {
            return;
        };
        let fetch = FetchContext {
            source: Arc::clone(source),
            sender: self.task_sender.clone(),
            ctx: self.ctx.clone(),
        };
        self.in_flight += 1;
        self.item_page = Some(ItemPage { route: route.clone(), detail: None, error: None });
        fetch.spawn(move |source, send| {
            let result = fetch_item_detail(source, &route);
            send(TaskResult::DetailLoaded { route, result });
        });
    }

    /// Process background task results (non-blocking)
    fn drain_tasks(&mut self) {
        while let Ok(result) = self.task_receiver.try_recv() {
            match result {
                TaskResult::Connected(Ok(auth)) => {
                    self.connecting = false;
                    self.on_connected(auth);
                }
                TaskResult::Connected(Err(e)) => {
                    self.connecting = false;
                    self.status_message = format!("Connection failed: {}", e);
                    self.log(&format!("[ERROR] Connection failed: {}", e));
                    self.current_tab = Tab::Settings;
                }
                TaskResult::ViewsLoaded(result) => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    match &result {
                        Ok(views) => self.log(&format!("[INFO] Loaded {} libraries", views.len())),
                        Err(e) => self.log(&format!("[ERROR] Loading libraries failed: {}", e)),
                    }
                    if let Some(session) = self.session.as_mut() {
                        session.complete_views(result);
                        let events = session.open_first_view();
                        self.handle_events(events, false);
                    }
                }
                TaskResult::PageLoaded { ticket, result } => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    let Some(session) = self.session.as_mut() else {
                        continue;
                    };
                    match session.complete_page_load(&ticket, result) {
                        Ok(outcome) => log::debug!("Page at {} applied: {:?}", ticket.query.start_index, outcome),
                        Err(e) => {
                            let message = format!("[ERROR] Page at {} failed: {}", ticket.query.start_index, e);
                            self.log(&message);
                        }
                    }
                }
                TaskResult::HydrateBatch { generation, result, last } => {
                    if last {
                        self.in_flight = self.in_flight.saturating_sub(1);
                    }
                    if let Err(e) = &result {
                        self.log(&format!("[WARN] Restoring list failed, reloading: {}", e));
                    }
                    if let Some(session) = self.session.as_mut() {
                        session.complete_hydration_batch(generation, result, last);
                    }
                }
                TaskResult::DetailLoaded { route, result } => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.apply_detail(route, result);
                }
                TaskResult::PosterLoaded { item_id, result } => {
                    self.artwork.poster_loaded(&self.ctx, &item_id, result);
                }
            }
        }
    }

    fn apply_detail(&mut self, route: Route, result: Result<ItemDetail, ApiError>) {
        let Some(page) = self.item_page.as_mut().filter(|p| p.route == route) else {
            log::debug!("Dropping detail for {}", route.to_hash());
            return;
        };
        let detail = match result {
            Ok(detail) => detail,
            Err(e) => {
                page.error = Some(e.to_string());
                self.log(&format!("[ERROR] Loading {} failed: {}", route.to_hash(), e));
                return;
            }
        };

        let item = &detail.item;
        let seasons = detail
            .seasons
            .iter()
            .map(|s| ZoneEntry::new(s.display_name(), Route::season(&s.id, &item.id)))
            .collect();
        let series_id = match &route {
            Route::Item { series_id, .. } => series_id.clone(),
            _ => None,
        };
        let episodes = detail
            .episodes
            .iter()
            .map(|e| {
                ZoneEntry::new(
                    e.display_name(),
                    Route::Item {
                        item_id: e.id.clone(),
                        series_id: series_id.clone(),
                        season_id: Some(item.id.clone()),
                        box_set_id: None,
                    },
                )
            })
            .collect();
        let rail = detail
            .children
            .iter()
            .map(|c| {
                ZoneEntry::new(
                    c.display_name(),
                    Route::Item {
                        item_id: c.id.clone(),
                        series_id: None,
                        season_id: None,
                        box_set_id: Some(item.id.clone()),
                    },
                )
            })
            .collect();

        self.titles.insert(item.id.clone(), item.display_name().to_string());
        let width = self.ctx.content_rect().width();
        if let Some(session) = self.session.as_mut() {
            session.publish_item_zones(seasons, columns_for(width, SEASON_CARD_WIDTH, 8.0), episodes, rail);
        }
        page.detail = Some(detail);
    }

    fn handle_events(&mut self, events: Vec<SessionEvent>, from_keyboard: bool) {
        for event in events {
            match event {
                SessionEvent::RouteChanged(route) => {
                    self.log(&format!("[INFO] Open {}", route.to_hash()));
                    match &route {
                        Route::Home => self.item_page = None,
                        Route::View { view_id } => {
                            self.item_page = None;
                            if let Some(session) = self.session.as_mut() {
                                self.search_text = session.paging().search_term.clone();
                                if from_keyboard {
                                    let view_id = view_id.clone();
                                    let more = session.focus_initial_in_view(&view_id);
                                    self.scroll_focus = more.iter().rev().find_map(|e| match e {
                                        SessionEvent::FocusChanged(f) => Some(*f),
                                        _ => None,
                                    });
                                }
                            }
                        }
                        Route::Item { .. } => self.fetch_detail(route.clone()),
                    }
                }
                SessionEvent::FocusChanged(focus) => self.scroll_focus = Some(focus),
            }
        }
    }

    /// Forward navigation keys of this frame to the session
    fn handle_keys(&mut self, ctx: &egui::Context) {
        if self.current_tab != Tab::Browse {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.set_text_input_active(ctx.wants_keyboard_input());

        let presses: Vec<KeyPress> = ctx.input(|i| {
            i.events
                .iter()
                .filter_map(|event| match event {
                    egui::Event::Key { key, pressed: true, modifiers, .. } => {
                        let nav = match key {
                            egui::Key::ArrowLeft => NavKey::Left,
                            egui::Key::ArrowRight => NavKey::Right,
                            egui::Key::ArrowUp => NavKey::Up,
                            egui::Key::ArrowDown => NavKey::Down,
                            egui::Key::Enter => NavKey::Activate,
                            egui::Key::Escape | egui::Key::Backspace => NavKey::Back,
                            _ => return None,
                        };
                        Some(KeyPress { key: nav, ctrl: modifiers.ctrl, alt: modifiers.alt, meta: modifiers.mac_cmd })
                    }
                    egui::Event::Text(text) => {
                        let mut chars = text.chars();
                        let ch = chars.next()?;
                        if chars.next().is_some() {
                            return None;
                        }
                        Some(KeyPress {
                            key: NavKey::Char(ch),
                            ctrl: i.modifiers.ctrl,
                            alt: i.modifiers.alt,
                            meta: i.modifiers.mac_cmd,
                        })
                    }
                    _ => None,
                })
                .collect()
        });

        let mut events = Vec::new();
        for press in presses {
            events.extend(session.handle_key(press));
        }
        self.handle_events(events, true);
    }

    fn show_top_panel(&mut self, ui: &mut egui::Ui) {
        ui.add_space(5.0);
        let mut events = Vec::new();
        let mut refetch = None;
        ui.horizontal(|ui| {
            ui.selectable_value(&mut self.current_tab, Tab::Browse, "📚 Browse");
            ui.selectable_value(&mut self.current_tab, Tab::Settings, "⚙ Settings");
            ui.selectable_value(&mut self.current_tab, Tab::Console, "🖥 Console");
            ui.separator();

            if let Some(session) = self.session.as_mut() {
                let can_back = session.history().can_go_back();
                if ui.add_enabled(can_back, egui::Button::new("⬅ Back")).clicked() {
                    events.extend(session.back());
                }
                if ui.button("🔄 Refresh").on_hover_text("Re-fetch libraries and reload this view").clicked() {
                    session.refresh();
                    self.artwork.clear();
                    refetch = session.route().is_item().then(|| session.route().clone());
                }

                if session.route().view_id().is_some() {
                    ui.separator();
                    let search = ui.add(
                        egui::TextEdit::singleline(&mut self.search_text)
                            .hint_text("Search this library")
                            .desired_width(220.0),
                    );
                    if search.changed() {
                        session.set_search_term(&self.search_text);
                    }
                }
            }
        });
        self.handle_events(events, false);
        if let Some(route) = refetch {
            self.fetch_detail(route);
        }
        ui.add_space(3.0);
        self.show_nav_bar(ui);
        ui.add_space(5.0);
    }

    /// Home plus one link per library; highlights the keyboard-focused link
    fn show_nav_bar(&mut self, ui: &mut egui::Ui) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let focused = match session.nav().focus() {
            Some(Focus::Nav(i)) => Some(i),
            _ => None,
        };
        let mut links = vec![("🏠 Home".to_string(), Route::Home)];
        links.extend(session.views().iter().map(|v| (v.display_name().to_string(), Route::view(&v.id))));

        let mut events = Vec::new();
        ui.horizontal_wrapped(|ui| {
            for (i, (label, route)) in links.into_iter().enumerate() {
                let active = session.route() == &route;
                let mut text = egui::RichText::new(label);
                if focused == Some(i) {
                    text = text.underline().strong();
                }
                let response = ui.selectable_label(active, text);
                if focused == Some(i) && self.scroll_focus == Some(Focus::Nav(i)) {
                    response.scroll_to_me(None);
                    self.scroll_focus = None;
                }
                if response.clicked() {
                    events.extend(session.set_focus(Focus::Nav(i)));
                    events.extend(session.navigate(route));
                }
            }
        });
        self.handle_events(events, false);
    }

    fn show_bottom_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let busy = self.connecting || self.in_flight > 0;
            if busy {
                ui.spinner();
            }
            if let Some(session) = self.session.as_ref() {
                if let Some(indicator) = session.indicator() {
                    ui.label(indicator);
                    ui.separator();
                }
                if let Some(error) = session.last_error() {
                    ui.colored_label(egui::Color32::from_rgb(230, 90, 90), truncate(error, 120));
                    ui.separator();
                }
                ui.label(egui::RichText::new(session.route().to_hash()).monospace().weak());
                ui.separator();
            }
            ui.label(&self.status_message);
        });
    }

    fn show_browse_tab(&mut self, ui: &mut egui::Ui) {
        let Some(route) = self.session.as_ref().map(|s| s.route().clone()) else {
            ui.vertical_centered(|ui| {
                ui.add_space(100.0);
                ui.heading("📚 Library Browser");
                ui.add_space(20.0);
                if self.connecting {
                    ui.spinner();
                } else {
                    ui.label("Set up a server under Settings to start browsing");
                }
            });
            return;
        };

        match route {
            Route::Home => self.show_home(ui),
            Route::View { .. } => self.show_grid(ui),
            Route::Item { .. } => self.show_item_page(ui),
        }
    }

    fn show_home(&mut self, ui: &mut egui::Ui) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        ui.heading("Libraries");
        ui.add_space(10.0);
        if session.views().is_empty() {
            ui.label(egui::RichText::new("No libraries loaded yet").weak());
            return;
        }

        let mut open = None;
        ui.horizontal_wrapped(|ui| {
            for view in session.views() {
                let label = format!("{}\n{}", view.display_name(), view.collection_type.as_deref().unwrap_or("mixed"));
                if ui.add_sized([180.0, 64.0], egui::Button::new(label)).clicked() {
                    open = Some(view.id.clone());
                }
            }
        });
        if let Some(view_id) = open {
            let events = session.open_view(&view_id);
            self.handle_events(events, false);
        }
    }

    /// Virtualized card grid of the open library
    fn show_grid(&mut self, ui: &mut egui::Ui) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Some(paint) = session.last_paint() {
            ui.horizontal(|ui| {
                if let Some(header) = &paint.header {
                    ui.heading(header);
                }
                if let Some(status) = paint.status {
                    ui.label(egui::RichText::new(status.text()).weak());
                }
            });
            ui.separator();
        }

        // Restore scroll position if pending
        if let Some(offset) = session.take_scroll_request() {
            self.pending_scroll_restore = Some(offset);
        }
        let mut scroll_area = egui::ScrollArea::vertical()
            .id_salt("grid_scroll")
            .auto_shrink([false, false]);
        if let Some(offset) = self.pending_scroll_restore.take() {
            scroll_area = scroll_area.vertical_scroll_offset(offset);
        }

        let geometry = self.config.grid;
        let artwork = &mut self.artwork;
        let mut clicked = None;
        scroll_area.show_viewport(ui, |ui, viewport| {
            session.set_viewport(ui.available_width(), viewport.height());
            session.update_scroll_position(viewport.min.y);

            let origin = ui.min_rect().min;
            ui.set_min_height(session.grid().content_height());

            let Some(paint) = session.last_paint().cloned() else {
                return;
            };
            let cols = paint.cols.max(1);
            let card_width = session.grid().card_width();
            let poster_height = card_width * geometry.card_aspect;
            let focused = match session.nav().focus() {
                Some(Focus::Grid(i)) => Some(i),
                _ => None,
            };

            for position in paint.cards.clone() {
                let Some(item) = session.card(position) else {
                    continue;
                };
                let (row, col) = (position / cols, position % cols);
                let min = origin
                    + egui::vec2(col as f32 * (card_width + geometry.gap), row as f32 * paint.row_height);
                let size = egui::vec2(card_width, (paint.row_height - geometry.gap).max(poster_height));
                let rect = egui::Rect::from_min_size(min, size);

                let response = ui.interact(rect, ui.id().with(("card", position)), egui::Sense::click());
                if response.clicked() {
                    clicked = Some((position, item.id.clone()));
                }
                let highlighted = focused == Some(position) || response.hovered();
                paint_card(artwork, ui, rect, poster_height, item, highlighted);
            }
        });

        if let Some((position, item_id)) = clicked {
            if let Some(session) = self.session.as_mut() {
                let mut events = session.set_focus(Focus::Grid(position));
                events.extend(session.open_item(Route::item(&item_id)));
                self.handle_events(events, false);
            }
        }
    }

    fn show_breadcrumbs(&mut self, ui: &mut egui::Ui) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let mut trail = session.history().breadcrumbs();
        trail.push(session.route().clone());

        let mut target = None;
        ui.horizontal_wrapped(|ui| {
            for (i, route) in trail.iter().enumerate() {
                if i > 0 {
                    ui.label("›");
                }
                let title = route
                    .item_id()
                    .and_then(|id| self.titles.get(id))
                    .map(|t| truncate(t, 40))
                    .unwrap_or_else(|| "…".to_string());
                if i + 1 == trail.len() {
                    ui.strong(title);
                } else if ui.link(title).clicked() {
                    target = Some(route.clone());
                }
            }
        });
        if let Some(route) = target {
            let events = session.navigate(route);
            self.handle_events(events, false);
        }
    }

    fn show_item_page(&mut self, ui: &mut egui::Ui) {
        self.show_breadcrumbs(ui);
        ui.separator();

        let Some(page) = self.item_page.take() else {
            ui.spinner();
            return;
        };
        if let Some(error) = &page.error {
            ui.colored_label(egui::Color32::from_rgb(230, 90, 90), error);
        }
        if page.detail.is_none() {
            if page.error.is_none() {
                ui.spinner();
            }
            self.item_page = Some(page);
            return;
        }
        let Some(detail) = page.detail.as_ref() else {
            return;
        };

        let focus = self.session.as_ref().and_then(|s| s.nav().focus());
        let mut open: Option<(Focus, Route)> = None;

        egui::ScrollArea::vertical()
            .id_salt("item_scroll")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                let item = &detail.item;
                ui.horizontal(|ui| {
                    let (rect, _) = ui.allocate_exact_size(egui::vec2(200.0, 300.0), egui::Sense::hover());
                    paint_poster(&mut self.artwork, ui, rect, item);
                    ui.vertical(|ui| {
                        ui.heading(item.display_name());
                        ui.label(egui::RichText::new(item.subtitle()).weak());
                        if let Some(rating) = &item.official_rating {
                            ui.label(rating);
                        }
                        if let Some(tagline) = item.taglines.first() {
                            ui.label(egui::RichText::new(tagline).italics());
                        }
                        if !item.genres.is_empty() {
                            ui.label(item.genres.join(", "));
                        }
                        if let Some(overview) = &item.overview {
                            ui.add_space(6.0);
                            ui.label(overview);
                        }
                        let cast: Vec<&str> =
                            item.people.iter().filter(|p| p.is_actor()).take(8).map(|p| p.name.as_str()).collect();
                        if !cast.is_empty() {
                            ui.add_space(6.0);
                            ui.label(egui::RichText::new(format!("Cast: {}", cast.join(", "))).weak());
                        }
                    });
                });

                if !detail.seasons.is_empty() {
                    ui.add_space(12.0);
                    ui.heading("Seasons");
                    ui.horizontal_wrapped(|ui| {
                        for (i, season) in detail.seasons.iter().enumerate() {
                            let label = match season.season_badge_count() {
                                Some(n) => format!("{} ({})", season.display_name(), n),
                                None => season.display_name().to_string(),
                            };
                            let selected = focus == Some(Focus::Season(i));
                            let response = ui.add_sized([SEASON_CARD_WIDTH, 48.0], egui::Button::new(label).selected(selected));
                            if selected && self.scroll_focus == focus {
                                response.scroll_to_me(None);
                            }
                            if response.clicked() {
                                open = Some((Focus::Season(i), Route::season(&season.id, &item.id)));
                            }
                        }
                    });
                }

                if !detail.episodes.is_empty() {
                    ui.add_space(12.0);
                    ui.heading("Episodes");
                    for (i, episode) in detail.episodes.iter().enumerate() {
                        let number = episode.index_number.map(|n| format!("{}. ", n)).unwrap_or_default();
                        let label = format!("{}{}  {}", number, episode.display_name(), episode.subtitle());
                        let selected = focus == Some(Focus::Episode(i));
                        let response = ui.selectable_label(selected, label);
                        if selected && self.scroll_focus == focus {
                            response.scroll_to_me(Some(egui::Align::Center));
                        }
                        if response.clicked() {
                            let route = Route::Item {
                                item_id: episode.id.clone(),
                                series_id: page.route_series_id(),
                                season_id: Some(item.id.clone()),
                                box_set_id: None,
                            };
                            open = Some((Focus::Episode(i), route));
                        }
                    }
                }

                if !detail.children.is_empty() {
                    ui.add_space(12.0);
                    ui.heading("In this collection");
                    egui::ScrollArea::horizontal().id_salt("rail_scroll").show(ui, |ui| {
                        ui.horizontal(|ui| {
                            for (i, child) in detail.children.iter().enumerate() {
                                let selected = focus == Some(Focus::Rail(i));
                                let label = truncate(child.display_name(), 18);
                                let response = ui.add_sized([RAIL_CARD_WIDTH, 48.0], egui::Button::new(label).selected(selected));
                                if selected && self.scroll_focus == focus {
                                    response.scroll_to_me(None);
                                }
                                if response.clicked() {
                                    let route = Route::Item {
                                        item_id: child.id.clone(),
                                        series_id: None,
                                        season_id: None,
                                        box_set_id: Some(item.id.clone()),
                                    };
                                    open = Some((Focus::Rail(i), route));
                                }
                            }
                        });
                    });
                }
            });

        if matches!(focus, Some(Focus::Season(_) | Focus::Episode(_) | Focus::Rail(_))) && self.scroll_focus == focus {
            self.scroll_focus = None;
        }
        let season_cols = columns_for(ui.available_width(), SEASON_CARD_WIDTH, ui.spacing().item_spacing.x);
        self.item_page = Some(page);

        if let Some(session) = self.session.as_mut() {
            session.set_season_cols(season_cols);
            if let Some((focus, route)) = open {
                let mut events = session.set_focus(focus);
                events.extend(session.open_item(route));
                self.handle_events(events, false);
            }
        }
    }

    fn show_settings_tab(&mut self, ui: &mut egui::Ui) {
        ui.heading("Server");
        ui.add_space(8.0);
        egui::Grid::new("settings_grid").num_columns(2).spacing([12.0, 8.0]).show(ui, |ui| {
            ui.label("Server URL:");
            ui.add(egui::TextEdit::singleline(&mut self.config.server_url).hint_text("http://host:8096").desired_width(320.0));
            ui.end_row();

            ui.label("API key:");
            ui.add(egui::TextEdit::singleline(&mut self.config.api_key).password(true).desired_width(320.0));
            ui.end_row();

            ui.label("Username:");
            ui.add(egui::TextEdit::singleline(&mut self.config.username).desired_width(320.0));
            ui.end_row();

            ui.label("Password:");
            ui.add(egui::TextEdit::singleline(&mut self.config.password).password(true).desired_width(320.0));
            ui.end_row();

            ui.label("Page size:");
            ui.add(egui::DragValue::new(&mut self.config.page_size).range(10..=500));
            ui.end_row();

            ui.label("Restore lists after restart:");
            ui.checkbox(&mut self.config.restore_across_restarts, "");
            ui.end_row();

            ui.label("Dark mode:");
            if ui.checkbox(&mut self.config.dark_mode, "").changed() {
                let visuals = if self.config.dark_mode { egui::Visuals::dark() } else { egui::Visuals::light() };
                ui.ctx().set_visuals(visuals);
                self.config.save();
            }
            ui.end_row();
        });

        ui.add_space(12.0);
        ui.horizontal(|ui| {
            let label = if self.session.is_some() { "🔌 Reconnect" } else { "🔌 Connect" };
            if ui.add_enabled(!self.connecting, egui::Button::new(label)).clicked() {
                if let Some(session) = self.session.as_mut() {
                    session.save_view_state();
                }
                self.session = None;
                self.source = None;
                self.in_flight = 0;
                self.connect();
            }
            if self.connecting {
                ui.spinner();
            }
        });
        ui.add_space(8.0);
        ui.label(egui::RichText::new(format!("Device id: {}", self.config.device_id)).weak());
    }

    fn show_console_tab(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("Console Log");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("🗑 Clear").clicked() {
                    self.console_log.clear();
                    self.console_log.push(format!("[{}] Console cleared", timestamp_now()));
                }
            });
        });
        ui.separator();

        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &self.console_log {
                    let color = if line.contains("[ERROR]") {
                        egui::Color32::RED
                    } else if line.contains("[WARN]") {
                        egui::Color32::YELLOW
                    } else if line.contains("[INFO]") {
                        egui::Color32::LIGHT_BLUE
                    } else {
                        egui::Color32::GRAY
                    };
                    ui.label(egui::RichText::new(line).monospace().color(color));
                }
            });
    }

    fn show_quick_jump_overlay(&self, ctx: &egui::Context) {
        let Some(text) = self.session.as_ref().and_then(|s| s.quick_jump_overlay()) else {
            return;
        };
        egui::Area::new(egui::Id::new("quick_jump_overlay"))
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .interactable(false)
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.label(egui::RichText::new(text).size(32.0).strong());
                });
            });
    }
}

impl ItemPage {
    fn route_series_id(&self) -> Option<String> {
        match &self.route {
            Route::Item { series_id, .. } => series_id.clone(),
            _ => None,
        }
    }
}

impl eframe::App for LibraryApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_tasks();
        self.handle_keys(ctx);

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            self.show_top_panel(ui);
        });

        egui::TopBottomPanel::bottom("bottom_panel").show(ctx, |ui| {
            self.show_bottom_panel(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| match self.current_tab {
            Tab::Browse => self.show_browse_tab(ui),
            Tab::Settings => self.show_settings_tab(ui),
            Tab::Console => self.show_console_tab(ui),
        });

        self.show_quick_jump_overlay(ctx);

        // Deferred work: debounces, idle prefetch, the sentinel check
        let idle = ctx.input(|i| i.events.is_empty() && !i.pointer.is_moving());
        if let Some(session) = self.session.as_mut() {
            let events = session.tick(idle);
            self.handle_events(events, true);
        }
        self.dispatch_requests();
        self.dispatch_posters();

        if self.connecting || self.in_flight > 0 {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
        if let Some(deadline) = self.session.as_ref().and_then(|s| s.next_deadline()) {
            let wait = deadline.saturating_sub(self.clock.now_ms());
            ctx.request_repaint_after(Duration::from_millis(wait.max(16)));
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if let Some(session) = self.session.as_mut() {
            session.save_view_state();
        }
        self.config.save();
    }
}
