//! In-memory item source shared by the unit tests

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{ItemSource, Page, PageQuery};
use crate::error::ApiError;
use crate::models::{Item, ItemKind};

pub struct FakeSource {
    items: Vec<Item>,
    total_override: Option<usize>,
    fail_pages: AtomicBool,
    fail_ids: AtomicBool,
    page_calls: AtomicUsize,
    ids_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    view_calls: AtomicUsize,
    queries: Mutex<Vec<PageQuery>>,
}

impl FakeSource {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            total_override: None,
            fail_pages: AtomicBool::new(false),
            fail_ids: AtomicBool::new(false),
            page_calls: AtomicUsize::new(0),
            ids_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            view_calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// `n` movies with ids `item-0..` and names `Item 0000..`
    pub fn with_items(n: usize) -> Self {
        Self::new((0..n).map(|i| movie(i)).collect())
    }

    pub fn with_names(names: &[&str]) -> Self {
        Self::new(
            names
                .iter()
                .enumerate()
                .map(|(i, n)| Item::new(&format!("item-{}", i), n, ItemKind::Movie))
                .collect(),
        )
    }

    /// Report this total regardless of the catalogue size
    pub fn reporting_total(mut self, total: usize) -> Self {
        self.total_override = Some(total);
        self
    }

    pub fn fail_pages(&self, fail: bool) {
        self.fail_pages.store(fail, Ordering::SeqCst);
    }

    pub fn fail_ids(&self, fail: bool) {
        self.fail_ids.store(fail, Ordering::SeqCst);
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn ids_calls(&self) -> usize {
        self.ids_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn view_calls(&self) -> usize {
        self.view_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }
}

pub fn movie(i: usize) -> Item {
    let mut item = Item::new(&format!("item-{}", i), &format!("Item {:04}", i), ItemKind::Movie);
    item.production_year = Some(1980 + (i % 40) as i32);
    item.run_time_ticks = Some(60 * 90 * 10_000_000);
    item.overview = Some(format!("Overview of item {}", i));
    item
}

impl ItemSource for FakeSource {
    fn fetch_page(&self, query: &PageQuery) -> Result<Page, ApiError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut q) = self.queries.lock() {
            q.push(query.clone());
        }
        if self.fail_pages.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection refused".to_string()));
        }

        let term = query.search_term.to_lowercase();
        let matching: Vec<&Item> = self
            .items
            .iter()
            .filter(|i| term.is_empty() || i.name.to_lowercase().contains(&term))
            .collect();
        let items = matching
            .iter()
            .skip(query.start_index)
            .take(query.limit)
            .map(|i| (*i).clone())
            .collect();
        Ok(Page {
            items,
            total: self.total_override.unwrap_or(matching.len()),
        })
    }

    fn fetch_items_by_ids(&self, ids: &[String]) -> Result<Vec<Item>, ApiError> {
        self.ids_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ids.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection reset".to_string()));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.items.iter().find(|i| &i.id == id).cloned())
            .collect())
    }

    fn fetch_item_detail(&self, id: &str) -> Result<Item, ApiError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.items
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| ApiError::Status { code: 404, url: id.to_string(), body: String::new() })
    }

    fn fetch_views(&self) -> Result<Vec<Item>, ApiError> {
        self.view_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            Item::new("lib-movies", "Movies", ItemKind::Other),
            Item::new("lib-shows", "Shows", ItemKind::Other),
        ])
    }

    fn fetch_series_seasons(&self, _series_id: &str) -> Result<Vec<Item>, ApiError> {
        Ok(Vec::new())
    }

    fn fetch_season_episodes(&self, _series_id: &str, _season_id: &str) -> Result<Vec<Item>, ApiError> {
        Ok(Vec::new())
    }

    fn fetch_box_set_children(&self, _box_set_id: &str) -> Result<Vec<Item>, ApiError> {
        Ok(Vec::new())
    }
    /// A 60x90 PNG for every known item
    fn fetch_primary_image(&self, id: &str, _max_height: u32) -> Result<Vec<u8>, ApiError> {
        if !self.items.iter().any(|i| i.id == id) {
            return Err(ApiError::Status { code: 404, url: id.to_string(), body: String::new() });
        }
        let poster = image::RgbaImage::from_pixel(60, 90, image::Rgba([180, 60, 40, 255]));
        let mut out = Cursor::new(Vec::new());
        poster
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(out.into_inner())
    }
}
