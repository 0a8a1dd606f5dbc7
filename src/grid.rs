//! Virtualized card grid
//!
//! Only the rows intersecting the viewport (plus a few rows of overscan) are
//! painted. The rest of the scrollable height is held by a top and a bottom
//! spacer so the scrollbar keeps its geometry while the list grows into the
//! thousands.

use std::ops::Range;

use crate::config::GridGeometry;
use crate::models::Item;
use crate::paging::ViewPagingState;

/// Column count and row pitch for the current width
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridMetrics {
    pub cols: usize,
    pub card_width: f32,
    /// Poster + footer + gap
    pub row_height: f32,
}

impl GridMetrics {
    pub fn measure(width: f32, geometry: &GridGeometry) -> Self {
        let gap = geometry.gap.max(0.0);
        let min_card = geometry.min_card_width.max(1.0);
        let width = if width.is_finite() { width.max(0.0) } else { 0.0 };

        let cols = (((width + gap) / (min_card + gap)).floor() as usize).max(1);
        let card_width = ((width - gap * (cols as f32 - 1.0)) / cols as f32).max(1.0);
        let row_height = card_width * geometry.card_aspect + geometry.footer_height + gap;
        Self { cols, card_width, row_height }
    }
}

/// Shell-supplied override of the measured metrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualizationMetrics {
    pub enabled: bool,
    pub cols: Option<usize>,
    pub row_height: Option<f32>,
}

impl Default for VirtualizationMetrics {
    fn default() -> Self {
        Self { enabled: true, cols: None, row_height: None }
    }
}

/// Half-open row range `[start_row, end_row)` out of `total_rows`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowWindow {
    pub start_row: usize,
    pub end_row: usize,
    pub total_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacers {
    pub top: f32,
    pub bottom: f32,
}

impl RowWindow {
    pub fn rendered_rows(&self) -> usize {
        self.end_row - self.start_row
    }

    pub fn spacers(&self, row_height: f32) -> Spacers {
        let row_height = row_height.max(0.0);
        Spacers {
            top: self.start_row as f32 * row_height,
            bottom: (self.total_rows - self.end_row) as f32 * row_height,
        }
    }

    /// Item indices covered by the window
    pub fn item_range(&self, cols: usize, count: usize) -> Range<usize> {
        let start = (self.start_row * cols).min(count);
        let end = (self.end_row * cols).min(count);
        start..end
    }
}

pub fn total_rows(count: usize, cols: usize) -> usize {
    count.div_ceil(cols.max(1))
}

/// Rows to paint for a scroll offset, clamped to `[0, total_rows]`
pub fn visible_window(
    total_rows: usize,
    row_height: f32,
    scroll_y: f32,
    viewport_height: f32,
    overscan: usize,
) -> RowWindow {
    if row_height <= 0.0 || !row_height.is_finite() {
        return RowWindow { start_row: 0, end_row: total_rows, total_rows };
    }
    let top = scroll_y.max(0.0);
    let first = (top / row_height).floor() as usize;
    let last = ((top + viewport_height.max(0.0)) / row_height).ceil() as usize;

    let start_row = first.saturating_sub(overscan).min(total_rows);
    let end_row = last.saturating_add(overscan).min(total_rows).max(start_row);
    RowWindow { start_row, end_row, total_rows }
}

/// Everything that decides which cards are on screen
#[derive(Debug, Clone, PartialEq, Eq)]
struct RenderSignature {
    count: usize,
    cols: usize,
    start_row: usize,
    end_row: usize,
    search_term: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridStatus {
    Idle,
    LoadingMore,
    End,
}

impl GridStatus {
    pub fn text(&self) -> &'static str {
        match self {
            GridStatus::Idle => "",
            GridStatus::LoadingMore => "Loading more…",
            GridStatus::End => "End of library.",
        }
    }
}

/// Result of one `render` call
#[derive(Debug, Clone, PartialEq)]
pub struct GridPaint {
    pub window: RowWindow,
    pub spacers: Spacers,
    /// Positions in the browsable list to paint
    pub cards: Range<usize>,
    pub cols: usize,
    pub row_height: f32,
    /// False when the signature matched the previous paint
    pub repainted: bool,
    /// Omitted on virtual-only ticks
    pub header: Option<String>,
    pub status: Option<GridStatus>,
}

pub struct GridRenderer {
    geometry: GridGeometry,
    measured: GridMetrics,
    overrides: VirtualizationMetrics,
    viewport_height: f32,
    scroll_y: f32,
    /// Indices into `ViewPagingState::items` of the browsable kinds
    browsable: Vec<usize>,
    scanned: usize,
    generation: Option<u64>,
    signature: Option<RenderSignature>,
    paint_count: u64,
}

impl GridRenderer {
    pub fn new(geometry: GridGeometry) -> Self {
        Self {
            geometry,
            measured: GridMetrics::measure(0.0, &geometry),
            overrides: VirtualizationMetrics::default(),
            viewport_height: 0.0,
            scroll_y: 0.0,
            browsable: Vec::new(),
            scanned: 0,
            generation: None,
            signature: None,
            paint_count: 0,
        }
    }

    /// Re-measure for a new content width; returns true when the column count changed
    pub fn resize(&mut self, width: f32, viewport_height: f32) -> bool {
        let old_cols = self.cols();
        self.measured = GridMetrics::measure(width, &self.geometry);
        self.viewport_height = viewport_height.max(0.0);
        old_cols != self.cols()
    }

    pub fn set_scroll(&mut self, scroll_y: f32) {
        self.scroll_y = scroll_y.max(0.0);
    }

    pub fn scroll_y(&self) -> f32 {
        self.scroll_y
    }

    pub fn viewport_height(&self) -> f32 {
        self.viewport_height
    }

    pub fn set_virtualization_metrics(&mut self, metrics: VirtualizationMetrics) {
        self.overrides = metrics;
        self.signature = None;
    }

    pub fn cols(&self) -> usize {
        self.overrides.cols.unwrap_or(self.measured.cols).max(1)
    }

    pub fn row_height(&self) -> f32 {
        self.overrides.row_height.unwrap_or(self.measured.row_height)
    }

    pub fn card_width(&self) -> f32 {
        self.measured.card_width
    }

    pub fn paint_count(&self) -> u64 {
        self.paint_count
    }

    /// Force the next render to repaint
    pub fn invalidate(&mut self) {
        self.signature = None;
    }

    pub fn browsable_len(&self) -> usize {
        self.browsable.len()
    }

    /// Item at a position of the browsable list
    pub fn browsable_item<'a>(&self, items: &'a [Item], position: usize) -> Option<&'a Item> {
        self.browsable.get(position).and_then(|&i| items.get(i))
    }

    pub fn browsable_items<'a>(&'a self, items: &'a [Item]) -> impl Iterator<Item = &'a Item> + 'a {
        self.browsable.iter().filter_map(move |&i| items.get(i))
    }

    /// Track the browsable subset. The item list only grows within one
    /// generation, so only the new tail needs scanning.
    fn sync_browsable(&mut self, state: &ViewPagingState, replace_all: bool) {
        let rescan = replace_all
            || self.generation != Some(state.generation)
            || state.items.len() < self.scanned;
        if rescan {
            self.browsable.clear();
            self.scanned = 0;
            self.generation = Some(state.generation);
            self.signature = None;
        }
        for (i, item) in state.items.iter().enumerate().skip(self.scanned) {
            if item.kind.is_browsable() {
                self.browsable.push(i);
            }
        }
        self.scanned = state.items.len();
    }

    pub fn content_height(&self) -> f32 {
        total_rows(self.browsable.len(), self.cols()) as f32 * self.row_height().max(0.0)
    }

    pub fn window(&self) -> RowWindow {
        let rows = total_rows(self.browsable.len(), self.cols());
        if !self.overrides.enabled {
            return RowWindow { start_row: 0, end_row: rows, total_rows: rows };
        }
        visible_window(rows, self.row_height(), self.scroll_y, self.viewport_height, self.geometry.overscan_rows)
    }

    /// Last browsable position painted by the previous render
    pub fn last_rendered_position(&self) -> Option<usize> {
        let sig = self.signature.as_ref()?;
        let end = (sig.end_row * sig.cols).min(sig.count);
        end.checked_sub(1)
    }

    /// Scroll offset that brings the card at `position` fully into view
    pub fn scroll_to_reveal(&self, position: usize) -> f32 {
        let rh = self.row_height().max(0.0);
        let row = position / self.cols();
        let top = row as f32 * rh;
        let bottom = top + rh;
        if top < self.scroll_y {
            top
        } else if bottom > self.scroll_y + self.viewport_height {
            (bottom - self.viewport_height).max(0.0)
        } else {
            self.scroll_y
        }
    }

    pub fn header_text(view_name: &str, state: &ViewPagingState) -> String {
        let mut header = format!("{} • Loaded {}", view_name, state.items.len());
        if state.total > 0 {
            header.push_str(&format!(" / {}", state.total));
        }
        if !state.search_term.is_empty() {
            header.push_str(&format!(" • Search: \"{}\"", state.search_term));
        }
        header
    }

    pub fn status_for(state: &ViewPagingState) -> GridStatus {
        if state.loading {
            GridStatus::LoadingMore
        } else if state.done {
            GridStatus::End
        } else {
            GridStatus::Idle
        }
    }

    /// Work out the visible window and whether it differs from the last paint
    pub fn render(
        &mut self,
        view_name: &str,
        state: &ViewPagingState,
        replace_all: bool,
        virtual_only_tick: bool,
    ) -> GridPaint {
        self.sync_browsable(state, replace_all);

        let cols = self.cols();
        let row_height = self.row_height();
        let window = self.window();
        let signature = RenderSignature {
            count: self.browsable.len(),
            cols,
            start_row: window.start_row,
            end_row: window.end_row,
            search_term: state.search_term.clone(),
        };

        let repainted = replace_all || self.signature.as_ref() != Some(&signature);
        if repainted {
            self.paint_count += 1;
            log::trace!(
                "Grid paint rows {}..{} of {} ({} cols)",
                window.start_row,
                window.end_row,
                window.total_rows,
                cols
            );
            self.signature = Some(signature);
        }

        let (header, status) = if virtual_only_tick {
            (None, None)
        } else {
            (Some(Self::header_text(view_name, state)), Some(Self::status_for(state)))
        };

        GridPaint {
            window,
            spacers: window.spacers(row_height),
            cards: window.item_range(cols, self.browsable.len()),
            cols,
            row_height,
            repainted,
            header,
            status,
        }
    }
}
