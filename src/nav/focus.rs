//! Focus model and per-run focus memory

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    Nav,
    Grid,
    Season,
    Episode,
    Rail,
}

/// The focused element: always exactly one zone and an index inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Nav(usize),
    Grid(usize),
    Season(usize),
    Episode(usize),
    Rail(usize),
}

impl Focus {
    pub fn new(zone: ZoneKind, index: usize) -> Self {
        match zone {
            ZoneKind::Nav => Focus::Nav(index),
            ZoneKind::Grid => Focus::Grid(index),
            ZoneKind::Season => Focus::Season(index),
            ZoneKind::Episode => Focus::Episode(index),
            ZoneKind::Rail => Focus::Rail(index),
        }
    }

    pub fn zone(&self) -> ZoneKind {
        match self {
            Focus::Nav(_) => ZoneKind::Nav,
            Focus::Grid(_) => ZoneKind::Grid,
            Focus::Season(_) => ZoneKind::Season,
            Focus::Episode(_) => ZoneKind::Episode,
            Focus::Rail(_) => ZoneKind::Rail,
        }
    }

    pub fn index(&self) -> usize {
        match *self {
            Focus::Nav(i) | Focus::Grid(i) | Focus::Season(i) | Focus::Episode(i) | Focus::Rail(i) => i,
        }
    }
}

/// Last focused grid position per library view
#[derive(Debug, Default)]
pub struct NavFocus {
    by_view: HashMap<String, usize>,
}

impl NavFocus {
    pub fn get(&self, view_id: &str) -> Option<usize> {
        self.by_view.get(view_id).copied()
    }

    pub fn set(&mut self, view_id: &str, index: usize) {
        self.by_view.insert(view_id.to_string(), index);
    }
}

/// Last focused sub-list position per item page
#[derive(Debug, Default)]
pub struct ItemFocus {
    by_item: HashMap<String, HashMap<ZoneKind, usize>>,
}

impl ItemFocus {
    pub fn get(&self, item_id: &str, zone: ZoneKind) -> Option<usize> {
        self.by_item.get(item_id).and_then(|z| z.get(&zone)).copied()
    }

    pub fn set(&mut self, item_id: &str, zone: ZoneKind, index: usize) {
        self.by_item.entry(item_id.to_string()).or_default().insert(zone, index);
    }
}
