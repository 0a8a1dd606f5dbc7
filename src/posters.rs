//! Card posters: fetch, decode and a bounded cache keyed by item id
//!
//! The shell paints a blur-hash placeholder until a poster is `Ready`. The
//! cache is generic over what it holds so the shell can keep GPU textures
//! in it while the tests keep plain values.

use std::collections::{HashMap, VecDeque};

use image::imageops::FilterType;

use crate::api::ItemSource;
use crate::error::PosterError;

/// Posters are requested at this height, like the web client's cards
pub const POSTER_MAX_HEIGHT: u32 = 420;
pub const DEFAULT_CAPACITY: usize = 300;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 6;

/// RGBA pixels ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPoster {
    pub width: usize,
    pub height: usize,
    pub rgba: Vec<u8>,
}

/// Decode image bytes, scaling anything taller than `max_height` down
pub fn decode_poster(bytes: &[u8], max_height: u32) -> Result<DecodedPoster, PosterError> {
    let mut image = image::load_from_memory(bytes)?;
    if image.height() > max_height {
        image = image.resize(u32::MAX, max_height, FilterType::Triangle);
    }
    let rgba = image.to_rgba8();
    Ok(DecodedPoster {
        width: rgba.width() as usize,
        height: rgba.height() as usize,
        rgba: rgba.into_raw(),
    })
}

/// Fetch and decode one poster; runs on a worker thread
pub fn load_poster(source: &dyn ItemSource, item_id: &str) -> Result<DecodedPoster, PosterError> {
    let bytes = source.fetch_primary_image(item_id, POSTER_MAX_HEIGHT)?;
    decode_poster(&bytes, POSTER_MAX_HEIGHT)
}

#[derive(Debug)]
enum Slot<T> {
    Pending,
    Ready(T),
    /// Not retried until the cache is cleared
    Failed,
}

/// Least-recently-used poster cache with a cap on concurrent fetches
#[derive(Debug)]
pub struct PosterCache<T> {
    slots: HashMap<String, Slot<T>>,
    order: VecDeque<String>,
    capacity: usize,
    in_flight: usize,
    max_in_flight: usize,
}

impl<T> Default for PosterCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MAX_IN_FLIGHT)
    }
}

impl<T> PosterCache<T> {
    pub fn new(capacity: usize, max_in_flight: usize) -> Self {
        Self {
            slots: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            in_flight: 0,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// The poster for `id`, if loaded; marks it recently used
    pub fn get(&mut self, id: &str) -> Option<&T> {
        if matches!(self.slots.get(id), Some(Slot::Ready(_))) {
            self.touch(id);
        }
        match self.slots.get(id) {
            Some(Slot::Ready(value)) => Some(value),
            _ => None,
        }
    }

    /// Claim a fetch for `id`. False when it is already known or the
    /// fetch budget is spent.
    pub fn begin(&mut self, id: &str) -> bool {
        if self.slots.contains_key(id) || self.in_flight >= self.max_in_flight {
            return false;
        }
        self.slots.insert(id.to_string(), Slot::Pending);
        self.order.push_back(id.to_string());
        self.in_flight += 1;
        self.evict();
        true
    }

    /// Record the end of a fetch claimed with `begin`
    pub fn finish(&mut self, id: &str, value: Option<T>) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        if !matches!(slot, Slot::Pending) {
            return;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        *slot = match value {
            Some(v) => Slot::Ready(v),
            None => Slot::Failed,
        };
        self.evict();
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
        self.in_flight = 0;
    }

    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == id) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }

    /// Drop the oldest settled entries past capacity; pending ones stay
    fn evict(&mut self) {
        let mut i = 0;
        while self.slots.len() > self.capacity && i < self.order.len() {
            let pending = matches!(self.slots.get(&self.order[i]), Some(Slot::Pending));
            if pending {
                i += 1;
                continue;
            }
            if let Some(key) = self.order.remove(i) {
                log::trace!("Evicting poster {}", key);
                self.slots.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;

    #[test]
    fn test_load_poster_decodes_rgba() {
        let source = FakeSource::with_items(3);
        let poster = load_poster(&source, "item-1").unwrap();
        assert_eq!((poster.width, poster.height), (60, 90));
        assert_eq!(poster.rgba.len(), 60 * 90 * 4);
        assert_eq!(&poster.rgba[..4], &[180, 60, 40, 255]);
    }

    #[test]
    fn test_tall_poster_is_scaled_to_max_height() {
        let source = FakeSource::with_items(1);
        let bytes = source.fetch_primary_image("item-0", POSTER_MAX_HEIGHT).unwrap();
        let poster = decode_poster(&bytes, 45).unwrap();
        assert_eq!((poster.width, poster.height), (30, 45));
    }

    #[test]
    fn test_load_poster_errors() {
        let source = FakeSource::with_items(1);
        assert!(matches!(load_poster(&source, "missing"), Err(PosterError::Fetch(_))));
        assert!(matches!(decode_poster(b"<html>", 100), Err(PosterError::Decode(_))));
    }

    #[test]
    fn test_begin_claims_each_id_once_within_budget() {
        let mut cache: PosterCache<u32> = PosterCache::new(10, 2);
        assert!(cache.begin("a"));
        assert!(!cache.begin("a"));
        assert!(cache.begin("b"));
        assert!(!cache.begin("c"));
        assert_eq!(cache.in_flight(), 2);

        cache.finish("a", Some(1));
        assert_eq!(cache.get("a"), Some(&1));
        assert!(cache.begin("c"));
        assert_eq!(cache.get("c"), None);
    }

    #[test]
    fn test_failed_poster_is_not_retried() {
        let mut cache: PosterCache<u32> = PosterCache::new(10, 2);
        assert!(cache.begin("a"));
        cache.finish("a", None);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.get("a"), None);
        assert!(!cache.begin("a"));

        cache.clear();
        assert!(cache.begin("a"));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache: PosterCache<u32> = PosterCache::new(2, 4);
        for (i, id) in ["a", "b"].iter().enumerate() {
            cache.begin(id);
            cache.finish(id, Some(i as u32));
        }
        cache.get("a");
        cache.begin("c");
        cache.finish("c", Some(2));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(&0));
        assert_eq!(cache.get("c"), Some(&2));
    }

    #[test]
    fn test_pending_fetches_survive_eviction() {
        let mut cache: PosterCache<u32> = PosterCache::new(1, 4);
        assert!(cache.begin("a"));
        assert!(cache.begin("b"));
        assert_eq!(cache.len(), 2);

        cache.finish("a", Some(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), None);
        cache.finish("b", Some(2));
        assert_eq!(cache.get("b"), Some(&2));
        assert_eq!(cache.in_flight(), 0);
    }
}
