//! Trailing marker that requests the next page when it scrolls into view
//!
//! The marker is recreated every time the view shell is rebuilt, so each
//! attachment gets a fresh id. Visibility reports carry the id they were
//! observed for and are ignored once that attachment has been torn down.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SentinelId(u64);

#[derive(Debug)]
pub struct Sentinel {
    next_id: u64,
    attached: Option<SentinelId>,
    /// Max distance between viewport bottom and content bottom
    margin: f32,
}

impl Sentinel {
    pub fn new(margin: f32) -> Self {
        Self { next_id: 1, attached: None, margin: margin.max(0.0) }
    }

    /// Attach if nothing is attached yet
    pub fn ensure(&mut self) -> SentinelId {
        match self.attached {
            Some(id) => id,
            None => self.attach(),
        }
    }

    /// Tear down the current observer and attach a new one
    pub fn reattach(&mut self) -> SentinelId {
        self.disconnect();
        self.attach()
    }

    fn attach(&mut self) -> SentinelId {
        let id = SentinelId(self.next_id);
        self.next_id += 1;
        self.attached = Some(id);
        log::trace!("Sentinel {:?} attached", id);
        id
    }

    pub fn disconnect(&mut self) {
        if let Some(id) = self.attached.take() {
            log::trace!("Sentinel {:?} disconnected", id);
        }
    }

    pub fn attached(&self) -> Option<SentinelId> {
        self.attached
    }

    /// Whether a visibility report should trigger a page load
    pub fn should_fire(&self, id: SentinelId, visible: bool, loading: bool, distance_to_bottom: f32) -> bool {
        self.attached == Some(id) && visible && !loading && distance_to_bottom <= self.margin
    }
}

/// Visibility of a marker sitting at the bottom of `content_height`
pub fn marker_visible(scroll_y: f32, viewport_height: f32, content_height: f32) -> bool {
    content_height <= scroll_y + viewport_height
}
