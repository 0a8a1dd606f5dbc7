//! Background page prefetch
//!
//! Starts the next page fetch a little before the user reaches the end of
//! what is painted. Prefetch never fetches on its own: it schedules a task,
//! and when the task fires the owner runs the shared page loader, so the
//! loader's single-flight rule covers both this path and the sentinel.

use crate::config::Timings;
use crate::paging::ViewPagingState;
use crate::scheduler::{Deferral, Scheduler};

/// Where the user is relative to the end of the painted content
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Proximity {
    pub scroll_y: f32,
    pub viewport_height: f32,
    pub content_height: f32,
    /// Focused card position in the browsable list
    pub focused: Option<usize>,
    pub last_rendered: Option<usize>,
    pub cols: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchDecision {
    Scheduled,
    Ineligible,
    NotNearEnd,
    RateLimited,
}

pub struct Prefetcher {
    scroll_distance: f32,
    rows: usize,
    min_interval_ms: u64,
    deferral: Deferral,
    last_fired: Option<u64>,
}

impl Prefetcher {
    /// `idle_hint` is whether the shell can report idle frames; without it a
    /// short fixed delay is used instead.
    pub fn new(timings: &Timings, idle_hint: bool) -> Self {
        let deferral = if idle_hint {
            Deferral::Idle { timeout_ms: timings.prefetch_idle_timeout_ms }
        } else {
            Deferral::Timeout(timings.prefetch_fallback_delay_ms)
        };
        Self {
            scroll_distance: timings.prefetch_scroll_distance,
            rows: timings.prefetch_rows,
            min_interval_ms: timings.prefetch_min_interval_ms,
            deferral,
            last_fired: None,
        }
    }

    /// No prefetch while searching, loading or once the view is exhausted
    pub fn eligible(state: &ViewPagingState) -> bool {
        state.search_term.trim().is_empty() && !state.loading && !state.done
    }

    pub fn near_end(&self, p: &Proximity) -> bool {
        let remaining = p.content_height - (p.scroll_y + p.viewport_height);
        let scroll_near = remaining < self.scroll_distance;

        let focus_near = match (p.focused, p.last_rendered) {
            (Some(focused), Some(last)) => last.saturating_sub(focused) <= p.cols.max(1) * self.rows,
            _ => false,
        };
        scroll_near || focus_near
    }

    /// Check the gates and queue a prefetch task under `key`
    pub fn maybe_schedule<K: Clone + PartialEq>(
        &mut self,
        state: &ViewPagingState,
        proximity: &Proximity,
        now: u64,
        scheduler: &mut Scheduler<K>,
        key: K,
    ) -> PrefetchDecision {
        if !Self::eligible(state) {
            return PrefetchDecision::Ineligible;
        }
        if !self.near_end(proximity) {
            return PrefetchDecision::NotNearEnd;
        }
        if let Some(last) = self.last_fired {
            if now.saturating_sub(last) < self.min_interval_ms {
                return PrefetchDecision::RateLimited;
            }
        }
        self.last_fired = Some(now);
        scheduler.schedule(key, now, self.deferral);
        log::debug!(
            "Prefetch scheduled for {} at {} ({:?})",
            state.collection_id,
            state.start_index,
            self.deferral
        );
        PrefetchDecision::Scheduled
    }

    /// Called when the deferred task fires; the state may have moved on
    pub fn should_run(state: &ViewPagingState) -> bool {
        Self::eligible(state)
    }

    /// Forget the rate-limit window, used on view switch
    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}
