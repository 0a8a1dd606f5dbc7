//! Deferred tasks with cancellation handles
//!
//! Debounced work (search, scroll persistence, quick jump) and idle-deferred
//! work (prefetch) are queued here by key. Scheduling a key that is already
//! pending cancels the pending task first, so at most one task per key exists.
//! The owner polls with the current time and an "idle" hint once per frame.

/// How a task waits before it becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    /// Due `ms` after scheduling
    Timeout(u64),
    /// Due on the first idle poll, or after `timeout_ms` at the latest
    Idle { timeout_ms: u64 },
}

/// Identifies one scheduled task; stale handles cancel nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

#[derive(Debug)]
struct Pending<K> {
    handle: TaskHandle,
    key: K,
    due_at: u64,
    on_idle: bool,
}

#[derive(Debug)]
pub struct Scheduler<K> {
    next_id: u64,
    pending: Vec<Pending<K>>,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self { next_id: 1, pending: Vec::new() }
    }
}

impl<K: Clone + PartialEq> Scheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key`, replacing any pending task with the same key
    pub fn schedule(&mut self, key: K, now: u64, deferral: Deferral) -> TaskHandle {
        self.cancel_key(&key);
        let handle = TaskHandle(self.next_id);
        self.next_id += 1;
        let (due_at, on_idle) = match deferral {
            Deferral::Timeout(ms) => (now.saturating_add(ms), false),
            Deferral::Idle { timeout_ms } => (now.saturating_add(timeout_ms), true),
        };
        self.pending.push(Pending { handle, key, due_at, on_idle });
        handle
    }

    /// Returns true if the task was still pending
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.handle != handle);
        self.pending.len() != before
    }

    pub fn cancel_key(&mut self, key: &K) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| &p.key != key);
        self.pending.len() != before
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.iter().any(|p| &p.key == key)
    }

    /// Remove and return every task that is due, in scheduling order
    pub fn poll(&mut self, now: u64, idle: bool) -> Vec<K> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            let p = &self.pending[i];
            if now >= p.due_at || (idle && p.on_idle) {
                due.push(self.pending.remove(i).key);
            } else {
                i += 1;
            }
        }
        due
    }

    /// Earliest deadline, used to ask the UI for a wake-up
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.iter().map(|p| p.due_at).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Job {
        Search,
        Scroll,
        Prefetch,
    }

    #[test]
    fn test_timeout_becomes_due() {
        let mut s = Scheduler::new();
        s.schedule(Job::Search, 1000, Deferral::Timeout(300));
        assert!(s.poll(1299, false).is_empty());
        assert_eq!(s.poll(1300, false), vec![Job::Search]);
        assert!(s.poll(5000, false).is_empty());
    }

    #[test]
    fn test_reschedule_cancels_pending() {
        let mut s = Scheduler::new();
        let first = s.schedule(Job::Search, 0, Deferral::Timeout(300));
        s.schedule(Job::Search, 200, Deferral::Timeout(300));
        assert!(!s.cancel(first));
        assert!(s.poll(300, false).is_empty());
        assert_eq!(s.poll(500, false), vec![Job::Search]);
    }

    #[test]
    fn test_idle_task_fires_early_on_idle() {
        let mut s = Scheduler::new();
        s.schedule(Job::Prefetch, 0, Deferral::Idle { timeout_ms: 800 });
        s.schedule(Job::Scroll, 0, Deferral::Timeout(200));
        assert_eq!(s.poll(10, true), vec![Job::Prefetch]);
        assert!(s.is_pending(&Job::Scroll));
    }

    #[test]
    fn test_idle_task_falls_back_to_timeout() {
        let mut s = Scheduler::new();
        s.schedule(Job::Prefetch, 0, Deferral::Idle { timeout_ms: 800 });
        assert!(s.poll(799, false).is_empty());
        assert_eq!(s.poll(800, false), vec![Job::Prefetch]);
    }

    #[test]
    fn test_cancel_by_handle_and_deadline() {
        let mut s = Scheduler::new();
        let h = s.schedule(Job::Scroll, 0, Deferral::Timeout(200));
        s.schedule(Job::Search, 0, Deferral::Timeout(300));
        assert_eq!(s.next_deadline(), Some(200));
        assert!(s.cancel(h));
        assert_eq!(s.next_deadline(), Some(300));
    }
}
