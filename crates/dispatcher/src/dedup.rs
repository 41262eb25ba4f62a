use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Request ids handled within the retention window.
///
/// Entries are kept in arrival order and evicted from the front on access,
/// so no timer is needed per id.
#[derive(Debug)]
pub struct ProcessedIdSet {
    retention: Duration,
    order: VecDeque<(Instant, String)>,
    members: HashSet<String>,
}

impl ProcessedIdSet {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    /// Record `id`. Returns false when it was already seen within the window.
    pub fn remember(&mut self, id: &str) -> bool {
        self.remember_at(id, Instant::now())
    }

    pub fn remember_at(&mut self, id: &str, now: Instant) -> bool {
        self.evict(now);
        if self.members.contains(id) {
            return false;
        }
        self.members.insert(id.to_string());
        self.order.push_back((now, id.to_string()));
        true
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        while let Some((seen_at, _)) = self.order.front() {
            if now.saturating_duration_since(*seen_at) < self.retention {
                break;
            }
            if let Some((_, id)) = self.order.pop_front() {
                self.members.remove(&id);
            }
        }
    }
}

/// Rejects navigations that arrive too soon after the last accepted one.
#[derive(Debug)]
pub struct NavigationDebouncer {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl NavigationDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    pub fn try_accept(&mut self) -> bool {
        self.try_accept_at(Instant::now())
    }

    pub fn try_accept_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}
