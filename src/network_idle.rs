//! Network quiescence detection
//!
//! Tracks in-flight requests of a page load and reports when the page has had
//! at most `max_inflight` pending requests for a full `idle_window`.

use std::collections::HashSet;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct NetworkIdleTracker<Id> {
    inflight: HashSet<Id>,
    max_inflight: usize,
    idle_window: Duration,
    /// Start of the current quiet period; `None` while over the limit.
    quiet_since: Option<Instant>,
}

impl<Id: Eq + Hash> NetworkIdleTracker<Id> {
    pub fn new(max_inflight: usize, idle_window: Duration, now: Instant) -> Self {
        Self {
            inflight: HashSet::new(),
            max_inflight,
            idle_window,
            quiet_since: Some(now),
        }
    }

    pub fn request_started(&mut self, id: Id, now: Instant) {
        self.inflight.insert(id);
        self.update(now);
    }

    /// Unknown ids are ignored.
    pub fn request_finished(&mut self, id: &Id, now: Instant) {
        if self.inflight.remove(id) {
            self.update(now);
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Instant at which the page becomes idle if nothing else happens.
    pub fn idle_deadline(&self) -> Option<Instant> {
        self.quiet_since.map(|since| since + self.idle_window)
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        self.idle_deadline().is_some_and(|deadline| now >= deadline)
    }

    fn update(&mut self, now: Instant) {
        if self.inflight.len() > self.max_inflight {
            self.quiet_since = None;
        } else if self.quiet_since.is_none() {
            self.quiet_since = Some(now);
        }
    }
}
