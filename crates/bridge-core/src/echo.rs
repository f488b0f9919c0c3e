//! Suppression of self-originated echo from the event stream.
//!
//! The wire protocol redelivers the user's own actions through sync;
//! every outgoing send/react/redact marks its resulting event id here
//! and the router silently discards inbound events carrying a marked
//! id.

use std::collections::{HashSet, VecDeque};

/// Bounded set of event ids produced by this session's own outgoing
/// actions.
///
/// Capacity-bounded with oldest-marked-first eviction: once more than
/// `capacity` ids have been marked, the oldest are forgotten and
/// could in principle be redelivered without suppression. Redelivery
/// windows on the wire are far shorter than the default capacity, so
/// this is an accepted part of the contract rather than a bug.
#[derive(Debug)]
pub struct EchoSuppressor {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl EchoSuppressor {
    /// Default number of retained ids.
    pub const DEFAULT_CAPACITY: usize = 4096;

    /// Create a suppressor retaining at most `capacity` ids
    /// (`capacity >= 1`).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    /// Record an id produced by an outgoing action.
    pub fn mark(&mut self, event_id: impl Into<String>) {
        let event_id = event_id.into();
        if !self.ids.insert(event_id.clone()) {
            return;
        }
        self.order.push_back(event_id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }

    /// Whether an inbound event with this id is our own echo and must
    /// be discarded. Marked ids stay suppressed on every observation
    /// until evicted, not only the first.
    pub fn should_discard(&self, event_id: &str) -> bool {
        self.ids.contains(event_id)
    }
}

impl Default for EchoSuppressor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
