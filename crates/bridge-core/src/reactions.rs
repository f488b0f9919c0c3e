//! In-memory index of active reactions per (room, target message).
//!
//! The wire protocol delivers reactions as individual annotation
//! events and removals as redactions of those events; there is no
//! server-side aggregation. This cache keeps the net surviving set so
//! the full per-target state can be re-emitted on every change, and
//! backs the outbound diff-and-reconcile of the local user's
//! reactions.

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReactionKey {
    room: String,
    target: String,
    sender: String,
    emoji: String,
}

/// Where a removed reaction pointed: returned by
/// [`ReactionCache::remove`] so the caller can re-emit the remaining
/// state for that target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionTarget {
    /// Room the reaction lived in.
    pub room: String,
    /// Message the reaction targeted.
    pub target: String,
    /// User who had reacted.
    pub sender: String,
}

/// Reaction index keyed by `(room, target, sender, emoji)`.
///
/// A later add with the same key overwrites the stored reaction event
/// id; the overwritten id is forgotten and removing it later yields
/// `None`, matching an idempotent re-send on the wire.
#[derive(Debug, Default)]
pub struct ReactionCache {
    // (room, target) -> sender -> emoji -> reaction event id
    by_target: HashMap<(String, String), HashMap<String, BTreeMap<String, String>>>,
    // reaction event id -> full key, for redaction lookup
    by_event: HashMap<String, ReactionKey>,
}

impl ReactionCache {
    /// Record a reaction, overwriting any previous event id for the
    /// same `(room, target, sender, emoji)` key.
    pub fn add(&mut self, room: &str, target: &str, sender: &str, emoji: &str, event_id: &str) {
        let senders = self
            .by_target
            .entry((room.to_owned(), target.to_owned()))
            .or_default();
        let emojis = senders.entry(sender.to_owned()).or_default();
        if let Some(previous) = emojis.insert(emoji.to_owned(), event_id.to_owned()) {
            self.by_event.remove(&previous);
        }
        self.by_event.insert(
            event_id.to_owned(),
            ReactionKey {
                room: room.to_owned(),
                target: target.to_owned(),
                sender: sender.to_owned(),
                emoji: emoji.to_owned(),
            },
        );
    }

    /// One sender's surviving reactions on a target, as
    /// emoji → reaction event id.
    pub fn sender_reactions(
        &self,
        room: &str,
        target: &str,
        sender: &str,
    ) -> BTreeMap<String, String> {
        self.by_target
            .get(&(room.to_owned(), target.to_owned()))
            .and_then(|senders| senders.get(sender))
            .cloned()
            .unwrap_or_default()
    }

    /// Aggregated surviving state for a target, as emoji → sender ids.
    ///
    /// Senders are sorted so re-emitting the same state is
    /// deterministic.
    pub fn aggregate(&self, room: &str, target: &str) -> BTreeMap<String, Vec<String>> {
        let mut state: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(senders) = self.by_target.get(&(room.to_owned(), target.to_owned())) {
            for (sender, emojis) in senders {
                for emoji in emojis.keys() {
                    state.entry(emoji.clone()).or_default().push(sender.clone());
                }
            }
        }
        for senders in state.values_mut() {
            senders.sort();
        }
        state
    }

    /// Aggregated surviving state for a target, as emoji → sorted
    /// reaction event ids across all senders. Backs bulk operations
    /// that need the underlying events, like clearing a target.
    pub fn aggregate_event_ids(&self, room: &str, target: &str) -> BTreeMap<String, Vec<String>> {
        let mut state: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(senders) = self.by_target.get(&(room.to_owned(), target.to_owned())) {
            for emojis in senders.values() {
                for (emoji, event_id) in emojis {
                    state.entry(emoji.clone()).or_default().push(event_id.clone());
                }
            }
        }
        for ids in state.values_mut() {
            ids.sort();
        }
        state
    }

    /// Remove the record whose reaction event id matches, returning
    /// where it pointed.
    ///
    /// Unknown ids — already removed, or overwritten by a later add —
    /// yield `None`; they are not an error.
    pub fn remove(&mut self, reaction_event_id: &str) -> Option<ReactionTarget> {
        let key = self.by_event.remove(reaction_event_id)?;
        if let Some(senders) = self
            .by_target
            .get_mut(&(key.room.clone(), key.target.clone()))
        {
            if let Some(emojis) = senders.get_mut(&key.sender) {
                emojis.remove(&key.emoji);
                if emojis.is_empty() {
                    senders.remove(&key.sender);
                }
            }
            if senders.is_empty() {
                self.by_target.remove(&(key.room.clone(), key.target.clone()));
            }
        }
        Some(ReactionTarget {
            room: key.room,
            target: key.target,
            sender: key.sender,
        })
    }
}
