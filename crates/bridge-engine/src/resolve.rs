//! Canonicalization of event ids through edit chains.
//!
//! Relations on the wire (replies, reactions) may reference the id of
//! an edit rather than the logically original message. Every consumer
//! that needs a stable target identity canonicalizes through
//! [`IdResolutionCache::resolve_original_id`]: fetch the referenced
//! event, follow its replace relation if it has one, otherwise the id
//! is already canonical (a fixed point).

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Arc, Mutex as StdMutex},
};

use lru::LruCache;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use bridge_core::{RawEvent, content};

use crate::{
    lock,
    transport::{EventTransport, TransportError},
};

type Key = (String, String);

/// Bounded memoizing resolver from event id to canonical id.
///
/// Both memo layers are LRU-bounded. Resolution is single-flight per
/// key: concurrent requests for the same uncached id perform exactly
/// one transport fetch; late arrivals wait on the per-key guard and
/// then hit the freshly filled cache. Unknown or unfetchable ids
/// resolve to themselves, never to an error.
pub struct IdResolutionCache {
    transport: Arc<dyn EventTransport>,
    resolved: StdMutex<LruCache<Key, String>>,
    events: StdMutex<LruCache<Key, Option<RawEvent>>>,
    in_flight: StdMutex<HashMap<Key, Arc<AsyncMutex<()>>>>,
}

impl IdResolutionCache {
    /// Create a resolver over `transport` with the given cache
    /// capacities (clamped to at least one entry each).
    pub fn new(
        transport: Arc<dyn EventTransport>,
        resolved_capacity: usize,
        event_capacity: usize,
    ) -> Self {
        Self {
            transport,
            resolved: StdMutex::new(LruCache::new(bounded(resolved_capacity))),
            events: StdMutex::new(LruCache::new(bounded(event_capacity))),
            in_flight: StdMutex::new(HashMap::new()),
        }
    }

    /// Resolve an event id to its canonical (pre-edit) id.
    pub async fn resolve_original_id(&self, room_id: &str, event_id: &str) -> String {
        let key = (room_id.to_owned(), event_id.to_owned());
        if let Some(hit) = lock(&self.resolved).get(&key) {
            return hit.clone();
        }

        let guard = self.flight_guard(&key);
        let _held = guard.lock().await;

        // A concurrent resolution may have landed while we waited.
        if let Some(hit) = lock(&self.resolved).get(&key) {
            return hit.clone();
        }

        let canonical = match self.fetch_event_unguarded(room_id, event_id).await {
            Some(event) => content::replace_target(&event.content)
                .unwrap_or(event_id)
                .to_owned(),
            None => event_id.to_owned(),
        };
        lock(&self.resolved).put(key.clone(), canonical.clone());
        lock(&self.in_flight).remove(&key);
        canonical
    }

    /// Fetch an event through the bounded event cache, single-flight
    /// per key. `None` means unknown or unfetchable.
    pub async fn fetch_event(&self, room_id: &str, event_id: &str) -> Option<RawEvent> {
        let key = (room_id.to_owned(), event_id.to_owned());
        let guard = self.flight_guard(&key);
        let _held = guard.lock().await;
        let fetched = self.fetch_event_unguarded(room_id, event_id).await;
        lock(&self.in_flight).remove(&key);
        fetched
    }

    async fn fetch_event_unguarded(&self, room_id: &str, event_id: &str) -> Option<RawEvent> {
        let key = (room_id.to_owned(), event_id.to_owned());
        if let Some(cached) = lock(&self.events).get(&key) {
            return cached.clone();
        }

        let fetched = match self.transport.fetch_event(room_id, event_id).await {
            Ok(event) => Some(event),
            Err(TransportError::NotFound) => None,
            Err(err) => {
                debug!(room_id, event_id, %err, "event fetch failed; treating target as unknown");
                None
            }
        };
        lock(&self.events).put(key, fetched.clone());
        fetched
    }

    fn flight_guard(&self, key: &Key) -> Arc<AsyncMutex<()>> {
        lock(&self.in_flight)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

fn bounded(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN)
}
