//! Bounded history replay at room-open time.
//!
//! When a room is opened the backfiller fetches a bounded page of
//! history anchored at the current sync position and replays messages
//! into the sink, oldest first and archive-tagged. A caller-supplied
//! watermark excludes everything already delivered in earlier runs.
//! Relation events (reactions, redactions) are deliberately not
//! replayed: replaying them would double-apply mutations the live
//! stream already fed through the reaction cache.

use std::sync::Arc;

use tracing::{debug, info};

use bridge_core::{BridgeError, EventKind, RawEvent};

use crate::{lock, router::EventRouter, session::SessionContext};

/// Marks the oldest message the embedder already holds. Replay only
/// delivers strictly older content; everything at or after the
/// watermark is already stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillWatermark {
    /// Id of the oldest already-stored message, excluded itself.
    pub oldest_event_id: Option<String>,
    /// Timestamp of that message in milliseconds since the epoch.
    pub oldest_timestamp_ms: Option<u64>,
}

impl BackfillWatermark {
    /// Whether replay must skip this event.
    pub fn excludes(&self, event: &RawEvent) -> bool {
        if self
            .oldest_event_id
            .as_deref()
            .is_some_and(|id| id == event.event_id)
        {
            return true;
        }
        self.oldest_timestamp_ms
            .is_some_and(|ts| event.origin_server_ts >= ts)
    }
}

/// Replays a bounded slice of room history through the router.
#[derive(Clone)]
pub struct HistoryBackfiller {
    ctx: Arc<SessionContext>,
    router: EventRouter,
}

impl HistoryBackfiller {
    /// Create a backfiller over one session's context.
    pub fn new(ctx: Arc<SessionContext>, router: EventRouter) -> Self {
        Self { ctx, router }
    }

    /// Fetch and replay history for `room_id`, oldest first. Returns
    /// the number of messages delivered.
    pub async fn backfill(
        &self,
        room_id: &str,
        watermark: &BackfillWatermark,
    ) -> Result<usize, BridgeError> {
        let anchor = lock(&self.ctx.last_sync_token).clone();
        let mut events = self
            .ctx
            .transport
            .fetch_history(
                room_id,
                self.ctx.config.max_history_fetch,
                anchor.as_deref(),
            )
            .await
            .map_err(|err| err.into_bridge_error("fetch_history"))?;
        events.reverse();

        let mut delivered = 0;
        for event in &events {
            if watermark.excludes(event) {
                debug!(event_id = %event.event_id, "already stored; not replaying");
                continue;
            }
            match event.kind {
                EventKind::Message | EventKind::Sticker => {
                    self.router.dispatch_archived(event).await;
                    delivered += 1;
                }
                EventKind::Reaction | EventKind::Redaction => {
                    debug!(
                        event_id = %event.event_id,
                        kind = event.kind.tag(),
                        "relations are not replayed from history"
                    );
                }
                _ => {
                    debug!(event_id = %event.event_id, kind = event.kind.tag(), "skipping from history");
                }
            }
        }

        info!(room_id, delivered, fetched = events.len(), "history backfill done");
        Ok(delivered)
    }
}
