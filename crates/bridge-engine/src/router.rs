//! Inbound event dispatch.
//!
//! Every raw event goes through echo suppression first, then an
//! exhaustive match on its kind. Each handler runs inside a fault
//! boundary: failures are logged and swallowed so one malformed event
//! can never halt processing of the ones behind it.

use std::sync::Arc;

use tracing::{debug, warn};

use bridge_core::{BridgeError, BridgeErrorCategory, EventKind, RawEvent, content};

use crate::{
    lock,
    session::SessionContext,
    sink::{MessageIn, ReplyRef, SinkError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryMode {
    Live,
    Archive,
}

/// Dispatches inbound raw events into normalized sink operations.
#[derive(Clone)]
pub struct EventRouter {
    ctx: Arc<SessionContext>,
}

impl EventRouter {
    /// Create a router over one session's context.
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Process one live event.
    pub async fn dispatch(&self, event: &RawEvent) {
        self.dispatch_inner(event, DeliveryMode::Live).await;
    }

    /// Process one event replayed from history: messages are
    /// delivered archive-tagged, everything else is skipped so replay
    /// cannot trigger live side effects or double-mutate the reaction
    /// state already fed by live sync.
    pub async fn dispatch_archived(&self, event: &RawEvent) {
        self.dispatch_inner(event, DeliveryMode::Archive).await;
    }

    async fn dispatch_inner(&self, event: &RawEvent, mode: DeliveryMode) {
        if lock(&self.ctx.echo).should_discard(&event.event_id) {
            debug!(event_id = %event.event_id, "ignoring an event this bridge has sent");
            return;
        }

        if mode == DeliveryMode::Archive
            && !matches!(event.kind, EventKind::Message | EventKind::Sticker)
        {
            debug!(event_id = %event.event_id, kind = event.kind.tag(), "not replaying from history");
            return;
        }

        let result = match &event.kind {
            EventKind::Message | EventKind::Sticker => self.on_message(event, mode).await,
            EventKind::Reaction => self.on_reaction(event).await,
            EventKind::Redaction => self.on_redaction(event).await,
            EventKind::Member => self.on_member(event).await,
            EventKind::Name => self.on_name(event).await,
            EventKind::Topic => self.on_topic(event).await,
            EventKind::Avatar => self.on_avatar(event).await,
            EventKind::Typing => self.on_typing(event).await,
            EventKind::Receipt => self.on_receipt(event).await,
            EventKind::Presence => self.on_presence(event).await,
            EventKind::Other(tag) => {
                debug!(event_id = %event.event_id, tag, "unhandled event kind");
                Ok(())
            }
        };

        // Fault boundary: inbound processing failures never propagate.
        if let Err(err) = result {
            warn!(
                event_id = %event.event_id,
                kind = event.kind.tag(),
                %err,
                "event handler failed; dropping event"
            );
        }
    }

    async fn on_message(&self, event: &RawEvent, mode: DeliveryMode) -> Result<(), BridgeError> {
        // Edits carry the replacement inline: deliver new content for
        // the existing id instead of a fresh message.
        if let Some(replacement) = content::synthesize_replacement(event) {
            let body = content::render_body(&replacement);
            return self
                .ctx
                .sink
                .deliver_correction(
                    &event.room_id,
                    &event.sender,
                    &replacement.event_id,
                    &body,
                    mode == DeliveryMode::Archive,
                )
                .await
                .map_err(sink_error);
        }

        let reply_to = match content::reply_target(&event.content) {
            Some(raw) => Some(self.build_reply_ref(&event.room_id, raw).await),
            None => None,
        };

        let message = MessageIn {
            event_id: event.event_id.clone(),
            body: content::render_body(event),
            timestamp_ms: event.origin_server_ts,
            reply_to,
            archive: mode == DeliveryMode::Archive,
        };
        self.ctx
            .sink
            .deliver_message(&event.room_id, &event.sender, message)
            .await
            .map_err(sink_error)
    }

    async fn build_reply_ref(&self, room_id: &str, raw_target: &str) -> ReplyRef {
        let canonical = self
            .ctx
            .resolver
            .resolve_original_id(room_id, raw_target)
            .await;
        let mut reply = ReplyRef {
            event_id: canonical.clone(),
            author: None,
            body: None,
        };
        if let Some(original) = self.ctx.resolver.fetch_event(room_id, &canonical).await {
            reply.body = Some(content::render_body(&original));
            reply.author = Some(original.sender);
        }
        reply
    }

    async fn on_reaction(&self, event: &RawEvent) -> Result<(), BridgeError> {
        let (raw_target, emoji) = content::annotation(&event.content).ok_or_else(|| {
            BridgeError::new(
                BridgeErrorCategory::Malformed,
                "missing_annotation",
                format!("reaction {} carries no annotation relation", event.event_id),
            )
        })?;

        let target = self
            .ctx
            .resolver
            .resolve_original_id(&event.room_id, raw_target)
            .await;

        let state = {
            let mut reactions = lock(&self.ctx.reactions);
            reactions.add(&event.room_id, &target, &event.sender, emoji, &event.event_id);
            reactions.aggregate(&event.room_id, &target)
        };

        // Re-emit the full aggregated state, not the delta, so the
        // target interface always reflects the complete current set.
        self.ctx
            .sink
            .deliver_reaction_state(&event.room_id, &target, state)
            .await
            .map_err(sink_error)
    }

    async fn on_redaction(&self, event: &RawEvent) -> Result<(), BridgeError> {
        let redacts = content::redaction_target(&event.content).ok_or_else(|| {
            BridgeError::new(
                BridgeErrorCategory::Malformed,
                "missing_redaction_target",
                format!("redaction {} names no target", event.event_id),
            )
        })?;

        let removed = lock(&self.ctx.reactions).remove(redacts);
        if let Some(removed) = removed {
            let target = self
                .ctx
                .resolver
                .resolve_original_id(&event.room_id, &removed.target)
                .await;
            let state = lock(&self.ctx.reactions).aggregate(&event.room_id, &target);
            return self
                .ctx
                .sink
                .deliver_reaction_state(&event.room_id, &target, state)
                .await
                .map_err(sink_error);
        }

        self.ctx
            .sink
            .deliver_retraction(
                &event.room_id,
                &event.sender,
                redacts,
                content::redaction_reason(&event.content),
            )
            .await
            .map_err(sink_error)
    }

    async fn on_member(&self, event: &RawEvent) -> Result<(), BridgeError> {
        let Some((membership, user_id)) = content::membership_change(&event.content) else {
            return Err(BridgeError::new(
                BridgeErrorCategory::Malformed,
                "missing_membership",
                format!("member event {} carries no membership", event.event_id),
            ));
        };

        match membership {
            "leave" => self
                .ctx
                .sink
                .participant_left(&event.room_id, user_id)
                .await
                .map_err(sink_error),
            // Joins surface when the participant first speaks; bans
            // and invites have no counterpart in the target interface.
            "join" | "ban" | "invite" => Ok(()),
            other => {
                debug!(membership = other, "unhandled membership transition");
                Ok(())
            }
        }
    }

    async fn on_name(&self, event: &RawEvent) -> Result<(), BridgeError> {
        let Some(name) = content::room_name(&event.content) else {
            return Ok(());
        };
        self.ctx
            .sink
            .room_name(&event.room_id, name)
            .await
            .map_err(sink_error)
    }

    async fn on_topic(&self, event: &RawEvent) -> Result<(), BridgeError> {
        let Some(topic) = content::room_topic(&event.content) else {
            return Ok(());
        };
        self.ctx
            .sink
            .room_topic(
                &event.room_id,
                topic,
                &event.sender,
                event.origin_server_ts,
            )
            .await
            .map_err(sink_error)
    }

    async fn on_avatar(&self, event: &RawEvent) -> Result<(), BridgeError> {
        let Some(url) = content::room_avatar_url(&event.content) else {
            return Ok(());
        };
        self.ctx
            .sink
            .room_avatar(&event.room_id, url)
            .await
            .map_err(sink_error)
    }

    async fn on_typing(&self, event: &RawEvent) -> Result<(), BridgeError> {
        for user_id in content::typing_user_ids(&event.content) {
            self.ctx
                .sink
                .set_typing(&event.room_id, user_id, true)
                .await
                .map_err(sink_error)?;
        }
        Ok(())
    }

    async fn on_receipt(&self, event: &RawEvent) -> Result<(), BridgeError> {
        for (user_id, read_event) in content::read_receipts(&event.content) {
            self.ctx
                .sink
                .set_read_marker(&event.room_id, user_id, read_event)
                .await
                .map_err(sink_error)?;
        }
        Ok(())
    }

    async fn on_presence(&self, event: &RawEvent) -> Result<(), BridgeError> {
        if event.sender == self.ctx.user_id {
            return Ok(());
        }
        let update = content::presence_update(&event.content);
        self.ctx
            .sink
            .set_presence(&event.sender, update)
            .await
            .map_err(sink_error)
    }
}

fn sink_error(err: SinkError) -> BridgeError {
    BridgeError::new(
        BridgeErrorCategory::Rejected,
        "sink_rejected",
        err.to_string(),
    )
}
