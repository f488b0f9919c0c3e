//! Seam to the target chat-session interface.
//!
//! The sink is the narrow "can receive delivered content" capability:
//! the engine emits normalized operations into it and never learns
//! what message/participant/room objects look like on the other side.
//! Rejections during inbound replay are logged and dropped by the
//! router; only locally initiated operations surface them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bridge_core::{Affiliation, PresenceUpdate, Role};

/// Failures surfaced by the target interface.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The target interface refused the operation.
    #[error("rejected by chat interface: {0}")]
    Rejected(String),
    /// The target interface is not reachable right now.
    #[error("chat interface unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort context about the message a delivery replies to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyRef {
    /// Canonical id of the replied-to message.
    pub event_id: String,
    /// Author of the replied-to message, when it could be fetched.
    pub author: Option<String>,
    /// Rendered body of the replied-to message, when available.
    pub body: Option<String>,
}

/// One normalized inbound message delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageIn {
    /// Stable message id in the target interface.
    pub event_id: String,
    /// Display-ready body.
    pub body: String,
    /// Origin timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Reply context when the message is a reply.
    pub reply_to: Option<ReplyRef>,
    /// True for history replay: store it, but trigger no live side
    /// effects (notifications, typing resets, read markers).
    pub archive: bool,
}

/// Target chat interface.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Deliver a message from `sender` into `room`.
    async fn deliver_message(
        &self,
        room_id: &str,
        sender: &str,
        message: MessageIn,
    ) -> Result<(), SinkError>;

    /// Replace the body of an already-delivered message. `archive`
    /// carries the same meaning as [`MessageIn::archive`]: a
    /// correction replayed from history must not trigger live side
    /// effects.
    async fn deliver_correction(
        &self,
        room_id: &str,
        sender: &str,
        target: &str,
        new_body: &str,
        archive: bool,
    ) -> Result<(), SinkError>;

    /// Replace the full reaction state of a message: emoji → sorted
    /// reactor ids. An empty map clears all reactions.
    async fn deliver_reaction_state(
        &self,
        room_id: &str,
        target: &str,
        state: BTreeMap<String, Vec<String>>,
    ) -> Result<(), SinkError>;

    /// Retract an already-delivered message.
    async fn deliver_retraction(
        &self,
        room_id: &str,
        sender: &str,
        target: &str,
        reason: Option<&str>,
    ) -> Result<(), SinkError>;

    /// Show or clear a user's typing state.
    async fn set_typing(&self, room_id: &str, user_id: &str, typing: bool)
    -> Result<(), SinkError>;

    /// Move a user's read marker to an event.
    async fn set_read_marker(
        &self,
        room_id: &str,
        user_id: &str,
        event_id: &str,
    ) -> Result<(), SinkError>;

    /// Update a user's presence.
    async fn set_presence(&self, user_id: &str, update: PresenceUpdate)
    -> Result<(), SinkError>;

    /// Materialize a participant with its role pair.
    async fn participant_joined(
        &self,
        room_id: &str,
        user_id: &str,
        affiliation: Affiliation,
        role: Role,
    ) -> Result<(), SinkError>;

    /// Remove a participant from the room view.
    async fn participant_left(&self, room_id: &str, user_id: &str) -> Result<(), SinkError>;

    /// Update the room's display name.
    async fn room_name(&self, room_id: &str, name: &str) -> Result<(), SinkError>;

    /// Update the room's topic, with who set it and when.
    async fn room_topic(
        &self,
        room_id: &str,
        topic: &str,
        setter: &str,
        at_ms: u64,
    ) -> Result<(), SinkError>;

    /// Update the room's avatar URL.
    async fn room_avatar(&self, room_id: &str, url: &str) -> Result<(), SinkError>;

    /// Flag the room as larger than the membership fetch bound, so
    /// participants discovered later via backfill or live activity
    /// are retained rather than pruned.
    async fn mark_large_room(&self, room_id: &str) -> Result<(), SinkError>;
}
