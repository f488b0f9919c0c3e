//! Seam to the transport collaborator that owns the actual network
//! client. The engine never retries on its own; failures are surfaced
//! as distinguishable values and the initiator decides.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use bridge_core::{
    BridgeError, BridgeErrorCategory, MemberRecord, PresenceState, RawEvent,
};

/// Failures surfaced by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The referenced event, room or user does not exist.
    #[error("not found")]
    NotFound,
    /// Rate-limited by the homeserver, optionally with a wait hint.
    #[error("rate limited")]
    RateLimited {
        /// Server-provided minimum wait before retrying.
        retry_after: Option<Duration>,
    },
    /// Transient network failure.
    #[error("network failure: {0}")]
    Network(String),
    /// The homeserver refused the operation.
    #[error("denied: {0}")]
    Denied(String),
    /// The response could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Convert into the stable error payload surfaced to callers of
    /// engine operations, under the given stable code.
    pub fn into_bridge_error(self, code: &str) -> BridgeError {
        let message = self.to_string();
        match self {
            Self::NotFound => BridgeError::new(BridgeErrorCategory::NotFound, code, message),
            Self::RateLimited { retry_after } => {
                let err = BridgeError::new(BridgeErrorCategory::RateLimited, code, message);
                match retry_after {
                    Some(delay) => err.with_retry_after(delay),
                    None => err,
                }
            }
            Self::Network(_) => BridgeError::new(BridgeErrorCategory::Transport, code, message),
            Self::Denied(_) => BridgeError::new(BridgeErrorCategory::Rejected, code, message),
            Self::Malformed(_) => BridgeError::new(BridgeErrorCategory::Malformed, code, message),
        }
    }

    /// Retry-after hint in milliseconds, when the failure carries one.
    pub fn retry_after_hint_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after: Some(delay),
            } => Some(delay.as_millis() as u64),
            _ => None,
        }
    }
}

/// One delivery from the transport's long poll: the raw events in
/// stream order plus the token marking the new sync position.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    /// Events in the order the transport delivered them.
    pub events: Vec<RawEvent>,
    /// Sync position after this batch; used as the history anchor.
    pub next_token: String,
}

/// Transport collaborator interface.
///
/// The transport flattens protocol-level siblings of each event's
/// content object (`redacts`, `state_key`, `membership`, typing and
/// receipt payloads) into the content it hands over; see
/// [`RawEvent`].
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Pull the next batch of raw events, blocking until one is
    /// available.
    async fn next_batch(&self) -> Result<SyncBatch, TransportError>;

    /// Fetch a single event by id.
    async fn fetch_event(&self, room_id: &str, event_id: &str)
    -> Result<RawEvent, TransportError>;

    /// Fetch up to `limit` historical events ending at `start_token`
    /// (or the current sync position when `None`), newest first.
    async fn fetch_history(
        &self,
        room_id: &str,
        limit: u16,
        start_token: Option<&str>,
    ) -> Result<Vec<RawEvent>, TransportError>;

    /// The room's membership view in stream order. May be partial
    /// when [`Self::members_synced`] is still false.
    async fn room_members(&self, room_id: &str) -> Result<Vec<MemberRecord>, TransportError>;

    /// Whether the membership view for the room is complete.
    async fn members_synced(&self, room_id: &str) -> bool;

    /// Send a message event; returns its event id.
    async fn send_message(&self, room_id: &str, content: Value) -> Result<String, TransportError>;

    /// Send a reaction annotation; returns the reaction's event id.
    async fn send_reaction(
        &self,
        room_id: &str,
        target: &str,
        emoji: &str,
    ) -> Result<String, TransportError>;

    /// Redact an event; returns the redaction's own event id, which
    /// the caller must echo-mark.
    async fn redact(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<String, TransportError>;

    /// Publish or clear the local user's typing state in a room.
    async fn set_typing(&self, room_id: &str, typing: bool) -> Result<(), TransportError>;

    /// Move the local user's read marker in a room.
    async fn set_read_marker(&self, room_id: &str, event_id: &str)
    -> Result<(), TransportError>;

    /// Publish the local user's presence.
    async fn set_presence(
        &self,
        state: PresenceState,
        status_msg: Option<&str>,
    ) -> Result<(), TransportError>;
}
