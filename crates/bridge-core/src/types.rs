use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of event kinds consumed by the bridge.
///
/// The wire protocol identifies events by a string type tag; every
/// tag the bridge reacts to gets its own variant so dispatch is an
/// exhaustive match instead of string inspection scattered through
/// handlers. Tags the bridge does not consume are preserved verbatim
/// in [`EventKind::Other`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    /// Room message (`m.room.message`).
    Message,
    /// Sticker (`m.sticker`), delivered through the message path.
    Sticker,
    /// Reaction annotation (`m.reaction`); the target and emoji live
    /// in the relation, not in a first-class field.
    Reaction,
    /// Redaction (`m.room.redaction`); tombstones another event.
    Redaction,
    /// Membership change (`m.room.member`).
    Member,
    /// Room name change (`m.room.name`).
    Name,
    /// Room topic change (`m.room.topic`).
    Topic,
    /// Room avatar change (`m.room.avatar`).
    Avatar,
    /// Ephemeral typing notice (`m.typing`).
    Typing,
    /// Ephemeral read receipt (`m.receipt`).
    Receipt,
    /// Presence update (`m.presence`).
    Presence,
    /// Any tag the bridge does not consume.
    Other(String),
}

impl EventKind {
    /// Map a wire type tag to its event kind.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "m.room.message" => Self::Message,
            "m.sticker" => Self::Sticker,
            "m.reaction" => Self::Reaction,
            "m.room.redaction" => Self::Redaction,
            "m.room.member" => Self::Member,
            "m.room.name" => Self::Name,
            "m.room.topic" => Self::Topic,
            "m.room.avatar" => Self::Avatar,
            "m.typing" => Self::Typing,
            "m.receipt" => Self::Receipt,
            "m.presence" => Self::Presence,
            other => Self::Other(other.to_owned()),
        }
    }

    /// The wire type tag for this kind.
    pub fn tag(&self) -> &str {
        match self {
            Self::Message => "m.room.message",
            Self::Sticker => "m.sticker",
            Self::Reaction => "m.reaction",
            Self::Redaction => "m.room.redaction",
            Self::Member => "m.room.member",
            Self::Name => "m.room.name",
            Self::Topic => "m.room.topic",
            Self::Avatar => "m.room.avatar",
            Self::Typing => "m.typing",
            Self::Receipt => "m.receipt",
            Self::Presence => "m.presence",
            Self::Other(tag) => tag,
        }
    }
}

/// One event as delivered by the transport. Immutable once received.
///
/// The transport flattens protocol-level siblings of the content
/// object (`redacts`, `state_key`, `membership`, receipt and typing
/// payloads) into `content`, so all structured fields live in one
/// place and the extraction helpers in [`crate::content`] can stay
/// uniform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawEvent {
    /// Globally unique event id.
    pub event_id: String,
    /// Room the event belongs to.
    pub room_id: String,
    /// Sender user id.
    pub sender: String,
    /// Server timestamp in milliseconds since the Unix epoch.
    pub origin_server_ts: u64,
    /// Event kind derived from the wire type tag.
    pub kind: EventKind,
    /// Opaque structured content.
    pub content: Value,
}

/// One room member as reported by the transport's membership view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberRecord {
    /// Member user id.
    pub user_id: String,
    /// Power level in `0..=100`.
    pub power_level: u8,
    /// Display name when the membership view has one.
    pub display_name: Option<String>,
}

/// Participant affiliation in the target chat interface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Affiliation {
    /// Room owner.
    Owner,
    /// Room administrator.
    Admin,
    /// Plain member.
    Member,
}

/// Participant role in the target chat interface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    /// Can moderate the room.
    Moderator,
    /// Regular participant.
    Participant,
}

/// Map a power level to the affiliation/role pair materialized into
/// the target interface.
///
/// 100 is the owner, anything at or above 50 is an admin, both
/// moderate; everyone else is a plain member.
pub fn role_pair(power_level: u8) -> (Affiliation, Role) {
    match power_level {
        100.. => (Affiliation::Owner, Role::Moderator),
        50..=99 => (Affiliation::Admin, Role::Moderator),
        _ => (Affiliation::Member, Role::Participant),
    }
}

/// Coarse presence state emitted to the target interface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PresenceState {
    /// User is currently active.
    Online,
    /// User is reachable but not active.
    Away,
    /// User is offline.
    Offline,
}

/// Normalized presence update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// Coarse online/away state.
    pub state: PresenceState,
    /// Free-form status message when set.
    pub status_msg: Option<String>,
    /// Milliseconds since the user was last active, when reported.
    pub last_active_ago_ms: Option<u64>,
}

impl PresenceUpdate {
    /// Build an update from the wire's liveness fields: a currently
    /// active user is online, anyone else with a presence event is
    /// away.
    pub fn from_liveness(
        currently_active: bool,
        status_msg: Option<String>,
        last_active_ago_ms: Option<u64>,
    ) -> Self {
        let state = if currently_active {
            PresenceState::Online
        } else {
            PresenceState::Away
        };
        Self {
            state,
            status_msg,
            last_active_ago_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_tags_both_ways() {
        assert_eq!(EventKind::from_tag("m.room.message"), EventKind::Message);
        assert_eq!(EventKind::from_tag("m.reaction"), EventKind::Reaction);
        assert_eq!(EventKind::Message.tag(), "m.room.message");
        assert_eq!(EventKind::Receipt.tag(), "m.receipt");
    }

    #[test]
    fn preserves_unknown_tags() {
        let kind = EventKind::from_tag("org.example.custom");
        assert_eq!(kind, EventKind::Other("org.example.custom".to_owned()));
        assert_eq!(kind.tag(), "org.example.custom");
    }

    #[test]
    fn maps_power_levels_to_role_pairs() {
        assert_eq!(role_pair(100), (Affiliation::Owner, Role::Moderator));
        assert_eq!(role_pair(75), (Affiliation::Admin, Role::Moderator));
        assert_eq!(role_pair(50), (Affiliation::Admin, Role::Moderator));
        assert_eq!(role_pair(49), (Affiliation::Member, Role::Participant));
        assert_eq!(role_pair(0), (Affiliation::Member, Role::Participant));
    }

    #[test]
    fn presence_liveness_mapping() {
        let online = PresenceUpdate::from_liveness(true, Some("hi".into()), Some(12));
        assert_eq!(online.state, PresenceState::Online);
        let away = PresenceUpdate::from_liveness(false, None, None);
        assert_eq!(away.state, PresenceState::Away);
    }
}
