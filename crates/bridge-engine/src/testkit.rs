//! Shared in-memory collaborators and event builders for tests.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};

use bridge_core::{
    Affiliation, EventKind, MemberRecord, PresenceState, PresenceUpdate, RawEvent, RetryPolicy,
    Role,
};

use crate::{
    config::BridgeConfig,
    lock,
    session::SessionContext,
    sink::{ChatSink, MessageIn, SinkError},
    transport::{EventTransport, SyncBatch, TransportError},
};

/// Scriptable in-memory transport.
#[derive(Default)]
pub(crate) struct StubTransport {
    events: StdMutex<HashMap<(String, String), RawEvent>>,
    batches: StdMutex<VecDeque<Result<SyncBatch, TransportError>>>,
    history: StdMutex<Vec<RawEvent>>,
    members: StdMutex<Vec<MemberRecord>>,
    members_synced: AtomicBool,
    fetch_delay_ms: AtomicU64,
    /// Count of single-event fetches, for single-flight assertions.
    pub fetch_calls: AtomicUsize,
    outbound_counter: AtomicUsize,
    sent_messages: StdMutex<Vec<(String, Value)>>,
    sent_reactions: StdMutex<Vec<(String, String, String)>>,
    redactions: StdMutex<Vec<(String, Option<String>)>>,
    typing_calls: StdMutex<Vec<(String, bool)>>,
}

impl StubTransport {
    pub fn put_event(&self, event: RawEvent) {
        lock(&self.events).insert((event.room_id.clone(), event.event_id.clone()), event);
    }

    pub fn push_batch(&self, events: Vec<RawEvent>, next_token: &str) {
        lock(&self.batches).push_back(Ok(SyncBatch {
            events,
            next_token: next_token.to_owned(),
        }));
    }

    pub fn push_batch_error(&self, error: TransportError) {
        lock(&self.batches).push_back(Err(error));
    }

    /// History page as the transport would return it: newest first.
    pub fn set_history(&self, events: Vec<RawEvent>) {
        *lock(&self.history) = events;
    }

    pub fn set_members(&self, members: Vec<MemberRecord>, synced: bool) {
        *lock(&self.members) = members;
        self.members_synced.store(synced, Ordering::SeqCst);
    }

    pub fn set_fetch_delay_ms(&self, delay: u64) {
        self.fetch_delay_ms.store(delay, Ordering::SeqCst);
    }

    pub fn sent_messages(&self) -> Vec<(String, Value)> {
        lock(&self.sent_messages).clone()
    }

    pub fn sent_reactions(&self) -> Vec<(String, String, String)> {
        lock(&self.sent_reactions).clone()
    }

    pub fn redactions(&self) -> Vec<(String, Option<String>)> {
        lock(&self.redactions).clone()
    }

    pub fn typing_calls(&self) -> Vec<(String, bool)> {
        lock(&self.typing_calls).clone()
    }

    fn next_outbound_id(&self, prefix: &str) -> String {
        let n = self.outbound_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("${prefix}-{n}")
    }
}

#[async_trait]
impl EventTransport for StubTransport {
    async fn next_batch(&self) -> Result<SyncBatch, TransportError> {
        let scripted = lock(&self.batches).pop_front();
        match scripted {
            Some(batch) => batch,
            // No more scripted batches: block like a real long poll.
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn fetch_event(
        &self,
        room_id: &str,
        event_id: &str,
    ) -> Result<RawEvent, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        lock(&self.events)
            .get(&(room_id.to_owned(), event_id.to_owned()))
            .cloned()
            .ok_or(TransportError::NotFound)
    }

    async fn fetch_history(
        &self,
        _room_id: &str,
        limit: u16,
        _start_token: Option<&str>,
    ) -> Result<Vec<RawEvent>, TransportError> {
        let mut events = lock(&self.history).clone();
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn room_members(&self, _room_id: &str) -> Result<Vec<MemberRecord>, TransportError> {
        Ok(lock(&self.members).clone())
    }

    async fn members_synced(&self, _room_id: &str) -> bool {
        self.members_synced.load(Ordering::SeqCst)
    }

    async fn send_message(&self, room_id: &str, content: Value) -> Result<String, TransportError> {
        let event_id = self.next_outbound_id("out");
        lock(&self.sent_messages).push((room_id.to_owned(), content));
        Ok(event_id)
    }

    async fn send_reaction(
        &self,
        room_id: &str,
        target: &str,
        emoji: &str,
    ) -> Result<String, TransportError> {
        let event_id = self.next_outbound_id("react");
        lock(&self.sent_reactions).push((room_id.to_owned(), target.to_owned(), emoji.to_owned()));
        Ok(event_id)
    }

    async fn redact(
        &self,
        _room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<String, TransportError> {
        let redaction_id = self.next_outbound_id("redact");
        lock(&self.redactions).push((event_id.to_owned(), reason.map(str::to_owned)));
        Ok(redaction_id)
    }

    async fn set_typing(&self, room_id: &str, typing: bool) -> Result<(), TransportError> {
        lock(&self.typing_calls).push((room_id.to_owned(), typing));
        Ok(())
    }

    async fn set_read_marker(
        &self,
        _room_id: &str,
        _event_id: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_presence(
        &self,
        _state: PresenceState,
        _status_msg: Option<&str>,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Everything the engine pushed into the sink, in call order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SinkCall {
    Message {
        room_id: String,
        sender: String,
        message: MessageIn,
    },
    Correction {
        room_id: String,
        sender: String,
        target: String,
        new_body: String,
        archive: bool,
    },
    ReactionState {
        room_id: String,
        target: String,
        state: BTreeMap<String, Vec<String>>,
    },
    Retraction {
        room_id: String,
        sender: String,
        target: String,
        reason: Option<String>,
    },
    Typing {
        room_id: String,
        user_id: String,
        typing: bool,
    },
    ReadMarker {
        room_id: String,
        user_id: String,
        event_id: String,
    },
    Presence {
        user_id: String,
        update: PresenceUpdate,
    },
    Joined {
        room_id: String,
        user_id: String,
        affiliation: Affiliation,
        role: Role,
    },
    Left {
        room_id: String,
        user_id: String,
    },
    RoomName {
        room_id: String,
        name: String,
    },
    RoomTopic {
        room_id: String,
        topic: String,
        setter: String,
        at_ms: u64,
    },
    RoomAvatar {
        room_id: String,
        url: String,
    },
    LargeRoom {
        room_id: String,
    },
}

/// Sink that records every call; bodies registered as failing are
/// rejected instead, for fault isolation tests.
#[derive(Default)]
pub(crate) struct RecordingSink {
    calls: StdMutex<Vec<SinkCall>>,
    failing_bodies: StdMutex<Vec<String>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        lock(&self.calls).clone()
    }

    pub fn fail_message_body(&self, body: &str) {
        lock(&self.failing_bodies).push(body.to_owned());
    }

    fn record(&self, call: SinkCall) -> Result<(), SinkError> {
        lock(&self.calls).push(call);
        Ok(())
    }
}

#[async_trait]
impl ChatSink for RecordingSink {
    async fn deliver_message(
        &self,
        room_id: &str,
        sender: &str,
        message: MessageIn,
    ) -> Result<(), SinkError> {
        if lock(&self.failing_bodies).contains(&message.body) {
            return Err(SinkError::Rejected(format!(
                "refusing body {:?}",
                message.body
            )));
        }
        self.record(SinkCall::Message {
            room_id: room_id.to_owned(),
            sender: sender.to_owned(),
            message,
        })
    }

    async fn deliver_correction(
        &self,
        room_id: &str,
        sender: &str,
        target: &str,
        new_body: &str,
        archive: bool,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Correction {
            room_id: room_id.to_owned(),
            sender: sender.to_owned(),
            target: target.to_owned(),
            new_body: new_body.to_owned(),
            archive,
        })
    }

    async fn deliver_reaction_state(
        &self,
        room_id: &str,
        target: &str,
        state: BTreeMap<String, Vec<String>>,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::ReactionState {
            room_id: room_id.to_owned(),
            target: target.to_owned(),
            state,
        })
    }

    async fn deliver_retraction(
        &self,
        room_id: &str,
        sender: &str,
        target: &str,
        reason: Option<&str>,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Retraction {
            room_id: room_id.to_owned(),
            sender: sender.to_owned(),
            target: target.to_owned(),
            reason: reason.map(str::to_owned),
        })
    }

    async fn set_typing(
        &self,
        room_id: &str,
        user_id: &str,
        typing: bool,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Typing {
            room_id: room_id.to_owned(),
            user_id: user_id.to_owned(),
            typing,
        })
    }

    async fn set_read_marker(
        &self,
        room_id: &str,
        user_id: &str,
        event_id: &str,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::ReadMarker {
            room_id: room_id.to_owned(),
            user_id: user_id.to_owned(),
            event_id: event_id.to_owned(),
        })
    }

    async fn set_presence(
        &self,
        user_id: &str,
        update: PresenceUpdate,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Presence {
            user_id: user_id.to_owned(),
            update,
        })
    }

    async fn participant_joined(
        &self,
        room_id: &str,
        user_id: &str,
        affiliation: Affiliation,
        role: Role,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Joined {
            room_id: room_id.to_owned(),
            user_id: user_id.to_owned(),
            affiliation,
            role,
        })
    }

    async fn participant_left(&self, room_id: &str, user_id: &str) -> Result<(), SinkError> {
        self.record(SinkCall::Left {
            room_id: room_id.to_owned(),
            user_id: user_id.to_owned(),
        })
    }

    async fn room_name(&self, room_id: &str, name: &str) -> Result<(), SinkError> {
        self.record(SinkCall::RoomName {
            room_id: room_id.to_owned(),
            name: name.to_owned(),
        })
    }

    async fn room_topic(
        &self,
        room_id: &str,
        topic: &str,
        setter: &str,
        at_ms: u64,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::RoomTopic {
            room_id: room_id.to_owned(),
            topic: topic.to_owned(),
            setter: setter.to_owned(),
            at_ms,
        })
    }

    async fn room_avatar(&self, room_id: &str, url: &str) -> Result<(), SinkError> {
        self.record(SinkCall::RoomAvatar {
            room_id: room_id.to_owned(),
            url: url.to_owned(),
        })
    }

    async fn mark_large_room(&self, room_id: &str) -> Result<(), SinkError> {
        self.record(SinkCall::LargeRoom {
            room_id: room_id.to_owned(),
        })
    }
}

/// Config with every wait shortened so tests never sleep for real.
pub(crate) fn test_config() -> BridgeConfig {
    BridgeConfig {
        members_sync_wait: Duration::ZERO,
        sync_retry: RetryPolicy::new(5, 50),
        ..BridgeConfig::default()
    }
}

pub(crate) fn test_context(
    transport: Arc<StubTransport>,
    sink: Arc<RecordingSink>,
) -> Arc<SessionContext> {
    test_context_with_config(transport, sink, test_config())
}

pub(crate) fn test_context_with_config(
    transport: Arc<StubTransport>,
    sink: Arc<RecordingSink>,
    config: BridgeConfig,
) -> Arc<SessionContext> {
    SessionContext::new("@me:example.org", transport, sink, config)
}

fn raw(room_id: &str, sender: &str, event_id: &str, kind: EventKind, content: Value) -> RawEvent {
    RawEvent {
        event_id: event_id.to_owned(),
        room_id: room_id.to_owned(),
        sender: sender.to_owned(),
        origin_server_ts: 1_700_000_000_000,
        kind,
        content,
    }
}

pub(crate) fn message_event(room_id: &str, sender: &str, event_id: &str, body: &str) -> RawEvent {
    raw(
        room_id,
        sender,
        event_id,
        EventKind::Message,
        json!({ "msgtype": "m.text", "body": body }),
    )
}

pub(crate) fn edit_event(
    room_id: &str,
    sender: &str,
    event_id: &str,
    target: &str,
    new_body: &str,
) -> RawEvent {
    raw(
        room_id,
        sender,
        event_id,
        EventKind::Message,
        json!({
            "msgtype": "m.text",
            "body": format!("* {new_body}"),
            "m.new_content": { "msgtype": "m.text", "body": new_body },
            "m.relates_to": { "rel_type": "m.replace", "event_id": target },
        }),
    )
}

pub(crate) fn reply_event(
    room_id: &str,
    sender: &str,
    event_id: &str,
    target: &str,
    body: &str,
) -> RawEvent {
    raw(
        room_id,
        sender,
        event_id,
        EventKind::Message,
        json!({
            "msgtype": "m.text",
            "body": body,
            "m.relates_to": { "m.in_reply_to": { "event_id": target } },
        }),
    )
}

pub(crate) fn reaction_event(
    room_id: &str,
    sender: &str,
    event_id: &str,
    target: &str,
    emoji: &str,
) -> RawEvent {
    raw(
        room_id,
        sender,
        event_id,
        EventKind::Reaction,
        json!({
            "m.relates_to": { "rel_type": "m.annotation", "event_id": target, "key": emoji },
        }),
    )
}

pub(crate) fn redaction_event(
    room_id: &str,
    sender: &str,
    event_id: &str,
    redacts: &str,
) -> RawEvent {
    raw(
        room_id,
        sender,
        event_id,
        EventKind::Redaction,
        json!({ "redacts": redacts }),
    )
}

pub(crate) fn member_event(
    room_id: &str,
    sender: &str,
    event_id: &str,
    membership: &str,
    user_id: &str,
) -> RawEvent {
    raw(
        room_id,
        sender,
        event_id,
        EventKind::Member,
        json!({ "membership": membership, "state_key": user_id }),
    )
}

pub(crate) fn typing_event(room_id: &str, event_id: &str, user_ids: &[&str]) -> RawEvent {
    raw(
        room_id,
        "server",
        event_id,
        EventKind::Typing,
        json!({ "user_ids": user_ids }),
    )
}

pub(crate) fn receipt_event(
    room_id: &str,
    event_id: &str,
    read_event: &str,
    user_id: &str,
) -> RawEvent {
    raw(
        room_id,
        "server",
        event_id,
        EventKind::Receipt,
        json!({
            "receipts": [
                { "user_id": user_id, "event_id": read_event, "receipt_type": "m.read" },
            ],
        }),
    )
}

pub(crate) fn presence_event(sender: &str, event_id: &str, currently_active: bool) -> RawEvent {
    raw(
        "",
        sender,
        event_id,
        EventKind::Presence,
        json!({ "currently_active": currently_active, "presence": "online" }),
    )
}
