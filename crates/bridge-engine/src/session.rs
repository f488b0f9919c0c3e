//! Per-session context, supervised sync loop and outbound operations.
//!
//! One [`BridgeSession`] owns everything for one bridged user: the
//! shared [`SessionContext`], the background sync task feeding the
//! router, and the outbound operations (send, correct, retract,
//! reaction reconcile, typing, read markers, presence). Every
//! outbound operation that produces an event id marks it for echo
//! suppression before returning.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex as StdMutex},
};

use serde_json::Value;
use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bridge_core::{
    BridgeError, BridgeErrorCategory, EchoSuppressor, PresenceState, ReactionCache, content,
};

use crate::{
    backfill::{BackfillWatermark, HistoryBackfiller},
    config::BridgeConfig,
    lock,
    members::{GroupMembershipSync, MembershipSummary},
    resolve::IdResolutionCache,
    router::EventRouter,
    sink::ChatSink,
    transport::EventTransport,
};

/// State shared by every component of one bridged user session.
pub struct SessionContext {
    /// The bridged user's own id; used for echo and self-filtering.
    pub user_id: String,
    /// Engine tunables.
    pub config: BridgeConfig,
    /// Transport collaborator owning the network client.
    pub transport: Arc<dyn EventTransport>,
    /// Target chat interface.
    pub sink: Arc<dyn ChatSink>,
    /// Canonical-id resolver over the transport.
    pub resolver: IdResolutionCache,
    /// Net surviving reaction state.
    pub reactions: StdMutex<ReactionCache>,
    /// Self-originated event ids to discard on redelivery.
    pub echo: StdMutex<EchoSuppressor>,
    /// Sync position after the last processed batch; anchors history
    /// fetches.
    pub last_sync_token: StdMutex<Option<String>>,
}

impl SessionContext {
    /// Assemble the shared state for one session.
    pub fn new(
        user_id: impl Into<String>,
        transport: Arc<dyn EventTransport>,
        sink: Arc<dyn ChatSink>,
        config: BridgeConfig,
    ) -> Arc<Self> {
        let resolver = IdResolutionCache::new(
            transport.clone(),
            config.resolved_id_cache_capacity,
            config.event_cache_capacity,
        );
        Arc::new(Self {
            user_id: user_id.into(),
            echo: StdMutex::new(EchoSuppressor::new(config.echo_capacity)),
            config,
            transport,
            sink,
            resolver,
            reactions: StdMutex::new(ReactionCache::default()),
            last_sync_token: StdMutex::new(None),
        })
    }
}

/// Outcome of opening a room: membership materialization plus history
/// replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomOpenSummary {
    /// What membership sync materialized.
    pub membership: MembershipSummary,
    /// Messages replayed from history.
    pub backfilled: usize,
}

struct RunningSync {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// One bridged user session.
pub struct BridgeSession {
    ctx: Arc<SessionContext>,
    router: EventRouter,
    members: GroupMembershipSync,
    backfiller: HistoryBackfiller,
    sync: AsyncMutex<Option<RunningSync>>,
}

impl BridgeSession {
    /// Build a session over the given collaborators.
    pub fn new(
        user_id: impl Into<String>,
        transport: Arc<dyn EventTransport>,
        sink: Arc<dyn ChatSink>,
        config: BridgeConfig,
    ) -> Self {
        let ctx = SessionContext::new(user_id, transport, sink, config);
        let router = EventRouter::new(ctx.clone());
        Self {
            members: GroupMembershipSync::new(ctx.clone()),
            backfiller: HistoryBackfiller::new(ctx.clone(), router.clone()),
            router,
            ctx,
            sync: AsyncMutex::new(None),
        }
    }

    /// The session's shared context.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Start the background sync task feeding inbound events through
    /// the router. Fails if one is already running.
    ///
    /// Recoverable transport failures are retried in-loop with
    /// backoff; an unrecoverable failure ends the task. A dead task
    /// still counts as running until [`Self::stop`] reaps it; poll
    /// [`Self::is_running`] to observe loop death and restart.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let mut guard = self.sync.lock().await;
        if guard.is_some() {
            return Err(BridgeError::new(
                BridgeErrorCategory::Internal,
                "sync_already_running",
                "sync task is already running",
            ));
        }

        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let ctx = self.ctx.clone();
        let router = self.router.clone();
        let task = tokio::spawn(async move {
            let mut backoff = ctx.config.sync_retry.backoff();
            loop {
                tokio::select! {
                    _ = stop_child.cancelled() => break,
                    batch = ctx.transport.next_batch() => {
                        match batch {
                            Ok(batch) => {
                                backoff.reset();
                                *lock(&ctx.last_sync_token) = Some(batch.next_token);
                                for event in &batch.events {
                                    router.dispatch(event).await;
                                }
                            }
                            Err(err) => {
                                let hint = err.retry_after_hint_ms();
                                let mapped = err.into_bridge_error("sync");
                                if !mapped.is_recoverable() {
                                    warn!(%mapped, "unrecoverable sync failure; stopping");
                                    break;
                                }
                                let delay = backoff.next_delay(hint);
                                warn!(%mapped, delay_ms = delay.as_millis() as u64, "sync failed; backing off");
                                tokio::select! {
                                    _ = stop_child.cancelled() => break,
                                    _ = sleep(delay) => {}
                                }
                            }
                        }
                    }
                }
            }
            info!("sync loop stopped");
        });

        *guard = Some(RunningSync { stop, task });
        Ok(())
    }

    /// Whether a started sync task is still alive.
    pub async fn is_running(&self) -> bool {
        self.sync
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Stop the background sync task. Fails if none is running.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        let running = {
            let mut guard = self.sync.lock().await;
            guard.take()
        };

        let Some(running) = running else {
            return Err(BridgeError::new(
                BridgeErrorCategory::Internal,
                "sync_not_running",
                "sync task is not running",
            ));
        };

        running.stop.cancel();
        let _ = running.task.await;
        Ok(())
    }

    /// Materialize a room's participants, then replay its history.
    pub async fn open_room(
        &self,
        room_id: &str,
        watermark: &BackfillWatermark,
    ) -> Result<RoomOpenSummary, BridgeError> {
        let membership = self.members.sync_room(room_id).await?;
        let backfilled = self.backfiller.backfill(room_id, watermark).await?;
        Ok(RoomOpenSummary {
            membership,
            backfilled,
        })
    }

    /// Send a text message, optionally as a reply. The reply target is
    /// canonicalized before it goes on the wire, and the user's typing
    /// state is cleared best-effort first. Returns the new event id.
    pub async fn send_text(
        &self,
        room_id: &str,
        body: &str,
        reply_to: Option<&str>,
    ) -> Result<String, BridgeError> {
        let mut message = content::text_message(body);
        if let Some(raw_target) = reply_to {
            let canonical = self
                .ctx
                .resolver
                .resolve_original_id(room_id, raw_target)
                .await;
            content::attach_reply(&mut message, &canonical);
        }

        if let Err(err) = self.ctx.transport.set_typing(room_id, false).await {
            debug!(room_id, %err, "could not clear typing state before send");
        }

        self.send_room_content(room_id, message).await
    }

    /// Replace the body of a previously sent message. Returns the edit
    /// event's id.
    pub async fn correct(
        &self,
        room_id: &str,
        target: &str,
        new_body: &str,
    ) -> Result<String, BridgeError> {
        self.send_room_content(room_id, content::edit_message(target, new_body))
            .await
    }

    /// Retract a previously sent event. The redaction's own id is
    /// echo-marked so its redelivery is discarded.
    pub async fn retract(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BridgeError> {
        let redaction_id = self
            .ctx
            .transport
            .redact(room_id, event_id, reason)
            .await
            .map_err(|err| err.into_bridge_error("redact"))?;
        lock(&self.ctx.echo).mark(redaction_id);
        lock(&self.ctx.reactions).remove(event_id);
        Ok(())
    }

    /// Reconcile the user's reactions on a message to exactly the
    /// given emoji set: retract the ones no longer wanted, send the
    /// missing ones, touch nothing already in place. Idempotent.
    pub async fn set_reactions<I, S>(
        &self,
        room_id: &str,
        target: &str,
        emojis: I,
    ) -> Result<(), BridgeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let target = self
            .ctx
            .resolver
            .resolve_original_id(room_id, target)
            .await;
        let wanted: BTreeSet<String> = emojis.into_iter().map(Into::into).collect();
        let current = lock(&self.ctx.reactions).sender_reactions(room_id, &target, &self.ctx.user_id);

        for (emoji, reaction_id) in &current {
            if wanted.contains(emoji) {
                continue;
            }
            let redaction_id = self
                .ctx
                .transport
                .redact(room_id, reaction_id, None)
                .await
                .map_err(|err| err.into_bridge_error("redact"))?;
            lock(&self.ctx.echo).mark(redaction_id);
            lock(&self.ctx.reactions).remove(reaction_id);
        }

        for emoji in &wanted {
            if current.contains_key(emoji) {
                continue;
            }
            let reaction_id = self
                .ctx
                .transport
                .send_reaction(room_id, &target, emoji)
                .await
                .map_err(|err| err.into_bridge_error("send_reaction"))?;
            lock(&self.ctx.echo).mark(reaction_id.clone());
            lock(&self.ctx.reactions).add(
                room_id,
                &target,
                &self.ctx.user_id,
                emoji,
                &reaction_id,
            );
        }
        Ok(())
    }

    /// Publish or clear the user's typing state.
    pub async fn set_typing(&self, room_id: &str, typing: bool) -> Result<(), BridgeError> {
        self.ctx
            .transport
            .set_typing(room_id, typing)
            .await
            .map_err(|err| err.into_bridge_error("set_typing"))
    }

    /// Move the user's read marker to an event, canonicalized first.
    pub async fn mark_displayed(&self, room_id: &str, event_id: &str) -> Result<(), BridgeError> {
        let canonical = self
            .ctx
            .resolver
            .resolve_original_id(room_id, event_id)
            .await;
        self.ctx
            .transport
            .set_read_marker(room_id, &canonical)
            .await
            .map_err(|err| err.into_bridge_error("set_read_marker"))
    }

    /// Publish the user's presence.
    pub async fn set_presence(
        &self,
        state: PresenceState,
        status_msg: Option<&str>,
    ) -> Result<(), BridgeError> {
        self.ctx
            .transport
            .set_presence(state, status_msg)
            .await
            .map_err(|err| err.into_bridge_error("set_presence"))
    }

    async fn send_room_content(
        &self,
        room_id: &str,
        message: Value,
    ) -> Result<String, BridgeError> {
        let event_id = self
            .ctx
            .transport
            .send_message(room_id, message)
            .await
            .map_err(|err| err.into_bridge_error("send_message"))?;
        lock(&self.ctx.echo).mark(event_id.clone());
        Ok(event_id)
    }
}
