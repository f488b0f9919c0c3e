//! Bounded, priority-aware materialization of room participants.
//!
//! Group rooms can be arbitrarily large; materializing every member
//! into the target interface at join time would make joining
//! unbounded. Privileged members are always materialized, the rest
//! fill the configured bound in stream order, and over-bound rooms
//! are flagged so later-discovered participants are retained.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{debug, warn};

use bridge_core::{BridgeError, MemberRecord, role_pair};

use crate::session::SessionContext;

const PRIVILEGED_POWER_LEVEL: u8 = 50;

/// Outcome of one room's membership sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSummary {
    /// Participants materialized into the target interface.
    pub materialized: usize,
    /// True when the room's membership exceeded the fetch bound.
    pub large_room: bool,
}

/// Materializes a room's participants once, at room-open time.
#[derive(Clone)]
pub struct GroupMembershipSync {
    ctx: Arc<SessionContext>,
}

impl GroupMembershipSync {
    /// Create a membership sync over one session's context.
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Wait (bounded) for the transport's membership view, then
    /// materialize participants up to the configured bound.
    ///
    /// Every member at power level 50 or above is always included;
    /// remaining capacity is filled with other members in stream
    /// order. The session's own user is never materialized here. On
    /// wait timeout the sync proceeds with whatever the view has.
    pub async fn sync_room(&self, room_id: &str) -> Result<MembershipSummary, BridgeError> {
        self.wait_for_members(room_id).await;

        let members = self
            .ctx
            .transport
            .room_members(room_id)
            .await
            .map_err(|err| err.into_bridge_error("fetch_members"))?;

        let others: Vec<&MemberRecord> = members
            .iter()
            .filter(|member| member.user_id != self.ctx.user_id)
            .collect();

        let bound = self.ctx.config.max_participants_fetch;
        let mut selected: Vec<&MemberRecord> = others
            .iter()
            .copied()
            .filter(|member| member.power_level >= PRIVILEGED_POWER_LEVEL)
            .collect();
        for member in others
            .iter()
            .copied()
            .filter(|member| member.power_level < PRIVILEGED_POWER_LEVEL)
        {
            if selected.len() >= bound {
                break;
            }
            selected.push(member);
        }

        let large_room = others.len() > bound;
        if large_room {
            if let Err(err) = self.ctx.sink.mark_large_room(room_id).await {
                warn!(room_id, %err, "could not flag large room");
            }
        }

        let mut materialized = 0;
        for member in &selected {
            let (affiliation, role) = role_pair(member.power_level);
            match self
                .ctx
                .sink
                .participant_joined(room_id, &member.user_id, affiliation, role)
                .await
            {
                Ok(()) => materialized += 1,
                Err(err) => {
                    debug!(room_id, user_id = %member.user_id, %err, "skipping participant");
                }
            }
        }

        Ok(MembershipSummary {
            materialized,
            large_room,
        })
    }

    async fn wait_for_members(&self, room_id: &str) {
        let polls = self.ctx.config.members_sync_wait.as_secs();
        for _ in 0..polls {
            if self.ctx.transport.members_synced(room_id).await {
                return;
            }
            debug!(room_id, "waiting for membership view to sync");
            sleep(Duration::from_secs(1)).await;
        }
        if !self.ctx.transport.members_synced(room_id).await {
            debug!(room_id, "proceeding without a synced membership view");
        }
    }
}
