use std::time::Duration;

use bridge_core::{EchoSuppressor, RetryPolicy};

/// Engine tunables, all bounded. Loading these from a process
/// configuration source is the embedder's concern.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Events fetched per room to back-fill history at room-open.
    pub max_history_fetch: u16,
    /// Participants materialized when joining a room. Higher values
    /// make joining slower; members beyond the bound appear when they
    /// speak. Privileged members (power level 50 and up) are always
    /// materialized regardless of this bound.
    pub max_participants_fetch: usize,
    /// How long to wait for the transport's membership view to report
    /// synced before proceeding with whatever is available.
    pub members_sync_wait: Duration,
    /// Entries in the canonical-id memo cache.
    pub resolved_id_cache_capacity: usize,
    /// Entries in the fetched-event cache.
    pub event_cache_capacity: usize,
    /// Self-originated event ids retained for echo suppression.
    pub echo_capacity: usize,
    /// Backoff applied by the sync loop on recoverable transport
    /// failures.
    pub sync_retry: RetryPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_history_fetch: 100,
            max_participants_fetch: 10,
            members_sync_wait: Duration::from_secs(10),
            resolved_id_cache_capacity: 1000,
            event_cache_capacity: 100,
            echo_capacity: EchoSuppressor::DEFAULT_CAPACITY,
            sync_retry: RetryPolicy::default(),
        }
    }
}
