//! Event-translation and consistency engine.
//!
//! Reconciles an eventually-consistent, relation-based room event
//! stream into coherent per-room conversation state: edit-chain
//! canonicalization, per-user reaction aggregation, echo suppression,
//! bounded membership materialization and bounded history backfill.
//! The transport behind the stream and the chat interface the
//! normalized operations land in are both injected collaborator
//! traits.

/// Bounded history replay at room-open time.
pub mod backfill;
/// Engine tunables.
pub mod config;
/// Bounded, priority-aware materialization of room participants.
pub mod members;
/// Bounded memoized canonicalization of edit chains.
pub mod resolve;
/// Inbound event dispatch with echo suppression and fault isolation.
pub mod router;
/// Per-session context, supervised sync loop and outbound operations.
pub mod session;
/// Target chat interface seam.
pub mod sink;
/// Transport collaborator seam.
pub mod transport;

#[cfg(test)]
pub(crate) mod testkit;

pub use backfill::{BackfillWatermark, HistoryBackfiller};
pub use config::BridgeConfig;
pub use members::{GroupMembershipSync, MembershipSummary};
pub use resolve::IdResolutionCache;
pub use router::EventRouter;
pub use session::{BridgeSession, RoomOpenSummary, SessionContext};
pub use sink::{ChatSink, MessageIn, ReplyRef, SinkError};
pub use transport::{EventTransport, SyncBatch, TransportError};

/// Lock a std mutex, recovering the data on poisoning. All shared
/// state here is only mutated under short critical sections with no
/// panicking invariants, so recovered data is always usable.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
