//! Core building blocks shared by the bridge engine.
//!
//! This crate defines the raw wire event model, pure content
//! normalization helpers, the in-memory reaction and echo stores, and
//! the common error/backoff types. Nothing in here touches the
//! network or requires an async runtime.

/// Pure event-content normalization helpers.
pub mod content;
/// Bounded set of self-originated event ids.
pub mod echo;
/// Stable bridge error types and HTTP classification helpers.
pub mod error;
/// Per-room reaction index.
pub mod reactions;
/// Backoff policy used by the supervised sync loop.
pub mod retry;
/// Wire event model and room membership types.
pub mod types;

pub use echo::EchoSuppressor;
pub use error::{BridgeError, BridgeErrorCategory, classify_http_status};
pub use reactions::{ReactionCache, ReactionTarget};
pub use retry::{Backoff, RetryPolicy};
pub use types::{
    Affiliation, EventKind, MemberRecord, PresenceState, PresenceUpdate, RawEvent, Role, role_pair,
};
