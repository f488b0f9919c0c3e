use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for caller-facing handling.
///
/// The engine itself never retries; the category tells the initiator
/// of an outbound operation whether retrying could help.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BridgeErrorCategory {
    /// Transient network or transport failure.
    Transport,
    /// Rate-limited by the homeserver.
    RateLimited,
    /// Referenced event, room or user does not exist or is not
    /// fetchable.
    NotFound,
    /// The transport or the target interface refused the operation.
    Rejected,
    /// Expected field absent or of the wrong shape.
    Malformed,
    /// Internal engine bug or invariant break.
    Internal,
}

/// Stable error payload surfaced by engine operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct BridgeError {
    /// High-level error category.
    pub category: BridgeErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl BridgeError {
    /// Construct a new bridge error.
    pub fn new(
        category: BridgeErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Whether waiting and retrying could plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category,
            BridgeErrorCategory::Transport | BridgeErrorCategory::RateLimited
        )
    }
}

/// Map an HTTP status code to a bridge error category.
pub fn classify_http_status(status: u16) -> BridgeErrorCategory {
    match status {
        401 | 403 => BridgeErrorCategory::Rejected,
        404 | 410 => BridgeErrorCategory::NotFound,
        408 | 429 => BridgeErrorCategory::RateLimited,
        400..=499 => BridgeErrorCategory::Malformed,
        500..=599 => BridgeErrorCategory::Transport,
        _ => BridgeErrorCategory::Internal,
    }
}
