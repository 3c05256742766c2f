//! Error taxonomy for reconciliation.
//!
//! Every failure raised by a client or protocol step maps onto an
//! [`ErrorKind`], which decides whether the reconciler retries in place,
//! re-observes, skips, or enters `FAILED`.

use thiserror::Error;

use crate::types::MemberId;

/// Result type alias for reconciliation operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors raised by the orchestrator client, membership client, and the
/// mutation protocols built on top of them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("version conflict: expected base version {expected}, store is at {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("floor violation: group has {members} members, floor is {floor}")]
    FloorViolation { members: u32, floor: u32 },

    #[error("quorum loss: {0}")]
    QuorumLoss(String),

    #[error("invalid replica target: {0}")]
    InvalidTarget(u32),

    #[error("malformed response: {reason}")]
    Malformed { reason: String, payload: String },

    #[error("rejected by remote ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("member {0} is not addressable")]
    NotAddressable(MemberId),

    #[error("membership moved: expected to add member {expected}, next id is now {next}")]
    StaleOrdinal { expected: MemberId, next: MemberId },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ControlError>,
    },

    #[error("cancelled by shutdown")]
    Cancelled,
}

/// How the reconciler reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or timeout. Retry the same call with backoff.
    Transient,
    /// Optimistic-concurrency collision. Re-fetch and recompute, then retry.
    Conflict,
    /// Policy-level refusal. Logged and skipped, never retried.
    Policy,
    /// The tick's observation no longer holds. End the tick without
    /// writing and observe again on the next one.
    Stale,
    /// Terminal for the current tick; drives the reconciler to `FAILED`.
    Terminal,
    /// Shutdown requested.
    Cancelled,
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) | Self::Timeout { .. } => ErrorKind::Transient,
            Self::VersionConflict { .. } => ErrorKind::Conflict,
            Self::FloorViolation { .. } => ErrorKind::Policy,
            Self::StaleOrdinal { .. } => ErrorKind::Stale,
            Self::QuorumLoss(_)
            | Self::InvalidTarget(_)
            | Self::Malformed { .. }
            | Self::Rejected { .. }
            | Self::NotAddressable(_)
            | Self::RetriesExhausted { .. } => ErrorKind::Terminal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn timeout(operation: &str, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}
