//! Typed error hierarchy for the requisition service.
//!
//! Three top-level enums cover the three subsystems:
//! - `LifecycleError` — state machine and command failures
//! - `GatewayError` — outbound delivery failures from the chat platform
//! - `StoreError` — persistence failures
//!
//! Nothing here is fatal to the process: validation and parsing errors are
//! reported back to the invoking participant, gateway permission errors are
//! logged and degraded around, and a failed requisition stalls in its current
//! state for remediation.

use thiserror::Error;

use crate::requisition::{CommunityId, MessageHandle, RequisitionStatus};
use crate::validate::ValidationErrors;

/// Errors from the requisition lifecycle state machine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("could not parse deadline from {input:?}")]
    UnparseableDeadline { input: String },

    #[error("community {community} has no channel configuration")]
    ChannelNotConfigured { community: CommunityId },

    #[error("no active requisition for message {handle}")]
    NotFound { handle: MessageHandle },

    #[error("requisition {id} is {status}, not open")]
    NotOpen { id: i64, status: RequisitionStatus },

    #[error("timed out waiting for a reply")]
    PromptTimeout,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Errors from the notification gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("message or channel not found")]
    NotFound,

    #[error("missing permissions")]
    Forbidden,

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Errors from the persistence adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("no requisition row with id {id}")]
    MissingRow { id: i64 },

    #[error("corrupt {column} in requisition {id}: {value:?}")]
    CorruptRow {
        id: i64,
        column: &'static str,
        value: String,
    },

    #[error("database task failed: {0}")]
    Runtime(String),
}
