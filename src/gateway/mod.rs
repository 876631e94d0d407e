//! Notification gateway seam.
//!
//! The chat platform proper is an external collaborator; the lifecycle only
//! sees this trait for outbound delivery and `GatewayEvent` for inbound
//! signals. Conversation waits (completion details, feedback, guided
//! prompts) are modeled as explicit pending-request records resolved by the
//! next matching inbound message or expired by a timeout, so the lifecycle
//! is not coupled to any particular platform client's wait primitive.

pub mod console;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use tracing::debug;

use crate::errors::GatewayError;
use crate::requisition::{ChannelId, CommunityId, MessageHandle, ParticipantId};

/// Reaction affordances attached to an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    /// "I will fulfill this" (✋).
    Accept,
    /// "I have fulfilled this" (✅).
    Complete,
}

impl Marker {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Accept => "✋",
            Self::Complete => "✅",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "✋" => Some(Self::Accept),
            "✅" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Where an inbound message arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageScope {
    Direct,
    Channel(ChannelId),
}

/// Inbound signals from the platform, fed to the lifecycle one at a time.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A participant reacted on a message.
    ReactionAdded {
        handle: MessageHandle,
        participant: ParticipantId,
        marker: Marker,
    },
    /// A participant sent a message (channel or direct). Command parsing and
    /// pending-reply resolution both start from here.
    Message {
        community: CommunityId,
        scope: MessageScope,
        participant: ParticipantId,
        /// Whether the platform reports this participant as an administrator.
        admin: bool,
        text: String,
    },
}

/// Outbound delivery to the chat platform.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Post a message to a channel, returning its handle.
    async fn post_message(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> Result<MessageHandle, GatewayError>;

    /// Replace the text of a previously posted message.
    async fn edit_message(
        &self,
        channel: ChannelId,
        handle: MessageHandle,
        text: &str,
    ) -> Result<(), GatewayError>;

    /// Delete a previously posted message.
    async fn delete_message(
        &self,
        channel: ChannelId,
        handle: MessageHandle,
    ) -> Result<(), GatewayError>;

    /// Attach a reaction affordance to a posted message.
    async fn add_marker(
        &self,
        channel: ChannelId,
        handle: MessageHandle,
        marker: Marker,
    ) -> Result<(), GatewayError>;

    /// Send a private message to a participant.
    async fn send_direct(
        &self,
        participant: ParticipantId,
        text: &str,
    ) -> Result<(), GatewayError>;
}

/// Explicit per-conversation pending-request records.
///
/// At most one wait per participant: arming a second wait for the same
/// participant replaces the first (its waiter resolves to `None`). A reply
/// arriving after the wait expired is discarded by the caller when
/// `resolve` returns false.
#[derive(Default)]
pub struct PendingReplies {
    inner: Mutex<HashMap<ParticipantId, oneshot::Sender<String>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next message from `participant`, up to `timeout`.
    pub async fn wait_for(&self, participant: ParticipantId, timeout: Duration) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.lock().await;
            if pending.insert(participant, tx).is_some() {
                debug!(%participant, "replaced an existing pending reply wait");
            }
        }

        let reply = tokio::time::timeout(timeout, rx).await;
        match reply {
            Ok(Ok(text)) => Some(text),
            // Sender dropped: this wait was replaced by a newer one.
            Ok(Err(_)) => None,
            Err(_) => {
                // Expired; remove our record unless a newer wait took the slot.
                let mut pending = self.inner.lock().await;
                if let Some(tx) = pending.remove(&participant) {
                    if !tx.is_closed() {
                        // Not ours after all; put the newer wait back.
                        pending.insert(participant, tx);
                    }
                }
                None
            }
        }
    }

    /// Resolve a pending wait with an inbound message. Returns false when no
    /// wait is pending for this participant (the message is not a reply).
    pub async fn resolve(&self, participant: ParticipantId, text: &str) -> bool {
        let tx = {
            let mut pending = self.inner.lock().await;
            pending.remove(&participant)
        };
        match tx {
            Some(tx) => tx.send(text.to_string()).is_ok(),
            None => false,
        }
    }
}
