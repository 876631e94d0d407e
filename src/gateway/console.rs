//! Line-oriented gateway for local development.
//!
//! Posts render to stdout; inbound events are typed on stdin:
//!
//! ```text
//! msg <user-id> <text...>       channel message (commands go here)
//! dm <user-id> <text...>        direct message (prompt replies)
//! react <user-id> <handle> <accept|complete>
//! ```
//!
//! Everything runs against a single synthetic community so the full
//! lifecycle can be exercised without a platform client.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use super::{Gateway, GatewayEvent, Marker, MessageScope};
use crate::errors::GatewayError;
use crate::requisition::{ChannelId, CommunityId, MessageHandle, ParticipantId};

/// The single community the console gateway simulates.
pub const CONSOLE_COMMUNITY: CommunityId = CommunityId(1);
/// The channel console commands appear to come from.
pub const CONSOLE_CHANNEL: ChannelId = ChannelId(0);

/// Gateway that renders all outbound traffic to stdout.
pub struct ConsoleGateway {
    next_handle: AtomicU64,
}

impl ConsoleGateway {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
        }
    }
}

impl Default for ConsoleGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for ConsoleGateway {
    async fn post_message(
        &self,
        channel: ChannelId,
        text: &str,
    ) -> Result<MessageHandle, GatewayError> {
        let handle = MessageHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        println!("[#{}] (m{})\n{}", channel, handle, text);
        Ok(handle)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        handle: MessageHandle,
        text: &str,
    ) -> Result<(), GatewayError> {
        println!("[#{}] (m{} edited)\n{}", channel, handle, text);
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        handle: MessageHandle,
    ) -> Result<(), GatewayError> {
        println!("[#{}] (m{} deleted)", channel, handle);
        Ok(())
    }

    async fn add_marker(
        &self,
        channel: ChannelId,
        handle: MessageHandle,
        marker: Marker,
    ) -> Result<(), GatewayError> {
        println!("[#{}] (m{} reaction added: {})", channel, handle, marker.symbol());
        Ok(())
    }

    async fn send_direct(
        &self,
        participant: ParticipantId,
        text: &str,
    ) -> Result<(), GatewayError> {
        println!("[dm -> {}]\n{}", participant, text);
        Ok(())
    }
}

/// Parse one console input line into a gateway event.
pub fn parse_line(line: &str) -> Option<GatewayEvent> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace)?;
    match verb {
        "msg" | "dm" => {
            let (user, text) = rest.trim().split_once(char::is_whitespace)?;
            let participant = ParticipantId::from_str(user).ok()?;
            let scope = if verb == "msg" {
                MessageScope::Channel(CONSOLE_CHANNEL)
            } else {
                MessageScope::Direct
            };
            Some(GatewayEvent::Message {
                community: CONSOLE_COMMUNITY,
                scope,
                participant,
                admin: true,
                text: text.trim().to_string(),
            })
        }
        "react" => {
            let mut parts = rest.split_whitespace();
            let participant = ParticipantId::from_str(parts.next()?).ok()?;
            let handle = MessageHandle::from_str(parts.next()?).ok()?;
            let marker = match parts.next()? {
                "accept" => Marker::Accept,
                "complete" => Marker::Complete,
                symbol => Marker::from_symbol(symbol)?,
            };
            Some(GatewayEvent::ReactionAdded {
                handle,
                participant,
                marker,
            })
        }
        _ => None,
    }
}

/// Read stdin lines forever, feeding parsed events to the lifecycle.
pub async fn read_events(tx: mpsc::Sender<GatewayEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Some(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    None => warn!(%line, "unrecognized console input"),
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to read console input");
                return;
            }
        }
    }
}
