//! Command parsing.
//!
//! Pure text-to-command translation; the guided prompt sequences that back
//! the non-inline forms live in the lifecycle, which owns the conversation
//! state. A message either isn't a command (`None`), is a recognized
//! command, or is a recognized command with bad arguments (`Err` carries
//! the usage text to surface).

use std::str::FromStr;

use crate::requisition::{ChannelId, MessageHandle};

pub const CONFIG_USAGE: &str =
    "Invalid format. Use: `config <requisitions_channel_id> <archive_channel_id> <label>`";
pub const REQUEST_USAGE: &str = "Invalid format. Use: `request material, quantity, payment, \
                                 deadline, region` or just `request` for interactive prompts.";
pub const UPDATE_USAGE: &str = "Invalid format. Use: `update <message_id>, <new_quantity>, \
                                <new_payment>, <new_deadline>` or just `update` for interactive \
                                prompts.";
pub const QUANTITY_NOT_A_NUMBER: &str = "Quantity must be a number.";
pub const HANDLE_NOT_A_NUMBER: &str = "Please ensure the message ID and quantity are numbers.";

/// Inline arguments of a creation command.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestArgs {
    pub material: String,
    pub quantity: i64,
    pub payment: String,
    pub deadline: String,
    pub region: String,
}

/// Inline arguments of an update command.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateArgs {
    pub handle: MessageHandle,
    pub quantity: i64,
    pub payment: String,
    pub deadline: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Administrative channel configuration.
    Configure {
        announce: ChannelId,
        archive: ChannelId,
        label: String,
    },
    /// Create a requisition; `None` starts the guided flow.
    Request(Option<RequestArgs>),
    /// Update an open requisition; `None` starts the guided flow.
    Update(Option<UpdateArgs>),
}

/// Parse a channel message. `None` when the text is not a command at all;
/// `Some(Err(usage))` when the command was recognized but malformed.
pub fn parse(text: &str, prefix: &str) -> Option<Result<Command, &'static str>> {
    let body = text.trim().strip_prefix(prefix)?;
    let (word, rest) = match body.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (body, ""),
    };

    match word {
        "config" => Some(parse_config(rest)),
        "request" => Some(parse_request(rest)),
        "update" => Some(parse_update(rest)),
        _ => None,
    }
}

fn parse_config(rest: &str) -> Result<Command, &'static str> {
    let (announce, rest) = rest.split_once(char::is_whitespace).ok_or(CONFIG_USAGE)?;
    let (archive, label) = rest
        .trim_start()
        .split_once(char::is_whitespace)
        .ok_or(CONFIG_USAGE)?;
    let announce = ChannelId::from_str(announce).map_err(|_| CONFIG_USAGE)?;
    let archive = ChannelId::from_str(archive).map_err(|_| CONFIG_USAGE)?;
    let label = label.trim();
    if label.is_empty() {
        return Err(CONFIG_USAGE);
    }
    Ok(Command::Configure {
        announce,
        archive,
        label: label.to_string(),
    })
}

fn parse_request(rest: &str) -> Result<Command, &'static str> {
    if rest.is_empty() {
        return Ok(Command::Request(None));
    }
    let parts = split_fields(rest, 5).ok_or(REQUEST_USAGE)?;
    let quantity = parts[1].parse::<i64>().map_err(|_| QUANTITY_NOT_A_NUMBER)?;
    Ok(Command::Request(Some(RequestArgs {
        material: parts[0].clone(),
        quantity,
        payment: parts[2].clone(),
        deadline: parts[3].clone(),
        region: parts[4].clone(),
    })))
}

fn parse_update(rest: &str) -> Result<Command, &'static str> {
    if rest.is_empty() {
        return Ok(Command::Update(None));
    }
    let parts = split_fields(rest, 4).ok_or(UPDATE_USAGE)?;
    let handle = MessageHandle::from_str(&parts[0]).map_err(|_| HANDLE_NOT_A_NUMBER)?;
    let quantity = parts[1].parse::<i64>().map_err(|_| HANDLE_NOT_A_NUMBER)?;
    Ok(Command::Update(Some(UpdateArgs {
        handle,
        quantity,
        payment: parts[2].clone(),
        deadline: parts[3].clone(),
    })))
}

/// Split a comma-delimited argument list into exactly `n` non-empty fields.
fn split_fields(rest: &str, n: usize) -> Option<Vec<String>> {
    let parts: Vec<String> = rest.split(',').map(|p| p.trim().to_string()).collect();
    if parts.len() != n || parts.iter().any(String::is_empty) {
        return None;
    }
    Some(parts)
}
