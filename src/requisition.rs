//! Domain model for requisitions.
//!
//! The transition bookkeeping (`record_accept`, `record_complete`,
//! `advance`) is deliberately pure so the lifecycle invariants can be
//! exercised without any async machinery around them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// SQLite stores integers as `i64`; ids round-trip through that.
            pub fn as_i64(self) -> i64 {
                self.0 as i64
            }

            pub fn from_i64(raw: i64) -> Self {
                Self(raw as u64)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self)
            }
        }
    };
}

id_type!(
    /// A community member (or the service itself) able to react and message.
    ParticipantId
);
id_type!(
    /// Opaque reference to a posted message, primary key for active requisitions.
    MessageHandle
);
id_type!(
    /// A chat community (guild/server).
    CommunityId
);
id_type!(
    /// A channel inside a community, used as an announce or archive destination.
    ChannelId
);

/// Where a requisition sits in its forward-only lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionStatus {
    /// Validated fields, not yet announced.
    Draft,
    /// Announced and accepting reactions.
    Open,
    /// Every accepter has completed; details collection pending.
    AwaitingDetails,
    /// Archive post in flight.
    Archiving,
    /// Terminal.
    Archived,
}

impl RequisitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::AwaitingDetails => "awaiting_details",
            Self::Archiving => "archiving",
            Self::Archived => "archived",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Open => 1,
            Self::AwaitingDetails => 2,
            Self::Archiving => 3,
            Self::Archived => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Archived)
    }
}

impl FromStr for RequisitionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "open" => Ok(Self::Open),
            "awaiting_details" => Ok(Self::AwaitingDetails),
            "archiving" => Ok(Self::Archiving),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid requisition status: {}", s)),
        }
    }
}

impl fmt::Display for RequisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of applying an accept signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Participant appended to `accepted_by`.
    Added,
    /// Duplicate signal; no change.
    AlreadyAccepted,
}

/// Outcome of applying a complete signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// Participant never accepted; signal ignored.
    NotAccepter,
    /// Duplicate signal; no change.
    AlreadyCompleted,
    /// Participant appended to `completed_by`.
    Completed {
        /// True when this signal made `completed_by` cover `accepted_by`.
        all_complete: bool,
    },
}

/// Per-community routing of announcement and archive destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub announce: ChannelId,
    pub archive: ChannelId,
    pub label: String,
}

/// The central entity: a tracked request for materials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requisition {
    /// Assigned by the persistence layer at creation.
    pub id: i64,
    pub community: CommunityId,
    pub requester: ParticipantId,
    pub material: String,
    pub quantity: u32,
    pub payment: String,
    pub deadline: DateTime<Utc>,
    pub region: String,
    /// Insertion order preserved for display.
    pub accepted_by: Vec<ParticipantId>,
    /// Always a subset of `accepted_by`.
    pub completed_by: Vec<ParticipantId>,
    pub completion_details: String,
    pub status: RequisitionStatus,
    /// Set at most once, when the announcement is posted.
    pub message_handle: Option<MessageHandle>,
}

impl Requisition {
    /// Apply an accept signal. Idempotent per participant.
    pub fn record_accept(&mut self, participant: ParticipantId) -> AcceptOutcome {
        if self.accepted_by.contains(&participant) {
            return AcceptOutcome::AlreadyAccepted;
        }
        self.accepted_by.push(participant);
        AcceptOutcome::Added
    }

    /// Apply a complete signal. Only accepters may complete; idempotent.
    pub fn record_complete(&mut self, participant: ParticipantId) -> CompleteOutcome {
        if !self.accepted_by.contains(&participant) {
            return CompleteOutcome::NotAccepter;
        }
        if self.completed_by.contains(&participant) {
            return CompleteOutcome::AlreadyCompleted;
        }
        self.completed_by.push(participant);
        CompleteOutcome::Completed {
            all_complete: self.all_complete(),
        }
    }

    /// Whether every current accepter has signaled completion.
    ///
    /// Re-evaluated on every accept as well as every complete: a late
    /// accepter makes this false again until they too complete.
    pub fn all_complete(&self) -> bool {
        !self.accepted_by.is_empty() && self.completed_by.len() == self.accepted_by.len()
    }

    /// Record the announcement handle. Returns false if one is already set.
    pub fn set_message_handle(&mut self, handle: MessageHandle) -> bool {
        if self.message_handle.is_some() {
            return false;
        }
        self.message_handle = Some(handle);
        true
    }

    /// Move the status forward. Transitions are monotonic; a request to
    /// move sideways or backwards is refused and returns false.
    pub fn advance(&mut self, next: RequisitionStatus) -> bool {
        if next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }

    /// The participant whose completion closed the set, if any.
    pub fn last_completer(&self) -> Option<ParticipantId> {
        self.completed_by.last().copied()
    }
}
