//! User-facing message templates.
//!
//! Every string the service posts or sends lives here so the lifecycle code
//! stays free of formatting concerns.

use crate::requisition::{ParticipantId, Requisition};

/// Platform mention syntax for a participant.
pub fn mention(participant: ParticipantId) -> String {
    format!("<@{}>", participant)
}

/// The announcement posted when a requisition opens.
pub fn announcement(label: &str, req: &Requisition) -> String {
    format!(
        "**{} - {}**\n\
         **Request from {}:**\n\
         **Material:** {}\n\
         **Quantity:** {}\n\
         **Payment:** {}\n\
         **Deadline:** {}\n\
         React with ✋ to accept this job. React with ✅ when completed.\n",
        label,
        req.region,
        mention(req.requester),
        req.material,
        req.quantity,
        req.payment,
        req.deadline.format("%Y-%m-%d %H:%M:%S"),
    )
}

/// The archive record posted when a requisition closes.
pub fn archive_record(label: &str, req: &Requisition) -> String {
    let completers: Vec<String> = req.completed_by.iter().copied().map(mention).collect();
    format!(
        "**{} - {}**\n\
         **Archived Request from {}:**\n\
         **Material:** {}\n\
         **Quantity:** {}\n\
         **Payment:** {}\n\
         **Deadline:** {}\n\
         **Completed by:** {}\n\
         **Completion Details:** {}\n",
        label,
        req.region,
        mention(req.requester),
        req.material,
        req.quantity,
        req.payment,
        req.deadline.format("%Y-%m-%d %H:%M:%S"),
        completers.join(", "),
        req.completion_details,
    )
}

/// Appended to an already-posted archive record when feedback arrives.
pub fn archive_feedback(existing: &str, feedback: &str) -> String {
    format!("{}\n**Feedback:** {}", existing, feedback)
}

pub fn accepted_notice(material: &str) -> String {
    format!("You have accepted the requisition for {}.", material)
}

pub fn accepter_joined_notice(accepter: ParticipantId, material: &str) -> String {
    format!(
        "{} has accepted your requisition for {}.",
        mention(accepter),
        material
    )
}

pub fn all_complete_notice(material: &str) -> String {
    format!(
        "All parties have completed the requisition for {}.",
        material
    )
}

pub fn details_prompt(material: &str) -> String {
    format!(
        "Please provide completion details for the requisition `{}` \
         (e.g., where the resources are left, meeting arrangements, etc.). \
         You have 5 minutes to respond.",
        material
    )
}

pub fn details_forwarded(material: &str, details: &str) -> String {
    format!(
        "Completion details for your requisition `{}`: {}",
        material, details
    )
}

pub fn feedback_prompt() -> String {
    "Your requisition has been completed and archived!\n\n\
     **Please provide feedback** on your experience in a few sentences.\n\
     I'll add it onto the archived post. Provide feedback here:"
        .to_string()
}

pub fn reminder_notice(material: &str) -> String {
    format!("Reminder: Your requisition for {} is still open.", material)
}

/// Fallback when details collection times out.
pub const NO_DETAILS_PROVIDED: &str = "No details provided.";

pub const FEEDBACK_THANKS: &str = "Thank you for your feedback!";

pub const CREATION_TIMED_OUT: &str = "Request timed out. Please try again.";

pub const NOT_CONFIGURED_HINT: &str =
    "This community is not configured yet. An administrator must run the config command first.";

pub const ADMIN_ONLY: &str = "You do not have the necessary permissions to use this command.";

pub fn config_confirmation(announce: &str, archive: &str, label: &str) -> String {
    format!(
        "Requisition channel set to <#{}>, archive channel set to <#{}>, \
         and community label set to `{}`.",
        announce, archive, label
    )
}
