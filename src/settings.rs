//! Service tunables.
//!
//! All timeouts in the lifecycle come from here rather than being scattered
//! as literals. Values load from an optional TOML file; anything missing
//! falls back to the defaults below.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tunable timings and command prefix, in seconds on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Delay before the "still open" reminder fires for a new requisition.
    pub reminder_delay_secs: u64,
    /// Per-step timeout for guided command prompts.
    pub prompt_timeout_secs: u64,
    /// Timeout for the completion-details reply.
    pub details_timeout_secs: u64,
    /// Timeout for the post-archive feedback reply.
    pub feedback_timeout_secs: u64,
    /// Prefix that marks a channel message as a command.
    pub command_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reminder_delay_secs: 3600,
            prompt_timeout_secs: 60,
            details_timeout_secs: 300,
            feedback_timeout_secs: 300,
            command_prefix: "!".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, or defaults if the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    pub fn reminder_delay(&self) -> Duration {
        Duration::from_secs(self.reminder_delay_secs)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn details_timeout(&self) -> Duration {
        Duration::from_secs(self.details_timeout_secs)
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_secs(self.feedback_timeout_secs)
    }
}
