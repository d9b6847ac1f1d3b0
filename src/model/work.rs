//! Conversation messages as units of vectorize work.
//!
//! A message row carries its own `vector_status`. It is written `pending` by
//! whoever records the message and moves exactly once to a terminal status
//! by the vectorize worker.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Vectorize lifecycle of a message.
///
/// ```text
/// pending ──→ completed
///    │──────→ skipped      (nothing to embed)
///    └──────→ failed       (pipeline error, not retried automatically)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    Completed,
    Skipped,
    Failed,
}

impl WorkStatus {
    /// Pending may move to any terminal status; terminal statuses never move.
    pub fn can_transition_to(self, to: WorkStatus) -> bool {
        self == WorkStatus::Pending && to.is_terminal()
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Completed => "completed",
            WorkStatus::Skipped => "skipped",
            WorkStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(WorkStatus::Pending),
            "completed" => Ok(WorkStatus::Completed),
            "skipped" => Ok(WorkStatus::Skipped),
            "failed" => Ok(WorkStatus::Failed),
            other => Err(Error::Other(format!("unknown work status: {other}"))),
        }
    }
}

/// Validate a status transition, returning an error if disallowed.
pub fn validate_transition(from: WorkStatus, to: WorkStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Position of a pending message in a newest-first scan. Scans resume
/// strictly after the last key seen, so rows settling mid-scan never shift
/// later pages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendingKey {
    pub create_time: i64,
    pub message_id: String,
}

pub const CHAT_TYPE_P2P: &str = "p2p";

/// A stored conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message_id: String,
    pub user_id: String,
    pub chat_id: String,
    /// `"p2p"` or `"group"`.
    pub chat_type: String,
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// Raw content, see [`MessageContent::parse`].
    pub content: String,
    /// Milliseconds since the epoch.
    pub create_time: i64,
    /// Bot identity the message arrived through; selects attachment credentials.
    pub bot_name: Option<String>,
    pub root_message_id: Option<String>,
    pub reply_message_id: Option<String>,
    pub vector_status: WorkStatus,
}

impl ConversationMessage {
    pub fn is_p2p(&self) -> bool {
        self.chat_type == CHAT_TYPE_P2P
    }
}

/// Text and attachment references carried by a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContent {
    pub text: String,
    pub image_keys: Vec<String>,
}

#[derive(Deserialize)]
struct RichContent {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "images")]
    image_keys: Vec<String>,
}

impl MessageContent {
    /// Accepts `{"text": .., "image_keys": [..]}`, a JSON string, or plain text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(rich) = serde_json::from_str::<RichContent>(trimmed) {
                return Self {
                    text: rich.text.unwrap_or_default().trim().to_string(),
                    image_keys: rich
                        .image_keys
                        .into_iter()
                        .filter(|k| !k.trim().is_empty())
                        .collect(),
                };
            }
        } else if trimmed.starts_with('"') {
            if let Ok(text) = serde_json::from_str::<String>(trimmed) {
                return Self::text(text.trim());
            }
        }
        Self::text(trimmed)
    }

    fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            image_keys: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.image_keys.is_empty()
    }
}
