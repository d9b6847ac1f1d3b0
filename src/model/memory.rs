//! Long-term knowledge about a subject and the evidence it is built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence given to a new fact when the extractor supplies none.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

/// One durable statement about a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub category: String,
    pub content: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub extracted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_confirmed_at: Option<DateTime<Utc>>,
}

impl Fact {
    pub fn new(category: impl Into<String>, content: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: category.into(),
            content: content.into(),
            confidence,
            extracted_at: None,
            last_confirmed_at: None,
        }
    }

    pub fn matches(&self, category: &str, content: &str) -> bool {
        self.category == category && self.content == content
    }
}

/// Identifies an existing fact by `(category, content)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactKey {
    pub category: String,
    pub content: String,
}

/// A fact the extractor proposes to add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFact {
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// A change to an existing fact, matched by `(category, original_content)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactUpdate {
    pub category: String,
    pub original_content: String,
    #[serde(default)]
    pub new_content: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Extractor output: what to add, change and drop, plus free-form notes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactDelta {
    #[serde(default)]
    pub new_facts: Vec<NewFact>,
    #[serde(default)]
    pub updated_facts: Vec<FactUpdate>,
    #[serde(default)]
    pub removed_facts: Vec<FactKey>,
    #[serde(default)]
    pub personality_note: Option<String>,
    #[serde(default)]
    pub communication_style: Option<String>,
}

impl FactDelta {
    /// No fact is added, changed or removed.
    pub fn is_empty(&self) -> bool {
        self.new_facts.is_empty() && self.updated_facts.is_empty() && self.removed_facts.is_empty()
    }
}

/// Stored knowledge for one subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Knowledge {
    pub subject_id: String,
    pub facts: Vec<Fact>,
    pub personality_note: Option<String>,
    pub communication_style: Option<String>,
    /// `create_time` (ms) of the newest event already consolidated.
    pub cursor: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A subject with enough unconsolidated events to be worth a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectCursor {
    pub subject_id: String,
    pub since: i64,
    pub pending_events: i64,
}

/// A message as shown to the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub message_id: String,
    pub user_id: String,
    pub role: String,
    pub text: String,
    pub create_time: i64,
}

/// One of the subject's own events with the conversation around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub chat_id: String,
    pub event: EventRecord,
    pub before: Vec<EventRecord>,
    pub after: Vec<EventRecord>,
    pub reply_to: Option<EventRecord>,
}
