//! Persistent record shapes shared between the store and the command engine.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Tag used when a schedule command leaves the tag blank.
pub const DEFAULT_TAG: &str = "default";

/// Category used when a schedule command leaves the category blank.
pub const DEFAULT_CATEGORY: &str = "followup";

/// Who a scheduled job is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobScope {
    Individual,
    Group,
}

impl JobScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "individual" => Some(Self::Individual),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// Lifecycle of a scheduled job. `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Sent,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A persisted scheduled message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub scope: JobScope,
    pub target: String,
    pub message: String,
    /// UTC-3 wall clock, `YYYY-MM-DD HH:MM:SS`.
    pub scheduled_at: String,
    pub status: JobStatus,
    pub tag: String,
    pub category: String,
    pub instance_id: String,
    pub error: Option<String>,
    pub created_at: String,
    pub sent_at: Option<String>,
}

/// A job about to be enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub scope: JobScope,
    pub target: String,
    pub message: String,
    pub scheduled_at: NaiveDateTime,
    pub tag: String,
    pub category: String,
}

impl NewJob {
    /// Build an individual job, normalizing blank tag/category to defaults.
    pub fn individual(
        target: &str,
        message: &str,
        scheduled_at: NaiveDateTime,
        tag: Option<&str>,
        category: Option<&str>,
    ) -> Self {
        Self {
            scope: JobScope::Individual,
            target: target.to_string(),
            message: message.to_string(),
            scheduled_at,
            tag: normalize_label(tag, DEFAULT_TAG),
            category: normalize_label(category, DEFAULT_CATEGORY),
        }
    }

    /// Same as [`NewJob::individual`] but addressed to a group.
    pub fn group(
        target: &str,
        message: &str,
        scheduled_at: NaiveDateTime,
        tag: Option<&str>,
        category: Option<&str>,
    ) -> Self {
        Self {
            scope: JobScope::Group,
            ..Self::individual(target, message, scheduled_at, tag, category)
        }
    }
}

/// Return the trimmed label, or `default` when blank.
pub fn normalize_label(value: Option<&str>, default: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

/// Per-contact metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub conversation_id: String,
    pub display_name: Option<String>,
    pub tags: Vec<String>,
    pub opted_out: bool,
}

impl ContactRecord {
    pub fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            ..Default::default()
        }
    }
}

/// A calendar event as reported by the calendar backend (calendar-local wall clock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// An event to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub title: String,
    pub description: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Conversation the booking was made for.
    pub attendee: String,
}

/// An email to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub from: String,
    pub html: bool,
}
