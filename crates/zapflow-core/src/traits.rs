use crate::{
    error::ZapError,
    message::{ModelRequest, ModelReply, OutboundPayload},
    records::{
        CalendarEvent, ContactRecord, EventDraft, JobScope, JobStatus, NewJob, OutgoingMail,
        ScheduledJob,
    },
};
use async_trait::async_trait;
use chrono::NaiveDateTime;

/// A language model that answers one prompt at a time.
///
/// Every model backend (OpenAI-compatible, Gemini, ...) implements this trait
/// so the pipeline never depends on a specific SDK.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Whether the provider accepts image/audio/video parts.
    fn supports_multimodal(&self) -> bool {
        false
    }

    /// Ask the model for text.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ZapError>;

    /// Check if the provider is configured and reachable.
    async fn is_available(&self) -> bool;
}

/// Messaging transport that sends typed payloads to a conversation.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one payload to `target`.
    async fn send(&self, target: &str, payload: &OutboundPayload) -> Result<(), ZapError>;

    /// Whether the transport can currently deliver messages.
    async fn is_connected(&self) -> bool;
}

/// Per-conversation context, instance variables, contacts, and logs.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_context(&self, conversation_id: &str, key: &str)
        -> Result<Option<String>, ZapError>;

    async fn set_context(&self, conversation_id: &str, key: &str, value: &str)
        -> Result<(), ZapError>;

    /// Returns `true` if the key existed.
    async fn delete_context(&self, conversation_id: &str, key: &str) -> Result<bool, ZapError>;

    /// Remove every key for the conversation. Returns the number removed.
    async fn clear_context(&self, conversation_id: &str) -> Result<u64, ZapError>;

    async fn list_context(&self, conversation_id: &str) -> Result<Vec<(String, String)>, ZapError>;

    /// Instance-scoped persistent variable.
    async fn get_variable(&self, name: &str) -> Result<Option<String>, ZapError>;

    async fn set_variable(&self, name: &str, value: &str) -> Result<(), ZapError>;

    async fn get_contact(&self, conversation_id: &str) -> Result<Option<ContactRecord>, ZapError>;

    async fn upsert_contact(&self, contact: &ContactRecord) -> Result<(), ZapError>;

    async fn log_event(
        &self,
        conversation_id: &str,
        name: &str,
        details: Option<&str>,
    ) -> Result<(), ZapError>;

    /// Persist a message for audit. `role` is "user" or "assistant".
    async fn record_message(
        &self,
        conversation_id: &str,
        role: &str,
        text: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<(), ZapError>;

    /// Record an admin-facing alert (e.g. a missing local asset).
    async fn record_alert(
        &self,
        conversation_id: &str,
        kind: &str,
        detail: &str,
    ) -> Result<(), ZapError>;
}

/// Durable storage for scheduled messages.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Insert a pending job and return its id.
    async fn enqueue_job(&self, job: &NewJob) -> Result<String, ZapError>;

    /// Pending jobs addressed to a conversation, oldest first.
    async fn pending_jobs_for(
        &self,
        target: &str,
        tag: Option<&str>,
    ) -> Result<Vec<ScheduledJob>, ZapError>;

    /// Physically delete one job of a conversation. Returns `true` if removed.
    async fn delete_job(&self, target: &str, id: &str) -> Result<bool, ZapError>;

    async fn delete_jobs_by_tag(&self, target: &str, tag: &str) -> Result<u64, ZapError>;

    async fn delete_jobs_by_category(&self, target: &str, category: &str)
        -> Result<u64, ZapError>;

    /// Move every pending job of `scope` for a conversation to `failed` with `cause`.
    async fn cancel_pending_for(
        &self,
        scope: JobScope,
        target: &str,
        cause: &str,
    ) -> Result<u64, ZapError>;

    /// Cancel all pending jobs of the job's scope and target, then enqueue `job`, atomically.
    /// Returns `(cancelled, new_id)`.
    async fn reset_cadence(&self, job: &NewJob, cause: &str) -> Result<(u64, String), ZapError>;

    /// Pending jobs of `scope` due at or before `now`, up to `limit`.
    async fn due_jobs(
        &self,
        scope: JobScope,
        now: &NaiveDateTime,
        limit: u32,
    ) -> Result<Vec<ScheduledJob>, ZapError>;

    async fn job_status(&self, id: &str) -> Result<Option<JobStatus>, ZapError>;

    /// pending → sent. Returns `false` if the job was no longer pending.
    async fn mark_sent(&self, id: &str) -> Result<bool, ZapError>;

    /// pending → failed with `cause`. Returns `false` if the job was no longer pending.
    async fn mark_failed(&self, id: &str, cause: &str) -> Result<bool, ZapError>;
}

/// Calendar backend, already bound to a resolved calendar.
#[async_trait]
pub trait Calendar: Send + Sync {
    async fn list_events(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, ZapError>;

    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, ZapError>;

    async fn move_event(
        &self,
        id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<CalendarEvent, ZapError>;

    async fn cancel_event(&self, id: &str) -> Result<(), ZapError>;
}

/// Outbound email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(&self, mail: &OutgoingMail) -> Result<(), ZapError>;
}

/// Retrieve the text content of a URL.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    /// Fetch `url` and return at most `max_chars` characters of text.
    async fn fetch_text(&self, url: &str, max_chars: usize) -> Result<String, ZapError>;
}
