use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of inbound media a contact can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

/// A media attachment received from a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    /// Where the transport stored the media (http(s) URL or local path).
    pub url: String,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// One unit of inbound input for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundItem {
    Text { text: String },
    Media(MediaItem),
}

impl InboundItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Media(_))
    }
}

/// An inbound message as handed over by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: Uuid,
    /// Conversation identifier (contact phone or group id).
    pub conversation_id: String,
    /// Human-readable sender name, when the transport knows it.
    #[serde(default)]
    pub sender_name: Option<String>,
    pub item: InboundItem,
    pub timestamp: DateTime<Utc>,
    /// Whether the message was sent from the instance's own number.
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
}

/// One unit of a visible reply, classified for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeliverySegment {
    Text {
        raw: String,
    },
    Image {
        url: String,
        caption: Option<String>,
    },
    Audio {
        url: String,
        caption: Option<String>,
    },
    Video {
        url: String,
        caption: Option<String>,
    },
    Contact {
        phone: String,
        display_name: Option<String>,
        note: Option<String>,
    },
}

impl DeliverySegment {
    /// Short label used in logs and user-facing placeholders.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Audio { .. } => "audio",
            Self::Video { .. } => "video",
            Self::Contact { .. } => "contact",
        }
    }
}

/// A typed payload handed to the transport.
///
/// Media URLs are either http(s) URLs or absolute local file paths that have
/// already been resolved against the asset root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundPayload {
    Text {
        text: String,
    },
    Image {
        url: String,
        caption: Option<String>,
    },
    Audio {
        url: String,
        caption: Option<String>,
    },
    Video {
        url: String,
        caption: Option<String>,
    },
    Contact {
        phone: String,
        display_name: Option<String>,
        note: Option<String>,
    },
}

impl OutboundPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Text representation persisted in the message log.
    pub fn log_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { url, caption }
            | Self::Audio { url, caption }
            | Self::Video { url, caption } => match caption {
                Some(c) => format!("[{}] {url} {c}", self.kind_label()),
                None => format!("[{}] {url}", self.kind_label()),
            },
            Self::Contact {
                phone,
                display_name,
                ..
            } => match display_name {
                Some(name) => format!("[contact] {name} {phone}"),
                None => format!("[contact] {phone}"),
            },
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Audio { .. } => "audio",
            Self::Video { .. } => "video",
            Self::Contact { .. } => "contact",
        }
    }
}

/// Input for a model invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    pub conversation_id: String,
    /// System instructions prepended to the request.
    pub system_prompt: String,
    /// Aggregated user text.
    pub input: String,
    /// Media parts; only sent to providers that support multimodal input.
    #[serde(default)]
    pub media: Vec<MediaItem>,
    /// Provider-specific continuation handle from the previous turn.
    #[serde(default)]
    pub continuation: Option<String>,
}

/// Output of a model invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelReply {
    pub text: String,
    /// Opaque continuation handle (e.g. a thread id); stored, never interpreted.
    #[serde(default)]
    pub continuation: Option<String>,
    pub provider_used: String,
    pub model: Option<String>,
    pub tokens_used: Option<u64>,
    pub processing_time_ms: u64,
}
