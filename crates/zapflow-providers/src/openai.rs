//! OpenAI-compatible API provider.
//!
//! Works with OpenAI's API and any compatible endpoint. Remote images are sent
//! as `image_url` content parts; other media degrade to text placeholders.

use crate::{is_remote_image, media_placeholder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};
use zapflow_core::{
    error::ZapError,
    message::{ModelReply, ModelRequest},
    traits::Provider,
};

/// OpenAI-compatible provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    /// Create from config values.
    pub fn from_config(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

/// Build OpenAI-format messages: optional system message, then one user turn.
pub(crate) fn build_openai_messages(request: &ModelRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if !request.system_prompt.is_empty() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: ChatContent::Text(request.system_prompt.clone()),
        });
    }

    if request.media.is_empty() {
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: ChatContent::Text(request.input.clone()),
        });
        return messages;
    }

    let mut text = request.input.clone();
    let mut images = Vec::new();
    for item in &request.media {
        if is_remote_image(item) {
            images.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: item.url.clone(),
                },
            });
            if let Some(c) = item.caption.as_deref().filter(|c| !c.trim().is_empty()) {
                push_line(&mut text, c.trim());
            }
        } else {
            push_line(&mut text, &media_placeholder(item));
        }
    }

    let mut parts = Vec::with_capacity(images.len() + 1);
    if !text.is_empty() {
        parts.push(ContentPart::Text { text });
    }
    parts.extend(images);
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: ChatContent::Parts(parts),
    });
    messages
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
}

#[derive(Serialize, Clone)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: ChatContent,
}

#[derive(Serialize, Clone)]
#[serde(untagged)]
pub(crate) enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Clone)]
pub(crate) struct ImageUrl {
    pub url: String,
}

#[derive(Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Conversation id, forwarded as the end-user identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub id: Option<String>,
    pub choices: Option<Vec<ChatChoice>>,
    pub model: Option<String>,
    pub usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
pub(crate) struct ChatChoice {
    pub message: Option<ChatReplyMessage>,
}

#[derive(Deserialize)]
pub(crate) struct ChatReplyMessage {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ChatUsage {
    pub total_tokens: Option<u64>,
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_multimodal(&self) -> bool {
        true
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ZapError> {
        let start = Instant::now();

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: build_openai_messages(request),
            user: Some(request.conversation_id.clone()).filter(|c| !c.is_empty()),
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("openai: POST {url} model={}", self.model);

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ZapError::Provider(format!("openai request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ZapError::Provider(format!(
                "openai returned {status}: {text}"
            )));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| ZapError::Provider(format!("openai: failed to parse response: {e}")))?;

        Ok(into_reply(parsed, request, start.elapsed().as_millis() as u64))
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            warn!("openai: no API key configured");
            return false;
        }
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        match self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("openai not available: {e}");
                false
            }
        }
    }
}

/// Empty model output stays empty; the pipeline decides what to do with it.
fn into_reply(parsed: ChatCompletionResponse, request: &ModelRequest, elapsed_ms: u64) -> ModelReply {
    let text = parsed
        .choices
        .as_ref()
        .and_then(|c| c.first())
        .and_then(|c| c.message.as_ref())
        .and_then(|m| m.content.clone())
        .unwrap_or_default();

    ModelReply {
        text,
        continuation: parsed.id.or_else(|| request.continuation.clone()),
        provider_used: "openai".to_string(),
        model: parsed.model,
        tokens_used: parsed.usage.as_ref().and_then(|u| u.total_tokens),
        processing_time_ms: elapsed_ms,
    }
}
