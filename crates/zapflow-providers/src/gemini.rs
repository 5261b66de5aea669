//! Google Gemini API provider.
//!
//! Calls the Gemini `generateContent` endpoint. Auth via URL query param.
//! Text-only: media arrive here already flattened to placeholders.

use crate::media_placeholder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};
use zapflow_core::{
    error::ZapError,
    message::{ModelReply, ModelRequest},
    traits::Provider,
};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini API provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    /// Create from config values.
    pub fn from_config(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    usage_metadata: Option<GeminiUsage>,
    response_id: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    total_token_count: u64,
}

fn build_request(request: &ModelRequest) -> GeminiRequest {
    let system_instruction = if request.system_prompt.is_empty() {
        None
    } else {
        Some(GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: request.system_prompt.clone(),
            }],
        })
    };

    let mut text = request.input.clone();
    for item in &request.media {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&media_placeholder(item));
    }

    GeminiRequest {
        contents: vec![GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart { text }],
        }],
        system_instruction,
    }
}

fn reply_text(parsed: &GeminiResponse) -> String {
    parsed
        .candidates
        .as_ref()
        .and_then(|c| c.first())
        .and_then(|c| c.content.as_ref())
        .map(|c| {
            c.parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ZapError> {
        let start = Instant::now();
        let body = build_request(request);

        let url = format!(
            "{GEMINI_BASE_URL}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        debug!("gemini: POST models/{}:generateContent", self.model);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ZapError::Provider(format!("gemini request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ZapError::Provider(format!(
                "gemini returned {status}: {text}"
            )));
        }

        let parsed: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| ZapError::Provider(format!("gemini: failed to parse response: {e}")))?;

        Ok(ModelReply {
            text: reply_text(&parsed),
            continuation: parsed
                .response_id
                .clone()
                .or_else(|| request.continuation.clone()),
            provider_used: "gemini".to_string(),
            model: Some(self.model.clone()),
            tokens_used: parsed.usage_metadata.as_ref().map(|u| u.total_token_count),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            warn!("gemini: no API key configured");
            return false;
        }
        let url = format!("{GEMINI_BASE_URL}/models?key={}", self.api_key);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("gemini not available: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zapflow_core::message::{MediaItem, MediaKind};

    #[test]
    fn test_gemini_provider_name() {
        let p = GeminiProvider::from_config("AIza-test".into(), "gemini-2.0-flash".into());
        assert_eq!(p.name(), "gemini");
        assert!(!p.supports_multimodal());
    }

    #[test]
    fn test_gemini_request_serialization() {
        let req = ModelRequest {
            system_prompt: "Seja breve.".into(),
            input: "Oi".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(build_request(&req)).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Seja breve.");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Oi");
    }

    #[test]
    fn test_gemini_request_no_system_flattens_media() {
        let req = ModelRequest {
            input: "segue".into(),
            media: vec![MediaItem {
                kind: MediaKind::Image,
                url: "https://x/a.jpg".into(),
                mime: None,
                caption: Some("foto".into()),
            }],
            ..Default::default()
        };
        let json = serde_json::to_value(build_request(&req)).unwrap();
        assert!(json.get("systemInstruction").is_none());
        assert_eq!(json["contents"][0]["parts"][0]["text"], "segue\n[image] foto");
    }

    #[test]
    fn test_gemini_response_parsing() {
        let json = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Olá, "},{"text":"tudo bem?"}]}}],"usageMetadata":{"totalTokenCount":25},"responseId":"r-1"}"#;
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(reply_text(&resp), "Olá, tudo bem?");
        assert_eq!(
            resp.usage_metadata.as_ref().map(|u| u.total_token_count),
            Some(25)
        );
        assert_eq!(resp.response_id.as_deref(), Some("r-1"));
    }

    #[test]
    fn test_gemini_empty_candidates() {
        let resp: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(reply_text(&resp).is_empty());
    }
}
