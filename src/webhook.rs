//! Webhook transport: hands outbound payloads to a WhatsApp bridge over HTTP.
//!
//! Every payload is POSTed as `{"target": ..., "payload": {...}}` to the
//! configured URL. The bridge answers 2xx once it accepted the message.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use zapflow_core::{
    config::TransportConfig, error::ZapError, message::OutboundPayload, traits::Transport,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct Envelope<'a> {
    target: &'a str,
    payload: &'a OutboundPayload,
}

pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl WebhookTransport {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.webhook_url.trim().to_string(),
            token: config.api_token.clone(),
        }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, target: &str, payload: &OutboundPayload) -> Result<(), ZapError> {
        if self.url.is_empty() {
            return Err(ZapError::Transport("no webhook_url configured".into()));
        }
        debug!("webhook: {} to {target}", payload.kind_label());

        let mut req = self
            .client
            .post(&self.url)
            .timeout(SEND_TIMEOUT)
            .json(&Envelope { target, payload });
        if !self.token.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.token));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ZapError::Transport(format!("webhook request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ZapError::Transport(format!(
                "webhook returned {status}: {text}"
            )));
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        !self.url.is_empty()
    }
}
