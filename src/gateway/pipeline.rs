//! Response pipeline: model invocation, command execution, assembly, delivery.

use super::aggregator::FlushBatch;
use super::delivery::DeliveryReport;
use super::segments::{split_segments, visible_text};
use super::Gateway;
use crate::executor::SessionConfig;
use crate::markers::extract;
use rand::seq::SliceRandom;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use zapflow_core::{
    clock::{format_wall, now_wall},
    error::ZapError,
    message::{MediaItem, ModelRequest, OutboundPayload},
};
use zapflow_providers::media_placeholder;

/// Why a response produced nothing for the contact.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No cleaned text, no command notes, no fallback.
    #[error("response has no visible content")]
    EmptyResponse,
    #[error(transparent)]
    Collaborator(#[from] ZapError),
}

impl Gateway {
    /// Answer one aggregated burst of input.
    pub async fn respond(self: &Arc<Self>, batch: FlushBatch) {
        let session = SessionConfig {
            is_group: batch.is_group,
            ..Default::default()
        };
        let conv = batch.conversation_id.as_str();
        info!(
            "responding to {conv} ({} item(s), media: {})",
            batch.items.len(),
            batch.has_media()
        );

        match self
            .run_prompt(conv, batch.text(), batch.media(), session)
            .await
        {
            Ok(report) => debug!(
                "{conv}: {} delivered, {} failed, {} missing assets",
                report.delivered, report.failed, report.missing_assets
            ),
            Err(PipelineError::EmptyResponse) => {
                warn!("{conv}: model response had no visible content");
                self.send_apology(conv).await;
            }
            Err(PipelineError::Collaborator(e)) => {
                error!("{conv}: response failed: {e}");
                self.send_apology(conv).await;
            }
        }
    }

    fn build_request(&self, conversation_id: &str, input: String, media: Vec<MediaItem>) -> ModelRequest {
        let mut input = input;
        let mut media = media;
        if !media.is_empty() && !self.provider.supports_multimodal() {
            warn!(
                "provider {} is text-only, sending {} media item(s) as placeholders",
                self.provider.name(),
                media.len()
            );
            let placeholders: Vec<String> = media.iter().map(media_placeholder).collect();
            input = std::iter::once(input)
                .chain(placeholders)
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            media.clear();
        }

        let mut system_prompt = self.config.zapflow.system_prompt.trim().to_string();
        if !system_prompt.is_empty() {
            system_prompt.push_str("\n\n");
        }
        system_prompt.push_str(&format!("Data e hora atual: {}", format_wall(&now_wall())));

        ModelRequest {
            conversation_id: conversation_id.to_string(),
            system_prompt,
            input,
            media,
            continuation: self.continuation(conversation_id),
        }
    }

    /// Invoke the model with `input` and dispatch whatever it answers.
    pub async fn run_prompt(
        self: &Arc<Self>,
        conversation_id: &str,
        input: String,
        media: Vec<MediaItem>,
        session: SessionConfig,
    ) -> Result<DeliveryReport, PipelineError> {
        let request = self.build_request(conversation_id, input, media);
        if request.input.trim().is_empty() && request.media.is_empty() {
            debug!("{conversation_id}: nothing to send to the model");
            return Ok(DeliveryReport::default());
        }

        let reply = self.provider.complete(&request).await?;
        info!(
            "{conversation_id}: {} answered in {}ms",
            reply.provider_used, reply.processing_time_ms
        );
        if let Some(next) = &reply.continuation {
            self.set_continuation(conversation_id, next);
        }
        self.dispatch_response(conversation_id, &reply.text, session)
            .await
    }

    /// Extract and run the commands in `text`, then deliver its visible part.
    pub async fn dispatch_response(
        self: &Arc<Self>,
        conversation_id: &str,
        text: &str,
        session: SessionConfig,
    ) -> Result<DeliveryReport, PipelineError> {
        let extraction = extract(text);
        let report = self
            .executor
            .execute(conversation_id, extraction.commands, &session)
            .await;

        let response = &self.config.response;
        let segments = visible_text(&extraction.cleaned_text, &report.notes, response)
            .map(|visible| split_segments(&visible, response.segment_delimiter))
            .unwrap_or_default();
        let outcome = if segments.is_empty() {
            Err(PipelineError::EmptyResponse)
        } else {
            let metadata = json!({ "commands": report.commands });
            Ok(self
                .deliverer
                .deliver(conversation_id, &segments, Some(&metadata))
                .await)
        };

        // The nested run starts only after this response went out.
        if report.self_trigger && session.allow_self_trigger {
            self.spawn_nested(conversation_id, session.nested());
        }
        outcome
    }

    /// Run the configured continuation prompt once more, without self-trigger.
    fn spawn_nested(self: &Arc<Self>, conversation_id: &str, session: SessionConfig) {
        let gateway = Arc::clone(self);
        let conversation_id = conversation_id.to_string();
        let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            let prompt = gateway.config.response.boomerang_prompt.clone();
            info!("{conversation_id}: starting self-triggered run");
            match gateway
                .run_prompt(&conversation_id, prompt, Vec::new(), session)
                .await
            {
                Ok(_) => {}
                Err(PipelineError::EmptyResponse) => {
                    warn!("{conversation_id}: self-triggered run had no visible content");
                    gateway.send_apology(&conversation_id).await;
                }
                Err(PipelineError::Collaborator(e)) => {
                    error!("{conversation_id}: self-triggered run failed: {e}");
                }
            }
        });
        tokio::spawn(task);
    }

    /// Send one configured apology at random. No-op when none are configured.
    pub(super) async fn send_apology(&self, conversation_id: &str) {
        let apology = {
            let mut rng = rand::thread_rng();
            self.config.response.apologies.choose(&mut rng).cloned()
        };
        let Some(apology) = apology else {
            return;
        };
        let payload = OutboundPayload::text(&apology);
        match self.transport.send(conversation_id, &payload).await {
            Ok(()) => {
                self.outgoing.remember(conversation_id, &apology);
                self.deliverer
                    .record(conversation_id, &payload, Some(&json!({ "apology": true })))
                    .await;
            }
            Err(e) => error!("failed to send apology to {conversation_id}: {e}"),
        }
    }
}
