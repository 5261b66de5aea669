//! Sequential segment delivery and the recent-outgoing echo cache.

use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use zapflow_core::{
    error::ZapError,
    message::{DeliverySegment, OutboundPayload},
    shellexpand,
    traits::{StateStore, Transport},
};

/// Log line stored when no segment of a response reached the contact.
pub(super) const UNDELIVERED_LOG: &str = "[response not delivered]";

/// Texts recently sent per target, so transport echoes of our own messages
/// are not treated as operator input. Bounded by count and age.
pub struct RecentOutgoing {
    entries: Mutex<VecDeque<(Instant, String, String)>>,
    capacity: usize,
    ttl: Duration,
}

impl RecentOutgoing {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<(Instant, String, String)>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn prune(&self, entries: &mut VecDeque<(Instant, String, String)>) {
        let now = Instant::now();
        while entries
            .front()
            .is_some_and(|(at, _, _)| now.duration_since(*at) > self.ttl)
        {
            entries.pop_front();
        }
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn remember(&self, target: &str, text: &str) {
        let mut entries = self.lock();
        entries.push_back((Instant::now(), target.to_string(), text.trim().to_string()));
        self.prune(&mut entries);
    }

    pub fn is_recent(&self, target: &str, text: &str) -> bool {
        let mut entries = self.lock();
        self.prune(&mut entries);
        let text = text.trim();
        entries.iter().any(|(_, t, m)| t == target && m == text)
    }

    /// Live entries, after expiry.
    #[cfg(test)]
    pub fn count(&self) -> usize {
        let mut entries = self.lock();
        self.prune(&mut entries);
        entries.len()
    }
}

/// Why a single segment could not be delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("missing asset: {0}")]
    MissingAsset(String),
    #[error(transparent)]
    Send(#[from] ZapError),
}

/// Outcome of one [`Deliverer::deliver`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub missing_assets: usize,
}

/// Turns segments into transport payloads and sends them in order.
pub struct Deliverer {
    transport: Arc<dyn Transport>,
    state: Arc<dyn StateStore>,
    outgoing: Arc<RecentOutgoing>,
    asset_root: PathBuf,
    admin_target: Option<String>,
}

impl Deliverer {
    pub fn new(
        transport: Arc<dyn Transport>,
        state: Arc<dyn StateStore>,
        outgoing: Arc<RecentOutgoing>,
        asset_root: &str,
        admin_target: &str,
    ) -> Self {
        Self {
            transport,
            state,
            outgoing,
            asset_root: PathBuf::from(shellexpand(asset_root)),
            admin_target: (!admin_target.trim().is_empty()).then(|| admin_target.trim().to_string()),
        }
    }

    async fn resolve_media(&self, url: &str) -> Result<String, DeliveryError> {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(url.to_string());
        }
        let path = self.asset_root.join(Path::new(url));
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path.to_string_lossy().into_owned()),
            _ => Err(DeliveryError::MissingAsset(url.to_string())),
        }
    }

    /// Map a segment to its payload, resolving local media against the asset root.
    pub async fn payload_for(&self, segment: &DeliverySegment) -> Result<OutboundPayload, DeliveryError> {
        Ok(match segment {
            DeliverySegment::Text { raw } => OutboundPayload::text(raw.clone()),
            DeliverySegment::Image { url, caption } => OutboundPayload::Image {
                url: self.resolve_media(url).await?,
                caption: caption.clone(),
            },
            DeliverySegment::Audio { url, caption } => OutboundPayload::Audio {
                url: self.resolve_media(url).await?,
                caption: caption.clone(),
            },
            DeliverySegment::Video { url, caption } => OutboundPayload::Video {
                url: self.resolve_media(url).await?,
                caption: caption.clone(),
            },
            DeliverySegment::Contact {
                phone,
                display_name,
                note,
            } => OutboundPayload::Contact {
                phone: phone.clone(),
                display_name: display_name.clone(),
                note: note.clone(),
            },
        })
    }

    /// Send one segment and remember its text for echo suppression.
    pub async fn send_segment(
        &self,
        target: &str,
        segment: &DeliverySegment,
    ) -> Result<OutboundPayload, DeliveryError> {
        let payload = self.payload_for(segment).await?;
        self.transport.send(target, &payload).await?;
        if let OutboundPayload::Text { text } = &payload {
            self.outgoing.remember(target, text);
        }
        Ok(payload)
    }

    /// Persist a delivered payload. `metadata` goes on this message only.
    pub async fn record(&self, target: &str, payload: &OutboundPayload, metadata: Option<&Value>) {
        if let Err(e) = self
            .state
            .record_message(target, "assistant", &payload.log_text(), metadata)
            .await
        {
            warn!("failed to record outgoing message for {target}: {e}");
        }
    }

    /// Record a missing local asset for the admin; the contact is told nothing.
    pub async fn report_missing_asset(&self, target: &str, url: &str) {
        warn!("missing asset for {target}: {url}");
        if let Err(e) = self.state.record_alert(target, "missing_asset", url).await {
            error!("failed to record missing-asset alert: {e}");
        }
        if let Some(admin) = &self.admin_target {
            let notice = format!("Arquivo não encontrado ao responder {target}: {url}");
            match self
                .transport
                .send(admin, &OutboundPayload::text(&notice))
                .await
            {
                Ok(()) => self.outgoing.remember(admin, &notice),
                Err(e) => warn!("failed to notify admin about missing asset: {e}"),
            }
        }
    }

    /// Deliver `segments` to `target` in order. Only the first recorded
    /// message carries `metadata`. Failures never stop later segments.
    pub async fn deliver(
        &self,
        target: &str,
        segments: &[DeliverySegment],
        metadata: Option<&Value>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut metadata = metadata;

        for segment in segments {
            match self.send_segment(target, segment).await {
                Ok(payload) => {
                    report.delivered += 1;
                    self.record(target, &payload, metadata.take()).await;
                }
                Err(DeliveryError::MissingAsset(url)) => {
                    report.missing_assets += 1;
                    self.report_missing_asset(target, &url).await;
                }
                Err(DeliveryError::Send(e)) => {
                    report.failed += 1;
                    warn!("delivery of {} to {target} failed: {e}", segment.kind_label());
                    if let Some(payload) = self.send_placeholder(target, segment).await {
                        self.record(target, &payload, metadata.take()).await;
                    }
                }
            }
        }
        // Nothing reached the contact: keep the command results anyway.
        if let Some(metadata) = metadata {
            if let Err(e) = self
                .state
                .record_message(target, "assistant", UNDELIVERED_LOG, Some(metadata))
                .await
            {
                warn!("failed to record undelivered response for {target}: {e}");
            }
        }
        debug!(
            "delivered {}/{} segments to {target}",
            report.delivered,
            segments.len()
        );
        report
    }

    /// Tell the contact a segment was lost. Returns the payload when it went out.
    async fn send_placeholder(
        &self,
        target: &str,
        segment: &DeliverySegment,
    ) -> Option<OutboundPayload> {
        let text = format!("Não consegui enviar {}.", placeholder_noun(segment));
        let payload = OutboundPayload::text(&text);
        match self.transport.send(target, &payload).await {
            Ok(()) => {
                self.outgoing.remember(target, &text);
                Some(payload)
            }
            Err(e) => {
                warn!("placeholder to {target} also failed: {e}");
                None
            }
        }
    }
}

fn placeholder_noun(segment: &DeliverySegment) -> &'static str {
    match segment {
        DeliverySegment::Text { .. } => "a mensagem",
        DeliverySegment::Image { .. } => "a imagem",
        DeliverySegment::Audio { .. } => "o áudio",
        DeliverySegment::Video { .. } => "o vídeo",
        DeliverySegment::Contact { .. } => "o contato",
    }
}
