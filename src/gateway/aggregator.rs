//! Debounced multi-input aggregation.
//!
//! Bursts of inbound items for one conversation are buffered until the
//! conversation has been quiet for `delay`, then handed downstream as a single
//! [`FlushBatch`]. Every arrival restarts the timer. Each buffer carries a
//! generation number so a timer that lost the race to a newer arrival never
//! flushes the newer buffer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zapflow_core::message::{InboundItem, MediaItem};

/// Everything one conversation sent during a quiet window.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushBatch {
    pub conversation_id: String,
    pub items: Vec<InboundItem>,
    pub is_group: bool,
}

impl FlushBatch {
    pub fn has_media(&self) -> bool {
        self.items.iter().any(InboundItem::is_media)
    }

    /// Text items joined with newlines, in arrival order.
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter_map(|item| match item {
                InboundItem::Text { text } => Some(text.trim()),
                InboundItem::Media(_) => None,
            })
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn media(&self) -> Vec<MediaItem> {
        self.items
            .iter()
            .filter_map(|item| match item {
                InboundItem::Media(m) => Some(m.clone()),
                InboundItem::Text { .. } => None,
            })
            .collect()
    }
}

struct Entry {
    items: Vec<InboundItem>,
    is_group: bool,
    timer: JoinHandle<()>,
    generation: u64,
}

type Buffers = Arc<Mutex<HashMap<String, Entry>>>;

pub struct Aggregator {
    buffers: Buffers,
    tx: mpsc::Sender<FlushBatch>,
}

impl Aggregator {
    pub fn new(tx: mpsc::Sender<FlushBatch>) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            tx,
        }
    }

    /// Buffer `item` and restart the conversation's quiet timer with `delay_secs`.
    ///
    /// With `delay_secs <= 0` nothing is buffered: the item (after anything
    /// still buffered for the conversation) goes downstream immediately.
    pub async fn push(&self, conversation_id: &str, item: InboundItem, is_group: bool, delay_secs: i64) {
        if delay_secs <= 0 {
            let mut items = {
                let mut buffers = self.buffers.lock().await;
                match buffers.remove(conversation_id) {
                    Some(entry) => {
                        entry.timer.abort();
                        entry.items
                    }
                    None => Vec::new(),
                }
            };
            items.push(item);
            send(&self.tx, conversation_id, items, is_group).await;
            return;
        }

        let delay = Duration::from_secs(delay_secs.unsigned_abs());
        let mut buffers = self.buffers.lock().await;
        let (mut items, generation) = match buffers.remove(conversation_id) {
            Some(entry) => {
                entry.timer.abort();
                (entry.items, entry.generation + 1)
            }
            None => (Vec::new(), 1),
        };
        items.push(item);

        let timer = tokio::spawn(fire_after(
            Arc::clone(&self.buffers),
            self.tx.clone(),
            conversation_id.to_string(),
            generation,
            delay,
        ));
        debug!(
            "aggregator: {conversation_id} has {} buffered item(s), flush in {delay:?}",
            items.len()
        );
        buffers.insert(
            conversation_id.to_string(),
            Entry {
                items,
                is_group,
                timer,
                generation,
            },
        );
    }

    /// Number of items buffered for a conversation.
    #[cfg(test)]
    pub async fn buffered(&self, conversation_id: &str) -> usize {
        self.buffers
            .lock()
            .await
            .get(conversation_id)
            .map_or(0, |e| e.items.len())
    }

    /// Drop every buffer and cancel its timer. Nothing is flushed.
    pub async fn shutdown(&self) {
        let mut buffers = self.buffers.lock().await;
        let dropped = buffers.len();
        for (_, entry) in buffers.drain() {
            entry.timer.abort();
        }
        if dropped > 0 {
            warn!("aggregator: discarded {dropped} unflushed buffer(s) on shutdown");
        }
    }
}

async fn fire_after(
    buffers: Buffers,
    tx: mpsc::Sender<FlushBatch>,
    conversation_id: String,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    let entry = {
        let mut buffers = buffers.lock().await;
        match buffers.get(&conversation_id) {
            Some(e) if e.generation == generation => buffers.remove(&conversation_id),
            _ => None,
        }
    };
    if let Some(entry) = entry {
        send(&tx, &conversation_id, entry.items, entry.is_group).await;
    }
}

async fn send(tx: &mpsc::Sender<FlushBatch>, conversation_id: &str, items: Vec<InboundItem>, is_group: bool) {
    let batch = FlushBatch {
        conversation_id: conversation_id.to_string(),
        items,
        is_group,
    };
    if tx.send(batch).await.is_err() {
        warn!("aggregator: batch receiver dropped, lost input for {conversation_id}");
    }
}
