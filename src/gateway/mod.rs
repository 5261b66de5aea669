//! Gateway: the session coordinator tying transport, model, executor, and timers together.
//!
//! Inbound items go through the [`Aggregator`]; each flushed batch is answered by
//! the pipeline. The [`Dispatcher`] independently delivers due scheduled jobs
//! through the same transport.

mod aggregator;
mod delivery;
mod pipeline;
mod scheduler;
pub mod segments;


pub use delivery::RecentOutgoing;

use aggregator::{Aggregator, FlushBatch};
use delivery::Deliverer;
use scheduler::Dispatcher;

use crate::executor::{Executor, ExecutorSettings};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zapflow_core::{
    config::Config,
    message::{IncomingMessage, InboundItem},
    traits::{Calendar, Mailer, Provider, SchedulerStore, StateStore, Transport, WebFetcher},
};
use zapflow_providers::media_placeholder;

/// Capacity of the flushed-batch queue between aggregator and pipeline.
const BATCH_QUEUE: usize = 256;

/// WhatsApp group conversation ids end with this suffix.
pub fn is_group_id(conversation_id: &str) -> bool {
    conversation_id.ends_with("@g.us")
}

/// The central coordinator. Created once at startup, shared as `Arc<Gateway>`.
pub struct Gateway {
    pub(super) provider: Arc<dyn Provider>,
    pub(super) state: Arc<dyn StateStore>,
    pub(super) jobs: Arc<dyn SchedulerStore>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) executor: Executor,
    pub(super) deliverer: Arc<Deliverer>,
    pub(super) dispatcher: Arc<Dispatcher>,
    pub(super) aggregator: Aggregator,
    pub(super) outgoing: Arc<RecentOutgoing>,
    pub(super) config: Config,
    /// Provider continuation handle per conversation.
    continuations: StdMutex<HashMap<String, String>>,
    batches: Mutex<Option<mpsc::Receiver<FlushBatch>>>,
    uptime: Instant,
}

impl Gateway {
    pub fn new(
        config: Config,
        provider: Arc<dyn Provider>,
        state: Arc<dyn StateStore>,
        jobs: Arc<dyn SchedulerStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let response = &config.response;
        let outgoing = Arc::new(RecentOutgoing::new(
            response.dedup_capacity,
            Duration::from_secs(response.dedup_ttl_secs),
        ));
        let deliverer = Arc::new(Deliverer::new(
            transport.clone(),
            state.clone(),
            outgoing.clone(),
            &response.asset_root,
            &config.zapflow.admin_target,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            jobs.clone(),
            state.clone(),
            transport.clone(),
            deliverer.clone(),
            response.segment_delimiter,
            config.scheduler.batch_size,
        ));
        let executor = Executor::new(
            state.clone(),
            jobs.clone(),
            transport.clone(),
            outgoing.clone(),
            ExecutorSettings::from_config(&config),
        );
        let (tx, rx) = mpsc::channel(BATCH_QUEUE);

        Self {
            provider,
            state,
            jobs,
            transport,
            executor,
            deliverer,
            dispatcher,
            aggregator: Aggregator::new(tx),
            outgoing,
            config,
            continuations: StdMutex::new(HashMap::new()),
            batches: Mutex::new(Some(rx)),
            uptime: Instant::now(),
        }
    }

    #[allow(dead_code)]
    pub fn with_calendar(mut self, calendar: Arc<dyn Calendar>) -> Self {
        self.executor = self.executor.with_calendar(calendar);
        self
    }

    #[allow(dead_code)]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.executor = self.executor.with_mailer(mailer);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn WebFetcher>) -> Self {
        self.executor = self.executor.with_fetcher(fetcher);
        self
    }

    pub fn jobs(&self) -> &Arc<dyn SchedulerStore> {
        &self.jobs
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn uptime(&self) -> Duration {
        self.uptime.elapsed()
    }

    pub(super) fn continuation(&self, conversation_id: &str) -> Option<String> {
        self.continuations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(conversation_id)
            .cloned()
    }

    pub(super) fn set_continuation(&self, conversation_id: &str, handle: &str) {
        self.continuations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(conversation_id.to_string(), handle.to_string());
    }

    /// Run background tasks until Ctrl-C.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            "{} gateway running | instance: {} | provider: {} | transport: {}",
            self.config.zapflow.name,
            self.config.zapflow.instance_id,
            self.provider.name(),
            self.transport.name(),
        );

        let mut handles: Vec<JoinHandle<()>> = vec![self.start_batch_consumer().await?];

        if self.config.scheduler.enabled {
            let poll = Duration::from_secs(self.config.scheduler.poll_interval_secs);
            handles.push(self.dispatcher.clone().spawn(poll));
            info!("scheduler started (every {poll:?})");
        }

        if self.config.api.enabled {
            let api_cfg = self.config.api.clone();
            let gateway = self.clone();
            handles.push(tokio::spawn(async move {
                crate::api::serve(api_cfg, gateway).await;
            }));
        }

        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");

        for handle in &handles {
            handle.abort();
        }
        self.aggregator.shutdown().await;
        info!("gateway stopped");
        Ok(())
    }

    /// Answer flushed batches as they arrive. Can be started once.
    pub async fn start_batch_consumer(self: &Arc<Self>) -> anyhow::Result<JoinHandle<()>> {
        let mut rx = self
            .batches
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("batch consumer already started"))?;
        let gateway = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let worker = gateway.clone();
                tokio::spawn(async move {
                    worker.respond(batch).await;
                });
            }
            debug!("batch queue closed");
        }))
    }

    /// Entry point for transport events.
    ///
    /// Messages from the instance's own number are never answered: echoes of
    /// our own output are dropped, anything else is logged as operator input.
    pub async fn handle_inbound(&self, message: IncomingMessage) {
        let conv = message.conversation_id.as_str();
        if message.from_me {
            if let InboundItem::Text { text } = &message.item {
                if self.outgoing.is_recent(conv, text) {
                    debug!("{conv}: dropped echo of our own message");
                    return;
                }
            }
            let text = item_log_text(&message.item);
            if let Err(e) = self
                .state
                .record_message(conv, "assistant", &text, Some(&json!({ "operator": true })))
                .await
            {
                warn!("failed to record operator message for {conv}: {e}");
            }
            return;
        }

        if let Some(name) = &message.sender_name {
            debug!("{conv}: message from {name}");
        }
        if message.is_group {
            self.enqueue(conv, message.item, true).await;
        } else {
            self.handle_inbound_item(conv, message.item).await;
        }
    }

    /// Queue one inbound item for a conversation. Group ids are recognized by suffix.
    pub async fn handle_inbound_item(&self, conversation_id: &str, item: InboundItem) {
        self.enqueue(conversation_id, item, is_group_id(conversation_id))
            .await;
    }

    async fn enqueue(&self, conversation_id: &str, item: InboundItem, is_group: bool) {
        if let Err(e) = self
            .state
            .record_message(conversation_id, "user", &item_log_text(&item), None)
            .await
        {
            warn!("failed to record inbound message for {conversation_id}: {e}");
        }
        self.aggregator
            .push(
                conversation_id,
                item,
                is_group,
                self.config.aggregator.delay_secs,
            )
            .await;
    }
}

fn item_log_text(item: &InboundItem) -> String {
    match item {
        InboundItem::Text { text } => text.clone(),
        InboundItem::Media(media) => format!("{} {}", media_placeholder(media), media.url),
    }
}
