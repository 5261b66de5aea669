//! In-process collaborator fakes shared by the unit tests.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use zapflow_core::{
    error::ZapError,
    message::{ModelReply, ModelRequest, OutboundPayload},
    records::{CalendarEvent, EventDraft, OutgoingMail},
    traits::{Calendar, Mailer, Provider, Transport, WebFetcher},
};

/// Records every payload; can be disconnected, made to fail per kind, or gated.
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<(String, OutboundPayload)>>,
    disconnected: AtomicBool,
    failing_kinds: Mutex<Vec<&'static str>>,
    gate: Option<Arc<Semaphore>>,
    pub entered: Notify,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every `send` waits for a permit on `gate` before completing.
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Default::default()
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    pub fn fail_kind(&self, kind: &'static str) {
        self.failing_kinds.lock().unwrap().push(kind);
    }

    pub fn sent(&self) -> Vec<(String, OutboundPayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(_, p)| match p {
                OutboundPayload::Text { text } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&self, target: &str, payload: &OutboundPayload) -> Result<(), ZapError> {
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ZapError::Transport(e.to_string()))?;
            permit.forget();
        }
        if self
            .failing_kinds
            .lock()
            .unwrap()
            .contains(&payload.kind_label())
        {
            return Err(ZapError::Transport(format!(
                "{} rejected",
                payload.kind_label()
            )));
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), payload.clone()));
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeCalendar {
    pub events: Mutex<Vec<CalendarEvent>>,
    pub attendees: Mutex<Vec<String>>,
    pub failing: bool,
    next_id: AtomicU64,
}

impl FakeCalendar {
    pub fn with_events(events: Vec<CalendarEvent>) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(events),
            ..Default::default()
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Default::default()
        })
    }

    fn check(&self) -> Result<(), ZapError> {
        if self.failing {
            return Err(ZapError::Calendar("backend unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Calendar for FakeCalendar {
    async fn list_events(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, ZapError> {
        self.check()?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.start < to && from < e.end)
            .cloned()
            .collect())
    }

    async fn create_event(&self, draft: &EventDraft) -> Result<CalendarEvent, ZapError> {
        self.check()?;
        let id = format!("new{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let event = CalendarEvent {
            id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            start: draft.start,
            end: draft.end,
        };
        self.events.lock().unwrap().push(event.clone());
        self.attendees.lock().unwrap().push(draft.attendee.clone());
        Ok(event)
    }

    async fn move_event(
        &self,
        id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<CalendarEvent, ZapError> {
        self.check()?;
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ZapError::Calendar(format!("no event {id}")))?;
        event.start = start;
        event.end = end;
        Ok(event.clone())
    }

    async fn cancel_event(&self, id: &str) -> Result<(), ZapError> {
        self.check()?;
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|e| e.id != id);
        if events.len() == before {
            return Err(ZapError::Calendar(format!("no event {id}")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<OutgoingMail>>,
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send_mail(&self, mail: &OutgoingMail) -> Result<(), ZapError> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

pub struct FakeFetcher {
    pub body: String,
}

#[async_trait]
impl WebFetcher for FakeFetcher {
    async fn fetch_text(&self, _url: &str, _max_chars: usize) -> Result<String, ZapError> {
        Ok(self.body.clone())
    }
}

/// Replies from a script, in order; records every request.
#[derive(Default)]
pub struct FakeProvider {
    replies: Mutex<VecDeque<Result<String, String>>>,
    pub requests: Mutex<Vec<ModelRequest>>,
    pub multimodal: bool,
}

impl FakeProvider {
    pub fn scripted(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            ..Default::default()
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
            ..Default::default()
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn supports_multimodal(&self) -> bool {
        self.multimodal
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ZapError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(ModelReply {
                text,
                continuation: Some(format!("turn-{}", self.requests.lock().unwrap().len())),
                provider_used: "fake".into(),
                ..Default::default()
            }),
            Some(Err(e)) => Err(ZapError::Provider(e)),
            None => Ok(ModelReply {
                provider_used: "fake".into(),
                ..Default::default()
            }),
        }
    }

    async fn is_available(&self) -> bool {
        true
    }
}
