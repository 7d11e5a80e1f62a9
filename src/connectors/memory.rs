//! In-process collaborators. Every call is recorded so tests can assert on
//! exactly what the agent sent where.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use super::{
    CalendarService, CreatedEvent, EmailTransport, MessageSink, NewEvent, OutgoingEmail,
    SinkAck, TimelineSink,
};
use crate::error::{CalendarError, SendError};
use crate::types::{OutboundReply, TimelineRecord};

fn snapshot<T: Clone>(items: &Mutex<Vec<T>>) -> Vec<T> {
    items.lock().clone()
}

fn record<T>(items: &Mutex<Vec<T>>, item: T) {
    items.lock().push(item);
}

// ============================================================================
// Calendar
// ============================================================================

/// Calendar that keeps created events in memory.
#[derive(Debug, Default)]
pub struct MemoryCalendar {
    events: Mutex<Vec<NewEvent>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
    with_links: bool,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self {
            with_links: true,
            ..Self::default()
        }
    }

    /// Events come back without an `htmlLink`.
    pub fn without_links() -> Self {
        Self::default()
    }

    /// Every create fails with `CalendarError::Rejected(reason)`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Sleep before answering, to exercise the caller's deadline.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn events(&self) -> Vec<NewEvent> {
        snapshot(&self.events)
    }
}

#[async_trait]
impl CalendarService for MemoryCalendar {
    async fn create_event(&self, event: &NewEvent) -> Result<CreatedEvent, CalendarError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(CalendarError::Rejected(reason.clone()));
        }

        let id = {
            let mut guard = self.events.lock();
            guard.push(event.clone());
            format!("evt-{}", guard.len())
        };
        let html_link = self
            .with_links
            .then(|| format!("https://calendar.example.com/event/{id}"));
        let raw = json!({
            "id": id,
            "htmlLink": html_link,
            "summary": event.summary,
            "start": {"dateTime": event.start.to_rfc3339()},
            "end": {"dateTime": event.end.to_rfc3339()},
            "attendees": event.attendees.iter().map(|e| json!({"email": e})).collect::<Vec<_>>(),
        });
        Ok(CreatedEvent { id, html_link, raw })
    }
}

// ============================================================================
// Email transport
// ============================================================================

/// Transport that stores sent messages instead of delivering them.
#[derive(Debug)]
pub struct MemoryTransport {
    configured: bool,
    fail_with: Option<String>,
    sent: Mutex<Vec<OutgoingEmail>>,
    counter: AtomicUsize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            configured: true,
            fail_with: None,
            sent: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }

    /// `is_configured()` is false and every send fails with `NotConfigured`.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::new()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        snapshot(&self.sent)
    }
}

#[async_trait]
impl EmailTransport for MemoryTransport {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError> {
        if !self.configured {
            return Err(SendError::NotConfigured);
        }
        if email.to.is_empty() {
            return Err(SendError::NoRecipients);
        }
        if let Some(reason) = &self.fail_with {
            return Err(SendError::Rejected(reason.clone()));
        }
        record(&self.sent, email.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mem-{n}"))
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Timeline that appends to a vector. `unavailable()` echoes instead.
#[derive(Debug, Default)]
pub struct MemoryTimeline {
    records: Mutex<Vec<TimelineRecord>>,
    unavailable: bool,
}

impl MemoryTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<TimelineRecord> {
        snapshot(&self.records)
    }
}

#[async_trait]
impl TimelineSink for MemoryTimeline {
    async fn append(&self, record_in: &TimelineRecord) -> SinkAck {
        if self.unavailable {
            return SinkAck::unavailable("timeline_unavailable", record_in);
        }
        record(&self.records, record_in.clone());
        let id = self.records.lock().len();
        SinkAck::Delivered(json!({"id": id, "status": "stored"}))
    }
}

/// Reply channel that keeps every delivered message.
#[derive(Debug, Default)]
pub struct MemoryMessages {
    delivered: Mutex<Vec<OutboundReply>>,
    unavailable: bool,
}

impl MemoryMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<OutboundReply> {
        snapshot(&self.delivered)
    }

    /// Text of the most recent reply.
    pub fn last_message(&self) -> Option<String> {
        self.delivered().last().map(|r| r.message.clone())
    }
}

#[async_trait]
impl MessageSink for MemoryMessages {
    async fn deliver(&self, reply: &OutboundReply) -> SinkAck {
        if self.unavailable {
            return SinkAck::unavailable("msg_proxy_unavailable", reply);
        }
        record(&self.delivered, reply.clone());
        SinkAck::Delivered(json!({"status": "sent", "recipient": reply.recipient}))
    }
}
