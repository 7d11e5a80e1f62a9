//! Collaborator interfaces the orchestrator depends on.
//!
//! The agent never talks to a concrete service. It holds trait objects for
//! the calendar, the email transport, the timeline, the reply channel and the
//! fallback planner, chosen once at construction time:
//! - `google_api::{calendar, gmail}` for the real calendar and transport
//! - [`http`] for the timeline and message-proxy services
//! - [`memory`] for in-process doubles that record every call

pub mod http;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CalendarError, SendError};
use crate::types::{OutboundReply, TimelineRecord};

/// Event to create on the user's calendar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEvent {
    pub summary: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub attendees: Vec<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    /// IANA zone name sent alongside the offset timestamps.
    pub timezone: Option<String>,
}

/// What the calendar returned for a created event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub id: String,
    #[serde(rename = "htmlLink", default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    /// Full provider response, kept for the timeline payload.
    #[serde(default)]
    pub raw: Value,
}

/// Message handed to the email transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
}

/// Acknowledgement from a sink that never fails outright.
///
/// Unreachable services degrade to `Unavailable`, carrying the payload that
/// would have been written so nothing is lost from the caller's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SinkAck {
    Unavailable { warning: String, echo: Value },
    Delivered(Value),
}

impl SinkAck {
    pub fn unavailable(warning: impl Into<String>, echo: impl Serialize) -> Self {
        SinkAck::Unavailable {
            warning: warning.into(),
            echo: serde_json::to_value(echo).unwrap_or(Value::Null),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, SinkAck::Delivered(_))
    }
}

/// A tool-call plan: tool name to its parameters.
pub type ToolPlan = BTreeMap<String, Value>;

#[async_trait]
pub trait CalendarService: Send + Sync {
    async fn create_event(&self, event: &NewEvent) -> Result<CreatedEvent, CalendarError>;
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Credentials are present. Checked before a send is attempted.
    fn is_configured(&self) -> bool;

    /// Send and return the transport's message id.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError>;
}

#[async_trait]
pub trait TimelineSink: Send + Sync {
    async fn append(&self, record: &TimelineRecord) -> SinkAck;
}

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, reply: &OutboundReply) -> SinkAck;
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, prompt: &str) -> ToolPlan;
}
