//! Shared domain types: inbound messages, intents, entities, timeline records
//! and the service configuration.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Channel an inbound message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Slack,
    Telegram,
    Whatsapp,
    Email,
    Voice,
    /// Direct calls to the orchestrator API that name no channel.
    #[default]
    Api,
}

/// A normalized inbound message. Only `text` and `user_id` drive routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub source: Source,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default, alias = "message")]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn default_user_id() -> String {
    "unknown".to_string()
}

impl IncomingMessage {
    pub fn new(source: Source, user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source,
            user_id: user_id.into(),
            text: text.into(),
            attachments: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Coarse action category inferred from message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ScheduleMeeting,
    CancelMeeting,
    UpdateMeeting,
    SendEmail,
    General,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ScheduleMeeting => "schedule_meeting",
            Self::CancelMeeting => "cancel_meeting",
            Self::UpdateMeeting => "update_meeting",
            Self::SendEmail => "send_email",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Structured values pulled out of one message. Absent fields mean "not found".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    /// Email addresses in order of appearance, duplicates kept.
    pub emails: Vec<String>,
    /// Resolved start time, localized to the configured timezone.
    pub datetime: Option<DateTime<FixedOffset>>,
    /// Raw text kept for downstream default-filling when `datetime` is unset.
    pub datetime_text: Option<String>,
    /// Recognized action verbs, first-seen order, deduplicated.
    pub action_verbs: Vec<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// Canonical style names, first-seen order, deduplicated.
    pub styles: Vec<String>,
}

/// Outcome status of a timeline record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineStatus {
    Started,
    Done,
    Failed,
    Pending,
}

/// One append-only entry in the external timeline log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineRecord {
    pub agent_name: String,
    pub action_type: String,
    pub payload: serde_json::Value,
    pub status: TimelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// A reply addressed to one user, handed to the message sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundReply {
    pub recipient: String,
    pub message: String,
}

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_TIMELINE_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_MSG_PROXY_BASE_URL: &str = "http://localhost:8001";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8002";
/// Upper bound on any single collaborator call.
pub const MAX_COLLABORATOR_TIMEOUT_SECS: u64 = 15;

/// Service configuration, read from `config.json` and overridden by env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_timeline_base_url")]
    pub timeline_base_url: String,
    #[serde(default = "default_msg_proxy_base_url")]
    pub msg_proxy_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_token_path: Option<String>,
    #[serde(default = "default_true")]
    pub calendar_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_from: Option<String>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_timeout_secs")]
    pub collaborator_timeout_secs: u64,
    #[serde(default = "default_signature")]
    pub signature: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_timeline_base_url() -> String {
    DEFAULT_TIMELINE_BASE_URL.to_string()
}

fn default_msg_proxy_base_url() -> String {
    DEFAULT_MSG_PROXY_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_timeout_secs() -> u64 {
    MAX_COLLABORATOR_TIMEOUT_SECS
}

fn default_signature() -> String {
    "Echo Agent".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            timeline_base_url: default_timeline_base_url(),
            msg_proxy_base_url: default_msg_proxy_base_url(),
            google_token_path: None,
            calendar_enabled: true,
            email_from: None,
            bind_addr: default_bind_addr(),
            collaborator_timeout_secs: default_timeout_secs(),
            signature: default_signature(),
        }
    }
}

impl Config {
    /// Parsed timezone; unknown names fall back to UTC.
    pub fn tz(&self) -> chrono_tz::Tz {
        match self.timezone.parse::<chrono_tz::Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                log::warn!("Unknown timezone '{}', falling back to UTC", self.timezone);
                chrono_tz::UTC
            }
        }
    }

    /// Per-call collaborator deadline, clamped to 1..=15 seconds.
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(
            self.collaborator_timeout_secs
                .clamp(1, MAX_COLLABORATOR_TIMEOUT_SECS),
        )
    }
}
