//! Orchestrator agent.
//!
//! Routing, in order:
//!   1. pending draft + exact confirmation token → draft confirmation
//!   2. classify intent, extract entities
//!   3. schedule_meeting → calendar (or `calendar_disabled`)
//!   4. cancel_meeting / update_meeting → acknowledged, logged, no mutation
//!   5. send_email → new pending draft
//!   6. general → planner tool calls
//!
//! `handle` never fails. Collaborator errors and timeouts become a `failed`
//! timeline record, an [`ErrorKind`] on the result and a readable reply.

pub mod draft;
pub mod planner;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{json, Value};

use crate::connectors::{
    CalendarService, EmailTransport, MessageSink, NewEvent, Planner, SinkAck, TimelineSink,
};
use crate::error::{CalendarError, ErrorKind};
use crate::processor::classifier::classify_intent;
use crate::processor::datetime::default_meeting_start;
use crate::processor::extract::{extract_emails, extract_entities, reconstruct_spoken_emails};
use crate::processor::style::StyleRewriter;
use crate::state::AgentState;
use crate::types::{
    Config, Entities, IncomingMessage, Intent, OutboundReply, Source, TimelineRecord,
    TimelineStatus,
};

use draft::{parse_confirmation, unique_addresses};

pub const AGENT_NAME: &str = "orchestrator";

/// Outcome of one handled message. Serialized as the HTTP response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandleResult {
    pub intent: Intent,
    pub status: TimelineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Reply text sent to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_timeline: Option<SinkAck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_message: Option<SinkAck>,
    /// Per-tool results of a fallback plan.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_results: BTreeMap<String, Value>,
}

impl HandleResult {
    pub fn new(intent: Intent, status: TimelineStatus) -> Self {
        Self {
            intent,
            status,
            error: None,
            details: None,
            message: None,
            data: Value::Null,
            write_timeline: None,
            send_message: None,
            tool_results: BTreeMap::new(),
        }
    }
}

/// Everything the agent talks to. `calendar: None` means scheduling is
/// disabled and answers `calendar_disabled`.
#[derive(Clone)]
pub struct Collaborators {
    pub calendar: Option<Arc<dyn CalendarService>>,
    pub email: Arc<dyn EmailTransport>,
    pub timeline: Arc<dyn TimelineSink>,
    pub messages: Arc<dyn MessageSink>,
    pub planner: Arc<dyn Planner>,
}

pub struct Agent {
    calendar: Option<Arc<dyn CalendarService>>,
    email: Arc<dyn EmailTransport>,
    timeline: Arc<dyn TimelineSink>,
    messages: Arc<dyn MessageSink>,
    planner: Arc<dyn Planner>,
    rewriter: StyleRewriter,
    tz: Tz,
    timeout: Duration,
}

impl Agent {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        Self {
            calendar: collaborators.calendar,
            email: collaborators.email,
            timeline: collaborators.timeline,
            messages: collaborators.messages,
            planner: collaborators.planner,
            rewriter: StyleRewriter::new(config.signature.clone()),
            tz: config.tz(),
            timeout: config.collaborator_timeout(),
        }
    }

    pub fn calendar_enabled(&self) -> bool {
        self.calendar.is_some()
    }

    /// Handle one message against the conversation's state.
    pub async fn handle(
        &self,
        state: AgentState,
        msg: &IncomingMessage,
    ) -> (AgentState, HandleResult) {
        let now = Utc::now().with_timezone(&self.tz);
        self.handle_at(state, msg, now).await
    }

    /// [`Agent::handle`] with an explicit "now" for relative dates.
    pub async fn handle_at(
        &self,
        mut state: AgentState,
        msg: &IncomingMessage,
        now: DateTime<Tz>,
    ) -> (AgentState, HandleResult) {
        let text = match msg.source {
            Source::Voice => reconstruct_spoken_emails(&msg.text),
            _ => msg.text.clone(),
        };
        let user_id = msg.user_id.as_str();

        if state.pending_email.is_some() {
            if let Some(confirmation) = parse_confirmation(&text) {
                log::debug!("{}: draft confirmation {:?}", user_id, confirmation);
                let result = self.confirm_draft(&mut state, user_id, confirmation).await;
                return (state, result);
            }
        }

        let intent = classify_intent(&text);
        let entities = extract_entities(&text, now);
        log::debug!("{}: intent {} ({} emails)", user_id, intent, entities.emails.len());

        let result = match intent {
            Intent::ScheduleMeeting => self.schedule_meeting(&text, user_id, entities, now).await,
            Intent::CancelMeeting | Intent::UpdateMeeting => {
                self.acknowledge_unsupported(intent, &text, user_id, &entities)
                    .await
            }
            Intent::SendEmail => {
                self.create_draft(&mut state, &text, user_id, &entities)
                    .await
            }
            Intent::General => self.run_plan(&mut state, &text, user_id).await,
        };
        (state, result)
    }

    async fn schedule_meeting(
        &self,
        text: &str,
        user_id: &str,
        mut entities: Entities,
        now: DateTime<Tz>,
    ) -> HandleResult {
        let intent = Intent::ScheduleMeeting;
        let Some(calendar) = self.calendar.as_ref() else {
            let kind = ErrorKind::CalendarDisabled;
            let message = format!(
                "Calendar is not configured, so I couldn't schedule that meeting. {}",
                kind.recovery_suggestion()
            );
            let payload = json!({ "text": text, "entities": entities, "error": kind });
            let (timeline, reply) = self
                .send_and_record(user_id, intent.label(), TimelineStatus::Failed, &message, payload)
                .await;
            let mut result = HandleResult::new(intent, TimelineStatus::Failed);
            result.error = Some(kind);
            result.details = Some("calendar not configured".to_string());
            result.message = Some(message);
            result.write_timeline = Some(timeline);
            result.send_message = Some(reply);
            return result;
        };

        let defaulted = entities.datetime.is_none();
        let start = entities
            .datetime
            .unwrap_or_else(|| default_meeting_start(now));
        entities.datetime = Some(start);
        let end = start + chrono::Duration::hours(1);

        let mut attendees = unique_addresses(&entities.emails);
        if attendees.is_empty() {
            attendees = unique_addresses(&extract_emails(text));
        }
        let summary = entities.subject.clone().unwrap_or_else(|| {
            if attendees.is_empty() {
                format!("Meeting with {user_id}")
            } else {
                format!("Meeting with {}", attendees.join(", "))
            }
        });
        let event = NewEvent {
            summary,
            start,
            end,
            attendees,
            location: None,
            description: Some(format!("Created by Echo Orchestrator for {user_id}")),
            timezone: Some(self.tz.name().to_string()),
        };

        let created = match self
            .with_deadline("calendar", calendar.create_event(&event))
            .await
        {
            Some(outcome) => outcome,
            None => Err(CalendarError::Timeout(self.timeout.as_secs())),
        };

        match created {
            Ok(created) => {
                let note = if defaulted {
                    " (defaulted to tomorrow 10:00)"
                } else {
                    ""
                };
                let message = match &created.html_link {
                    Some(link) => format!(
                        "Meeting scheduled on {}{note}. Details: {link}",
                        start.to_rfc3339()
                    ),
                    None => format!("Meeting scheduled on {}{note}", start.to_rfc3339()),
                };
                let payload = json!({ "event": created.raw, "text": text, "entities": entities });
                let (timeline, reply) = self
                    .send_and_record(user_id, intent.label(), TimelineStatus::Done, &message, payload)
                    .await;
                let mut result = HandleResult::new(intent, TimelineStatus::Done);
                result.message = Some(message);
                result.data = json!({ "calendar_event": created, "defaulted_time": defaulted });
                result.write_timeline = Some(timeline);
                result.send_message = Some(reply);
                result
            }
            Err(e) => {
                log::warn!("Calendar create failed for {}: {}", user_id, e);
                let message = format!("Failed to schedule meeting: {e}");
                let payload = json!({ "text": text, "entities": entities, "error": e.to_string() });
                let (timeline, reply) = self
                    .send_and_record(user_id, intent.label(), TimelineStatus::Failed, &message, payload)
                    .await;
                let mut result = HandleResult::new(intent, TimelineStatus::Failed);
                result.error = Some(ErrorKind::CalendarCreateFailed);
                result.details = Some(e.to_string());
                result.message = Some(message);
                result.write_timeline = Some(timeline);
                result.send_message = Some(reply);
                result
            }
        }
    }

    /// Recognized but not implemented. Still logged as `done`.
    async fn acknowledge_unsupported(
        &self,
        intent: Intent,
        text: &str,
        user_id: &str,
        entities: &Entities,
    ) -> HandleResult {
        let what = match intent {
            Intent::CancelMeeting => "Cancelling meetings",
            _ => "Updating meetings",
        };
        let message =
            format!("{what} isn't supported yet. I've logged your request so nothing is lost.");
        let payload = json!({ "text": text, "entities": entities, "note": "not_implemented" });
        let (timeline, reply) = self
            .send_and_record(user_id, intent.label(), TimelineStatus::Done, &message, payload)
            .await;
        let mut result = HandleResult::new(intent, TimelineStatus::Done);
        result.details = Some("not_implemented".to_string());
        result.message = Some(message);
        result.write_timeline = Some(timeline);
        result.send_message = Some(reply);
        result
    }

    /// Timeline first, then the reply. Neither failure stops the other.
    pub(crate) async fn send_and_record(
        &self,
        user_id: &str,
        action_type: &str,
        status: TimelineStatus,
        message: &str,
        payload: Value,
    ) -> (SinkAck, SinkAck) {
        let record = TimelineRecord {
            agent_name: AGENT_NAME.to_string(),
            action_type: action_type.to_string(),
            payload,
            status,
            meta: Some(json!({ "user_id": user_id })),
        };
        let timeline = self.append_timeline(&record).await;

        let reply = OutboundReply {
            recipient: user_id.to_string(),
            message: message.to_string(),
        };
        let sent = self.deliver_reply(&reply).await;
        (timeline, sent)
    }

    async fn append_timeline(&self, record: &TimelineRecord) -> SinkAck {
        self.with_deadline("timeline", self.timeline.append(record))
            .await
            .unwrap_or_else(|| SinkAck::unavailable("timeline_timeout", record))
    }

    async fn deliver_reply(&self, reply: &OutboundReply) -> SinkAck {
        self.with_deadline("message sink", self.messages.deliver(reply))
            .await
            .unwrap_or_else(|| SinkAck::unavailable("msg_proxy_timeout", reply))
    }

    /// Bound a collaborator call. `None` means the deadline passed.
    async fn with_deadline<T>(&self, what: &str, fut: impl Future<Output = T>) -> Option<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("{} call timed out after {:?}", what, self.timeout);
                None
            }
        }
    }
}
