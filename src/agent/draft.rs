//! Pending email draft: creation, restyling and the yes/no confirmation.
//!
//! States are `NoDraft` (`pending_email == None`) and `PendingConfirmation`.
//! While a draft is pending, the six confirmation tokens are checked before
//! any intent classification; anything else is handled as a new message.

use serde_json::{json, Value};

use super::{Agent, HandleResult};
use crate::connectors::OutgoingEmail;
use crate::error::{DraftError, ErrorKind, SendError};
use crate::processor::compose::sanitize_body;
use crate::processor::style::{Style, StyleRewriter};
use crate::state::{AgentState, PendingEmailDraft};
use crate::types::{Entities, Intent, TimelineStatus};

pub const AFFIRMATIVE_TOKENS: &[&str] = &["yes", "y", "send", "confirm"];
pub const NEGATIVE_TOKENS: &[&str] = &["no", "n", "cancel"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Affirm,
    Decline,
}

/// Exact token match on the trimmed, lowercased text. "yes please" is not a
/// confirmation.
pub fn parse_confirmation(text: &str) -> Option<Confirmation> {
    let token = text.trim().to_lowercase();
    if AFFIRMATIVE_TOKENS.contains(&token.as_str()) {
        Some(Confirmation::Affirm)
    } else if NEGATIVE_TOKENS.contains(&token.as_str()) {
        Some(Confirmation::Decline)
    } else {
        None
    }
}

/// Case-insensitive dedup, first spelling wins.
pub fn unique_addresses(emails: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for email in emails {
        if !out.iter().any(|e| e.eq_ignore_ascii_case(email)) {
            out.push(email.clone());
        }
    }
    out
}

pub fn build_draft(
    to: Vec<String>,
    subject: String,
    raw_body: String,
    styles: &[String],
    rewriter: &StyleRewriter,
) -> PendingEmailDraft {
    let styled_body = rewriter.apply_styles(&raw_body, styles);
    PendingEmailDraft {
        to,
        subject,
        raw_body,
        styled_body,
        applied_styles: styles.to_vec(),
    }
}

/// Draft from one `send_email` message.
pub fn draft_from_message(
    text: &str,
    user_id: &str,
    entities: &Entities,
    rewriter: &StyleRewriter,
) -> PendingEmailDraft {
    let subject = entities
        .subject
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("Message from {user_id}"));
    let candidate = entities.body.as_deref().unwrap_or(text);
    let body = sanitize_body(candidate, &subject);
    build_draft(
        unique_addresses(&entities.emails),
        subject,
        body,
        &entities.styles,
        rewriter,
    )
}

/// Replace the styled body with `raw_body` rewritten in a single style.
pub fn restyle<'a>(
    state: &'a mut AgentState,
    style: &str,
    rewriter: &StyleRewriter,
) -> Result<&'a PendingEmailDraft, DraftError> {
    let draft = state
        .pending_email
        .as_mut()
        .ok_or(DraftError::NoPendingDraft)?;
    draft.styled_body = rewriter.rewrite(&draft.raw_body, style);
    let name = Style::parse(style)
        .map(|s| s.name().to_string())
        .unwrap_or_else(|| style.trim().to_lowercase());
    draft.applied_styles = vec![name];
    Ok(draft)
}

pub fn preview(draft: &PendingEmailDraft) -> String {
    let to = if draft.to.is_empty() {
        "(no recipients)".to_string()
    } else {
        draft.to.join(", ")
    };
    let styles = if draft.applied_styles.is_empty() {
        "(none)".to_string()
    } else {
        draft.applied_styles.join(", ")
    };
    format!(
        "Draft email to {to}\nSubject: {}\nStyles: {styles}\n\n{}\n\nReply \"yes\" to send or \"no\" to cancel.",
        draft.subject, draft.styled_body
    )
}

impl PendingEmailDraft {
    pub fn to_outgoing(&self) -> OutgoingEmail {
        OutgoingEmail {
            to: self.to.clone(),
            subject: self.subject.clone(),
            body: self.styled_body.clone(),
            cc: Vec::new(),
        }
    }
}

fn draft_summary(draft: &PendingEmailDraft) -> Value {
    json!({
        "to": draft.to,
        "subject": draft.subject,
        "styles": draft.applied_styles,
    })
}

impl Agent {
    /// `NoDraft | PendingConfirmation --send_email--> PendingConfirmation`.
    /// An existing draft is replaced without notice.
    pub(super) async fn create_draft(
        &self,
        state: &mut AgentState,
        text: &str,
        user_id: &str,
        entities: &Entities,
    ) -> HandleResult {
        let draft = draft_from_message(text, user_id, entities, &self.rewriter);
        if let Some(previous) = state.pending_email.as_ref() {
            log::debug!(
                "replacing pending draft '{}' for {}",
                previous.subject,
                user_id
            );
        }

        let message = preview(&draft);
        let payload = json!({
            "text": text,
            "draft": draft,
        });
        let (timeline, reply) = self
            .send_and_record(
                user_id,
                Intent::SendEmail.label(),
                TimelineStatus::Pending,
                &message,
                payload,
            )
            .await;

        let mut result = HandleResult::new(Intent::SendEmail, TimelineStatus::Pending);
        result.message = Some(message);
        result.data = json!({ "draft": draft });
        result.write_timeline = Some(timeline);
        result.send_message = Some(reply);
        state.pending_email = Some(draft);
        result
    }

    /// `PendingConfirmation --yes/no--> NoDraft`. The draft is cleared on
    /// every outcome, including a failed send.
    pub(super) async fn confirm_draft(
        &self,
        state: &mut AgentState,
        user_id: &str,
        confirmation: Confirmation,
    ) -> HandleResult {
        let Some(draft) = state.pending_email.take() else {
            let mut result = HandleResult::new(Intent::SendEmail, TimelineStatus::Failed);
            result.error = Some(ErrorKind::NoPendingDraft);
            return result;
        };

        match confirmation {
            Confirmation::Decline => {
                let message = "Okay, I discarded the email draft.";
                let (timeline, reply) = self
                    .send_and_record(
                        user_id,
                        "email_cancelled",
                        TimelineStatus::Done,
                        message,
                        json!({}),
                    )
                    .await;
                let mut result = HandleResult::new(Intent::SendEmail, TimelineStatus::Done);
                result.message = Some(message.to_string());
                result.details = Some("cancelled".to_string());
                result.write_timeline = Some(timeline);
                result.send_message = Some(reply);
                result
            }
            Confirmation::Affirm => self.send_draft(&draft, user_id).await,
        }
    }

    async fn send_draft(&self, draft: &PendingEmailDraft, user_id: &str) -> HandleResult {
        let outcome = if !self.email.is_configured() {
            Err(SendError::NotConfigured)
        } else {
            let email = draft.to_outgoing();
            match self.with_deadline("email transport", self.email.send(&email)).await {
                Some(sent) => sent,
                None => Err(SendError::Timeout(self.timeout.as_secs())),
            }
        };

        let mut payload = draft_summary(draft);
        let (status, message) = match &outcome {
            Ok(message_id) => {
                payload["message_id"] = json!(message_id);
                (
                    TimelineStatus::Done,
                    format!("Email sent to {}.", draft.to.join(", ")),
                )
            }
            Err(e) => {
                log::warn!("Email send failed for {}: {}", user_id, e);
                payload["error"] = json!(e.to_string());
                (
                    TimelineStatus::Failed,
                    format!(
                        "Failed to send email: {e}. {}",
                        ErrorKind::EmailSendFailed.recovery_suggestion()
                    ),
                )
            }
        };

        let (timeline, reply) = self
            .send_and_record(user_id, Intent::SendEmail.label(), status, &message, payload)
            .await;

        let mut result = HandleResult::new(Intent::SendEmail, status);
        result.message = Some(message);
        result.write_timeline = Some(timeline);
        result.send_message = Some(reply);
        match outcome {
            Ok(message_id) => result.data = json!({ "message_id": message_id }),
            Err(e) => {
                result.error = Some(ErrorKind::EmailSendFailed);
                result.details = Some(e.to_string());
            }
        }
        result
    }

    /// Restyle the pending draft from its raw body. Returns the updated draft.
    pub fn apply_email_style(
        &self,
        state: &mut AgentState,
        style: &str,
    ) -> Result<PendingEmailDraft, DraftError> {
        let draft = restyle(state, style, &self.rewriter)?;
        log::info!("Restyled pending draft '{}' as {}", draft.subject, style);
        Ok(draft.clone())
    }
}
