//! Keyword-based intent classification for inbound messages.
//!
//! Case-insensitive substring matching against fixed keyword classes.
//! Classification priority (first matching class wins, wherever the keyword
//! sits in the text):
//!   1. send_email
//!   2. cancel_meeting
//!   3. update_meeting
//!   4. schedule_meeting
//!   5. general (nothing matched)

use crate::types::Intent;

pub const SEND_EMAIL_KEYWORDS: &[&str] = &[
    "send email",
    "send an email",
    "send mail",
    "send a mail",
    "draft email",
    "draft an email",
    "compose email",
    "compose an email",
    "write email",
    "write an email",
    "email to",
    "mail to",
];

pub const CANCEL_MEETING_KEYWORDS: &[&str] =
    &["cancel", "call off", "delete meeting", "delete the meeting"];

pub const UPDATE_MEETING_KEYWORDS: &[&str] = &[
    "reschedule",
    "update meeting",
    "update the meeting",
    "move meeting",
    "move the meeting",
    "postpone",
    "change meeting",
    "change the meeting",
];

pub const SCHEDULE_MEETING_KEYWORDS: &[&str] =
    &["schedule", "meeting", "calendar", "book", "invite"];

/// Keyword classes in precedence order.
const PRECEDENCE: &[(Intent, &[&str])] = &[
    (Intent::SendEmail, SEND_EMAIL_KEYWORDS),
    (Intent::CancelMeeting, CANCEL_MEETING_KEYWORDS),
    (Intent::UpdateMeeting, UPDATE_MEETING_KEYWORDS),
    (Intent::ScheduleMeeting, SCHEDULE_MEETING_KEYWORDS),
];

/// Classify free text into an [`Intent`]. Total: unmatched text is `General`.
pub fn classify_intent(text: &str) -> Intent {
    let lower = text.to_lowercase();
    PRECEDENCE
        .iter()
        .find(|(_, keywords)| contains_any(&lower, keywords))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::General)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
