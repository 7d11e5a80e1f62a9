//! Error types for collaborators and the draft state machine.
//!
//! None of these ever escape `Agent::handle`. They are converted at the call
//! site into an [`ErrorKind`] on the result payload plus a `failed` timeline
//! record, so callers branch on data rather than unwinding.

use std::path::PathBuf;

use thiserror::Error;

use crate::google_api::GoogleApiError;

/// Failure creating a calendar event.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Google Calendar: {0}")]
    Google(#[from] GoogleApiError),

    #[error("calendar call timed out after {0} seconds")]
    Timeout(u64),

    #[error("calendar rejected the event: {0}")]
    Rejected(String),
}

/// Failure handing an email to the transport.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("email transport is not configured")]
    NotConfigured,

    #[error("email has no recipients")]
    NoRecipients,

    #[error("Gmail: {0}")]
    Google(#[from] GoogleApiError),

    #[error("email send timed out after {0} seconds")]
    Timeout(u64),

    #[error("email transport rejected the message: {0}")]
    Rejected(String),
}

/// Draft operations that need a pending draft.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("no pending email draft")]
    NoPendingDraft,
}

/// Config file could not be read or parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Typed error code carried on a handle result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CalendarDisabled,
    CalendarCreateFailed,
    EmailSendFailed,
    NoPendingDraft,
}

impl ErrorKind {
    /// Short hint appended to user-facing failure messages.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ErrorKind::CalendarDisabled => {
                "Connect a Google account (token.json) and enable the calendar in config.json."
            }
            ErrorKind::CalendarCreateFailed => "Check the calendar connection and try again.",
            ErrorKind::EmailSendFailed => "Check the email connection and send a new request.",
            ErrorKind::NoPendingDraft => "Ask me to draft an email first.",
        }
    }
}

impl From<&DraftError> for ErrorKind {
    fn from(err: &DraftError) -> Self {
        match err {
            DraftError::NoPendingDraft => ErrorKind::NoPendingDraft,
        }
    }
}
