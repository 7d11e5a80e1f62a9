//! Gmail API v1: sending a drafted email through `messages.send`.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use super::{error_for_response, send_with_retry, GoogleApiError, RetryPolicy, TokenSource};
use crate::connectors::{EmailTransport, OutgoingEmail};
use crate::error::SendError;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Deserialize)]
struct SentMessageRaw {
    #[serde(default)]
    id: String,
}

/// Sends mail as the account that owns the token file.
#[derive(Debug, Clone)]
pub struct GmailTransport {
    tokens: Arc<TokenSource>,
    http: reqwest::Client,
    base_url: String,
    from: Option<String>,
    retry: RetryPolicy,
}

impl GmailTransport {
    pub fn new(tokens: Arc<TokenSource>, http: reqwest::Client, from: Option<String>) -> Self {
        Self::with_base_url(tokens, http, from, GMAIL_API_BASE)
    }

    pub fn with_base_url(
        tokens: Arc<TokenSource>,
        http: reqwest::Client,
        from: Option<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            from,
            // Sends are not idempotent; one attempt only.
            retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        }
    }

    fn sender(&self) -> Option<String> {
        self.from
            .clone()
            .filter(|f| !f.trim().is_empty())
            .or_else(|| self.tokens.account())
    }
}

/// Header values must stay on one line.
fn header_value(value: &str) -> String {
    value.replace(&['\r', '\n'][..], " ").trim().to_string()
}

/// RFC 2047 encoded-word for non-ASCII header text.
fn encode_header(value: &str) -> String {
    let value = header_value(value);
    if value.is_ascii() {
        value
    } else {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value.as_bytes());
        format!("=?UTF-8?B?{}?=", encoded)
    }
}

/// Build the RFC 2822 message Gmail expects in `raw`.
pub fn build_raw_message(email: &OutgoingEmail, from: Option<&str>) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(from) = from {
        lines.push(format!("From: {}", header_value(from)));
    }
    let to: Vec<String> = email.to.iter().map(|a| header_value(a)).collect();
    lines.push(format!("To: {}", to.join(", ")));
    if !email.cc.is_empty() {
        let cc: Vec<String> = email.cc.iter().map(|a| header_value(a)).collect();
        lines.push(format!("Cc: {}", cc.join(", ")));
    }
    lines.push(format!("Subject: {}", encode_header(&email.subject)));
    lines.push(format!("Date: {}", chrono::Utc::now().to_rfc2822()));
    lines.push("MIME-Version: 1.0".to_string());
    lines.push("Content-Type: text/plain; charset=\"UTF-8\"".to_string());
    lines.push("Content-Transfer-Encoding: 8bit".to_string());
    lines.push(String::new());
    lines.push(email.body.replace("\r\n", "\n").replace('\n', "\r\n"));
    lines.join("\r\n")
}

#[async_trait]
impl EmailTransport for GmailTransport {
    fn is_configured(&self) -> bool {
        self.tokens.is_available()
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError> {
        if !self.is_configured() {
            return Err(SendError::NotConfigured);
        }
        if email.to.is_empty() {
            return Err(SendError::NoRecipients);
        }

        let access_token = self.tokens.access_token().await?;
        let raw = build_raw_message(email, self.sender().as_deref());
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw.as_bytes());

        let request = self
            .http
            .post(format!("{}/users/me/messages/send", self.base_url))
            .bearer_auth(&access_token)
            .json(&json!({ "raw": encoded }));
        let resp = send_with_retry(request, &self.retry).await?;
        if !resp.status().is_success() {
            return Err(error_for_response(resp).await.into());
        }

        let sent: SentMessageRaw = resp.json().await.map_err(GoogleApiError::Http)?;
        if sent.id.is_empty() {
            return Err(SendError::Rejected("Gmail returned no message id".to_string()));
        }
        log::info!("Sent email {} to {} recipient(s)", sent.id, email.to.len());
        Ok(sent.id)
    }
}
