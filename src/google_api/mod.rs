//! Google API client over reqwest.
//!
//! Token format is compatible with the `token.json` written by Google's
//! Python OAuth library (`token` or `access_token`, `refresh_token`,
//! `client_id`, `expiry`, ...). The consent flow that produces the file is
//! out of scope; this module only loads, refreshes and persists it.
//!
//! Modules:
//! - calendar: Calendar API v3 `events.insert`
//! - gmail: Gmail API v1 `messages.send`

pub mod calendar;
pub mod gmail;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

// ============================================================================
// Token types
// ============================================================================

/// OAuth2 token payload persisted in `token.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleToken {
    /// The access token (Python writes this as "token")
    #[serde(alias = "access_token")]
    pub token: String,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token expiry time (ISO 8601)
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default, alias = "email")]
    pub account: Option<String>,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Token not found at {0}")]
    TokenNotFound(PathBuf),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

fn retry_decision_for_status(status: reqwest::StatusCode) -> RetryDecision {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            // The caller's deadline is at most 15s; never sleep past it.
            return Duration::from_secs(secs.min(5));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Send a request, retrying 429/408/5xx and connect/timeout errors with
/// exponential backoff.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, GoogleApiError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(GoogleApiError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                let decision = retry_decision_for_status(status);
                if decision == RetryDecision::Retryable && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "google_api retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "google_api retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(GoogleApiError::Http(err));
            }
        }
    }

    Err(GoogleApiError::ApiError {
        status: 0,
        message: "request exhausted retries".to_string(),
    })
}

/// Map a non-success response to an error, consuming the body.
pub(crate) async fn error_for_response(resp: reqwest::Response) -> GoogleApiError {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return GoogleApiError::AuthExpired;
    }
    let body = resp.text().await.unwrap_or_default();
    GoogleApiError::ApiError {
        status: status.as_u16(),
        message: body,
    }
}

// ============================================================================
// Token I/O
// ============================================================================

/// Default token file: `~/.echo-orchestrator/google/token.json`.
pub fn default_token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".echo-orchestrator")
        .join("google")
        .join("token.json")
}

pub fn load_token(path: &Path) -> Result<GoogleToken, GoogleApiError> {
    if !path.exists() {
        return Err(GoogleApiError::TokenNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let token: GoogleToken = serde_json::from_str(&content)?;
    Ok(token)
}

pub fn save_token(path: &Path, token: &GoogleToken) -> Result<(), GoogleApiError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }
    }

    let content = serde_json::to_string_pretty(token)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ============================================================================
// Token refresh
// ============================================================================

/// Check if a token is expired based on its expiry field.
pub fn is_token_expired(token: &GoogleToken) -> bool {
    match &token.expiry {
        None => true, // No expiry = assume expired, try refresh
        Some(expiry_str) => {
            // Python stores expiry as "2026-02-08T12:00:00.000000Z" or similar
            match chrono::DateTime::parse_from_rfc3339(&expiry_str.replace('Z', "+00:00"))
                .or_else(|_| chrono::DateTime::parse_from_rfc3339(expiry_str))
            {
                Ok(expiry) => {
                    // Consider expired if within 60 seconds of expiry
                    let now = chrono::Utc::now();
                    expiry <= now + chrono::Duration::seconds(60)
                }
                Err(_) => true,
            }
        }
    }
}

fn map_refresh_error(status: u16, body: &str) -> GoogleApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return GoogleApiError::AuthExpired;
    }
    GoogleApiError::RefreshFailed(format!("HTTP {}: {}", status, body))
}

/// Owns one token file and hands out valid access tokens.
///
/// Calendar and Gmail clients built from the same config share one
/// `TokenSource`, so concurrent refreshes are serialized by its mutex.
#[derive(Debug)]
pub struct TokenSource {
    path: PathBuf,
    http: reqwest::Client,
    refresh_lock: Mutex<()>,
}

impl TokenSource {
    pub fn new(path: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            path: path.into(),
            http,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token file is present on disk. Does not validate it.
    pub fn is_available(&self) -> bool {
        self.path.exists()
    }

    /// Account the token was issued to, when the file records one.
    pub fn account(&self) -> Option<String> {
        load_token(&self.path)
            .ok()
            .and_then(|t| t.account)
            .filter(|a| !a.trim().is_empty())
    }

    /// Get a valid access token, refreshing and persisting if expired.
    pub async fn access_token(&self) -> Result<String, GoogleApiError> {
        let token = load_token(&self.path)?;
        if !is_token_expired(&token) {
            return Ok(token.token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        let token = load_token(&self.path)?;
        if !is_token_expired(&token) {
            return Ok(token.token);
        }
        let refreshed = self.refresh(&token).await?;
        Ok(refreshed.token)
    }

    async fn refresh(&self, token: &GoogleToken) -> Result<GoogleToken, GoogleApiError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(GoogleApiError::AuthExpired)?;

        let mut form = vec![
            ("client_id", token.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = token.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self.http.post(&token.token_uri).form(&form).send().await?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_refresh_error(status.as_u16(), &body_text));
        }
        let body: serde_json::Value = serde_json::from_str(&body_text)?;

        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| GoogleApiError::RefreshFailed("No access_token in response".into()))?;
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
        let expiry = chrono::Utc::now() + chrono::Duration::seconds(expires_in as i64);

        let mut new_token = token.clone();
        new_token.token = access_token.to_string();
        new_token.expiry = Some(expiry.to_rfc3339());
        save_token(&self.path, &new_token)?;
        log::info!("Refreshed Google access token ({})", self.path.display());

        Ok(new_token)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token(expiry: Option<String>) -> GoogleToken {
        GoogleToken {
            token: "ya29.test-access-token".to_string(),
            refresh_token: Some("1//test-refresh-token".to_string()),
            token_uri: default_token_uri(),
            client_id: "12345.apps.googleusercontent.com".to_string(),
            client_secret: None,
            scopes: vec!["https://www.googleapis.com/auth/calendar".to_string()],
            expiry,
            account: Some("user@example.com".to_string()),
        }
    }

    #[test]
    fn test_google_token_python_compat() {
        let python_json = r#"{
            "token": "ya29.python-token",
            "refresh_token": "1//python-refresh",
            "client_id": "client.apps.googleusercontent.com",
            "client_secret": "secret",
            "scopes": ["https://www.googleapis.com/auth/calendar"],
            "expiry": "2026-02-08T12:00:00.000000Z",
            "account": "user@company.com",
            "universe_domain": "googleapis.com"
        }"#;

        let token: GoogleToken = serde_json::from_str(python_json).unwrap();
        assert_eq!(token.token, "ya29.python-token");
        assert_eq!(token.token_uri, "https://oauth2.googleapis.com/token");
        assert_eq!(token.account.as_deref(), Some("user@company.com"));
    }

    #[test]
    fn test_access_token_alias() {
        let json = r#"{"access_token": "abc", "refresh_token": null, "client_id": "c"}"#;
        let token: GoogleToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.token, "abc");
        assert!(is_token_expired(&token));
    }

    #[test]
    fn test_is_token_expired() {
        let future = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        assert!(!is_token_expired(&sample_token(Some(future))));

        let soon = (chrono::Utc::now() + chrono::Duration::seconds(30)).to_rfc3339();
        assert!(is_token_expired(&sample_token(Some(soon))));

        assert!(is_token_expired(&sample_token(Some("garbage".to_string()))));
    }

    #[test]
    fn test_retry_decision() {
        use reqwest::StatusCode;
        assert_eq!(
            retry_decision_for_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDecision::Retryable
        );
        assert_eq!(
            retry_decision_for_status(StatusCode::BAD_GATEWAY),
            RetryDecision::Retryable
        );
        assert_eq!(
            retry_decision_for_status(StatusCode::BAD_REQUEST),
            RetryDecision::NonRetryable
        );
    }

    #[test]
    fn test_retry_delay_is_bounded() {
        let policy = RetryPolicy::default();
        for attempt in 1..=10 {
            let delay = retry_delay(attempt, &policy, None);
            assert!(delay <= Duration::from_millis(policy.max_backoff_ms + 150));
        }
        let header = reqwest::header::HeaderValue::from_static("120");
        assert_eq!(
            retry_delay(1, &policy, Some(&header)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_map_refresh_error() {
        assert!(matches!(
            map_refresh_error(400, r#"{"error":"invalid_grant"}"#),
            GoogleApiError::AuthExpired
        ));
        assert!(matches!(
            map_refresh_error(500, "boom"),
            GoogleApiError::RefreshFailed(_)
        ));
    }

    #[test]
    fn test_token_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("google").join("token.json");
        assert!(matches!(
            load_token(&path),
            Err(GoogleApiError::TokenNotFound(_))
        ));

        save_token(&path, &sample_token(None)).unwrap();
        let loaded = load_token(&path).unwrap();
        assert_eq!(loaded.client_id, "12345.apps.googleusercontent.com");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_token_source_returns_fresh_token_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let future = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        save_token(&path, &sample_token(Some(future))).unwrap();

        let source = TokenSource::new(&path, reqwest::Client::new());
        assert!(source.is_available());
        assert_eq!(source.account().as_deref(), Some("user@example.com"));
        assert_eq!(source.access_token().await.unwrap(), "ya29.test-access-token");
    }

    #[tokio::test]
    async fn test_token_source_without_refresh_token_is_auth_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let mut token = sample_token(None);
        token.refresh_token = None;
        save_token(&path, &token).unwrap();

        let source = TokenSource::new(&path, reqwest::Client::new());
        assert!(matches!(
            source.access_token().await,
            Err(GoogleApiError::AuthExpired)
        ));
    }
}
