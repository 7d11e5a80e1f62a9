//! Google Calendar API v3: event creation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_for_response, send_with_retry, RetryPolicy, TokenSource};
use crate::connectors::{CalendarService, CreatedEvent, NewEvent};
use crate::error::CalendarError;

pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertedEventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    html_link: Option<String>,
}

/// Creates events on the authenticated user's primary calendar.
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    tokens: Arc<TokenSource>,
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GoogleCalendarClient {
    pub fn new(tokens: Arc<TokenSource>, http: reqwest::Client) -> Self {
        Self::with_base_url(tokens, http, CALENDAR_API_BASE)
    }

    pub fn with_base_url(
        tokens: Arc<TokenSource>,
        http: reqwest::Client,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Request body for `events.insert`. Attendees are deduplicated
/// case-insensitively, first spelling wins.
pub fn event_body(event: &NewEvent) -> Value {
    let mut start = json!({"dateTime": event.start.to_rfc3339()});
    let mut end = json!({"dateTime": event.end.to_rfc3339()});
    if let Some(tz) = &event.timezone {
        start["timeZone"] = json!(tz);
        end["timeZone"] = json!(tz);
    }

    let mut body = json!({
        "summary": event.summary,
        "start": start,
        "end": end,
    });
    if let Some(location) = &event.location {
        body["location"] = json!(location);
    }
    if let Some(description) = &event.description {
        body["description"] = json!(description);
    }

    let mut seen: Vec<String> = Vec::new();
    let attendees: Vec<Value> = event
        .attendees
        .iter()
        .filter(|email| {
            let key = email.to_lowercase();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        })
        .map(|email| json!({"email": email}))
        .collect();
    if !attendees.is_empty() {
        body["attendees"] = Value::Array(attendees);
    }
    body
}

#[async_trait]
impl CalendarService for GoogleCalendarClient {
    async fn create_event(&self, event: &NewEvent) -> Result<CreatedEvent, CalendarError> {
        let access_token = self.tokens.access_token().await?;
        let url = format!("{}/calendars/primary/events", self.base_url);

        let request = self
            .http
            .post(&url)
            .bearer_auth(&access_token)
            .query(&[("sendUpdates", "all")])
            .json(&event_body(event));
        let resp = send_with_retry(request, &self.retry).await?;
        if !resp.status().is_success() {
            return Err(error_for_response(resp).await.into());
        }

        let raw: Value = resp.json().await.map_err(super::GoogleApiError::Http)?;
        let parsed: InsertedEventRaw =
            serde_json::from_value(raw.clone()).map_err(super::GoogleApiError::Json)?;
        if parsed.id.is_empty() {
            return Err(CalendarError::Rejected(
                "response did not include an event id".to_string(),
            ));
        }
        log::info!("Created calendar event {} ({})", parsed.id, event.summary);

        Ok(CreatedEvent {
            id: parsed.id,
            html_link: parsed.html_link,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google_api::{save_token, GoogleToken};
    use axum::extract::Query;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::{FixedOffset, TimeZone};
    use std::collections::HashMap;

    fn new_event(attendees: &[&str]) -> NewEvent {
        let start = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 16, 17, 0, 0)
            .unwrap();
        NewEvent {
            summary: "Meeting with alice@example.com".to_string(),
            start,
            end: start + chrono::Duration::hours(1),
            attendees: attendees.iter().map(|s| s.to_string()).collect(),
            location: None,
            description: Some("Created by Echo for u1".to_string()),
            timezone: Some("Europe/Berlin".to_string()),
        }
    }

    #[test]
    fn test_event_body_shape() {
        let body = event_body(&new_event(&["alice@example.com", "ALICE@example.com", "bob@x.com"]));
        assert_eq!(body["start"]["dateTime"], "2026-10-16T17:00:00+02:00");
        assert_eq!(body["end"]["dateTime"], "2026-10-16T18:00:00+02:00");
        assert_eq!(body["start"]["timeZone"], "Europe/Berlin");
        assert_eq!(
            body["attendees"],
            json!([{"email": "alice@example.com"}, {"email": "bob@x.com"}])
        );
        assert!(body.get("location").is_none());
    }

    #[test]
    fn test_event_body_without_attendees() {
        let body = event_body(&new_event(&[]));
        assert!(body.get("attendees").is_none());
    }

    fn token_source(dir: &tempfile::TempDir) -> Arc<TokenSource> {
        let path = dir.path().join("token.json");
        let token = GoogleToken {
            token: "ya29.valid".to_string(),
            refresh_token: None,
            token_uri: "http://127.0.0.1:1/token".to_string(),
            client_id: "client".to_string(),
            client_secret: None,
            scopes: vec![],
            expiry: Some((chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339()),
            account: None,
        };
        save_token(&path, &token).unwrap();
        Arc::new(TokenSource::new(path, reqwest::Client::new()))
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_create_event_posts_with_send_updates() {
        let router = Router::new().route(
            "/calendars/primary/events",
            post(
                |Query(q): Query<HashMap<String, String>>,
                 headers: HeaderMap,
                 Json(body): Json<Value>| async move {
                    assert_eq!(q.get("sendUpdates").map(String::as_str), Some("all"));
                    assert_eq!(
                        headers.get("authorization").and_then(|v| v.to_str().ok()),
                        Some("Bearer ya29.valid")
                    );
                    Json(json!({
                        "id": "evt123",
                        "htmlLink": "https://calendar.google.com/event?eid=evt123",
                        "summary": body["summary"],
                    }))
                },
            ),
        );
        let base = serve(router).await;
        let dir = tempfile::tempdir().unwrap();
        let client =
            GoogleCalendarClient::with_base_url(token_source(&dir), reqwest::Client::new(), base);

        let created = client
            .create_event(&new_event(&["alice@example.com"]))
            .await
            .unwrap();
        assert_eq!(created.id, "evt123");
        assert_eq!(
            created.html_link.as_deref(),
            Some("https://calendar.google.com/event?eid=evt123")
        );
        assert_eq!(created.raw["summary"], "Meeting with alice@example.com");
    }

    #[tokio::test]
    async fn test_create_event_maps_api_error() {
        let router = Router::new().route(
            "/calendars/primary/events",
            post(|| async { (axum::http::StatusCode::FORBIDDEN, "insufficient scope") }),
        );
        let base = serve(router).await;
        let dir = tempfile::tempdir().unwrap();
        let client =
            GoogleCalendarClient::with_base_url(token_source(&dir), reqwest::Client::new(), base);

        let err = client.create_event(&new_event(&[])).await.unwrap_err();
        assert!(err.to_string().contains("403"), "{err}");
    }

    #[tokio::test]
    async fn test_missing_token_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = Arc::new(TokenSource::new(
            dir.path().join("absent.json"),
            reqwest::Client::new(),
        ));
        let client = GoogleCalendarClient::new(tokens, reqwest::Client::new());
        let err = client.create_event(&new_event(&[])).await.unwrap_err();
        assert!(err.to_string().contains("Token not found"), "{err}");
    }
}
