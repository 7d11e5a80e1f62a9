//! HTTP clients for the timeline and message-proxy services.
//!
//! Writes never fail: a transport error or non-2xx status is logged and the
//! payload comes back inside [`SinkAck::Unavailable`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{MessageSink, SinkAck, TimelineSink};
use crate::types::{OutboundReply, TimelineRecord};

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("HTTP client builder failed ({}), using defaults", e);
            reqwest::Client::new()
        })
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &impl Serialize,
) -> Result<Value, reqwest::Error> {
    let resp = client.post(url).json(body).send().await?;
    let resp = resp.error_for_status()?;
    // An empty or non-JSON 2xx body still counts as delivered.
    let text = resp.text().await?;
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

/// Client for the timeline service (`/timeline/events`).
#[derive(Debug, Clone)]
pub struct TimelineClient {
    base_url: String,
    client: reqwest::Client,
}

impl TimelineClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: build_client(timeout),
        }
    }

    fn events_url(&self) -> String {
        format!("{}/timeline/events", self.base_url)
    }

    /// Read events back. Unlike `append`, failures propagate.
    pub async fn query(&self, params: &[(String, String)]) -> Result<Value, reqwest::Error> {
        let resp = self
            .client
            .get(self.events_url())
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        resp.json().await
    }
}

#[async_trait]
impl TimelineSink for TimelineClient {
    async fn append(&self, record: &TimelineRecord) -> SinkAck {
        match post_json(&self.client, &self.events_url(), record).await {
            Ok(body) => SinkAck::Delivered(body),
            Err(e) => {
                log::warn!("Timeline service unavailable: {}", e);
                SinkAck::unavailable("timeline_unavailable", record)
            }
        }
    }
}

/// Client for the message proxy (`/messages/send`).
#[derive(Debug, Clone)]
pub struct MsgProxyClient {
    base_url: String,
    client: reqwest::Client,
}

impl MsgProxyClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: build_client(timeout),
        }
    }
}

#[async_trait]
impl MessageSink for MsgProxyClient {
    async fn deliver(&self, reply: &OutboundReply) -> SinkAck {
        let url = format!("{}/messages/send", self.base_url);
        match post_json(&self.client, &url, reply).await {
            Ok(body) => SinkAck::Delivered(body),
            Err(e) => {
                log::warn!("Msg-proxy service unavailable: {}", e);
                SinkAck::unavailable("msg_proxy_unavailable", reply)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimelineStatus;
    use axum::extract::Query;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn record() -> TimelineRecord {
        TimelineRecord {
            agent_name: "orchestrator".to_string(),
            action_type: "schedule_meeting".to_string(),
            payload: json!({"text": "hi"}),
            status: TimelineStatus::Done,
            meta: Some(json!({"user_id": "u1"})),
        }
    }

    #[tokio::test]
    async fn append_posts_record_and_returns_body() {
        let router = Router::new().route(
            "/timeline/events",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"id": 42, "received": body["action_type"]}))
            })
            .get(|Query(q): Query<HashMap<String, String>>| async move {
                Json(json!({"events": [], "user_id": q.get("user_id")}))
            }),
        );
        let base = serve(router).await;
        let client = TimelineClient::new(format!("{base}/"), Duration::from_secs(5));

        let ack = client.append(&record()).await;
        assert_eq!(
            ack,
            SinkAck::Delivered(json!({"id": 42, "received": "schedule_meeting"}))
        );

        let found = client
            .query(&[("user_id".to_string(), "u1".to_string())])
            .await
            .unwrap();
        assert_eq!(found["user_id"], "u1");
    }

    #[tokio::test]
    async fn server_error_degrades_to_echo() {
        let router = Router::new().route(
            "/messages/send",
            post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "down") }),
        );
        let base = serve(router).await;
        let client = MsgProxyClient::new(base, Duration::from_secs(5));
        let reply = OutboundReply {
            recipient: "u1".to_string(),
            message: "hello".to_string(),
        };

        match client.deliver(&reply).await {
            SinkAck::Unavailable { warning, echo } => {
                assert_eq!(warning, "msg_proxy_unavailable");
                assert_eq!(echo, json!({"recipient": "u1", "message": "hello"}));
            }
            other => panic!("expected echo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_timeline_echoes_record() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let client = TimelineClient::new(
            format!("http://127.0.0.1:{port}"),
            Duration::from_secs(2),
        );
        let ack = client.append(&record()).await;
        assert!(!ack.is_delivered());
        assert!(client.query(&[]).await.is_err());
    }

    #[tokio::test]
    async fn plain_text_body_counts_as_delivered() {
        let router = Router::new().route("/messages/send", post(|| async { "ok" }));
        let base = serve(router).await;
        let client = MsgProxyClient::new(base, Duration::from_secs(5));
        let reply = OutboundReply {
            recipient: "u1".to_string(),
            message: "x".to_string(),
        };
        assert_eq!(
            client.deliver(&reply).await,
            SinkAck::Delivered(Value::String("ok".to_string()))
        );
    }
}
