//! Inbound HTTP surface.
//!
//! Every route that touches a conversation holds that conversation's lock
//! for the whole request, so messages from one user are handled in arrival
//! order. Conversations with nothing pending are released after each request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::draft::preview;
use crate::agent::Agent;
use crate::connectors::http::TimelineClient;
use crate::error::{DraftError, ErrorKind};
use crate::state::ConversationStore;
use crate::types::IncomingMessage;

/// Shared state for the HTTP server.
pub struct ServerState {
    pub agent: Agent,
    pub store: ConversationStore,
    /// Backs `GET /timeline`; unset means the route answers 503.
    pub timeline_reader: Option<TimelineClient>,
}

impl ServerState {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            store: ConversationStore::new(),
            timeline_reader: None,
        }
    }

    pub fn with_timeline_reader(mut self, reader: TimelineClient) -> Self {
        self.timeline_reader = Some(reader);
        self
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/handle-event", post(handle_event))
        .route("/orchestrator", post(handle_event))
        .route("/email/style", post(apply_style))
        .route("/conversations/{user_id}", get(conversation))
        .route("/timeline", get(timeline))
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Orchestrator listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Orchestrator shutting down");
        })
        .await?;
    Ok(())
}

async fn health(AxumState(state): AxumState<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "calendar_enabled": state.agent.calendar_enabled(),
        "conversations": state.store.len(),
    }))
}

/// POST /handle-event (alias /orchestrator)
async fn handle_event(
    AxumState(state): AxumState<Arc<ServerState>>,
    Json(msg): Json<IncomingMessage>,
) -> impl IntoResponse {
    let request_id = uuid::Uuid::new_v4();
    log::info!(
        "[{}] {:?} message from {} ({} chars)",
        request_id,
        msg.source,
        msg.user_id,
        msg.text.len()
    );

    let slot = state.store.slot(&msg.user_id);
    let mut guard = slot.lock().await;
    let current = std::mem::take(&mut *guard);
    let (next, result) = state.agent.handle(current, &msg).await;
    *guard = next;
    drop(guard);
    drop(slot);
    state.store.release(&msg.user_id);

    log::info!(
        "[{}] {} -> {:?}",
        request_id,
        result.intent,
        result.status
    );
    Json(json!({ "result": result }))
}

#[derive(Debug, Deserialize)]
struct StyleRequest {
    style: String,
    user_id: String,
}

/// POST /email/style — restyle the pending draft from its raw body.
async fn apply_style(
    AxumState(state): AxumState<Arc<ServerState>>,
    Json(req): Json<StyleRequest>,
) -> impl IntoResponse {
    let outcome = match state.store.existing(&req.user_id) {
        Some(slot) => {
            let mut guard = slot.lock().await;
            state.agent.apply_email_style(&mut guard, &req.style)
        }
        None => Err(DraftError::NoPendingDraft),
    };
    state.store.release(&req.user_id);

    match outcome {
        Ok(draft) => (
            StatusCode::OK,
            Json(json!({
                "preview": preview(&draft),
                "draft": draft,
            })),
        ),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": ErrorKind::from(&e),
                "message": e.to_string(),
            })),
        ),
    }
}

/// GET /conversations/{user_id}
async fn conversation(
    AxumState(state): AxumState<Arc<ServerState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.store.snapshot(&user_id).await {
        Some(snapshot) => (StatusCode::OK, Json(json!({ "user_id": user_id, "state": snapshot }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown_conversation" })),
        ),
    }
}

/// GET /timeline — forward the query string to the timeline service.
async fn timeline(
    AxumState(state): AxumState<Arc<ServerState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let Some(reader) = &state.timeline_reader else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "timeline_not_configured" })),
        );
    };
    match reader.query(&params).await {
        Ok(events) => (StatusCode::OK, Json(events)),
        Err(e) => {
            log::warn!("Timeline query failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "timeline_unavailable", "message": e.to_string() })),
            )
        }
    }
}
