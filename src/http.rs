//! HTTP surface for the phone-side relay.
//!
//! The two relay-facing endpoints (`/api/sms/incoming` and the ack) are
//! fire-and-forget: they always answer `200` with an `ok` flag and never
//! surface errors as status codes. The relay has no recovery path, so
//! failures are operator-visible through logs and `/api/health` only.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;

use crate::processor::{MessageProcessor, ProcessOutcome};
use crate::store::{AckStatus, Database};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<MessageProcessor>,
    pub db: Arc<dyn Database>,
    /// Shared secret expected in `X-API-Key` (None disables the check).
    pub api_key: Option<String>,
    /// Max outbox entries returned per poll.
    pub poll_batch_size: usize,
}

/// Build the Axum router with relay, health, and conversation routes.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sms/incoming", post(receive_sms))
        .route("/api/sms/outgoing", get(get_outgoing))
        .route("/api/sms/outgoing/{id}/ack", post(acknowledge))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/{phone}/messages", get(conversation_messages))
        .route("/api/conversations/{phone}", delete(remove_conversation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Wire types ──────────────────────────────────────────────────────

/// Inbound SMS posted by the relay.
///
/// `to`, `timestamp`, and `id` are part of the relay's wire format but
/// unused here: message timestamps are assigned by the store.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct IncomingSms {
    #[serde(rename = "from")]
    from_number: String,
    to: Option<String>,
    content: String,
    timestamp: Option<DateTime<Utc>>,
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct OutboxItem {
    id: Uuid,
    to: String,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct OutgoingResponse {
    messages: Vec<OutboxItem>,
}

/// Delivery outcome reported by the relay. An optional `sent_at` in the
/// body is accepted and ignored; the store records its own time.
#[derive(Debug, Deserialize)]
struct AckRequest {
    status: AckWireStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AckWireStatus {
    Sent,
    Failed,
}

impl From<AckWireStatus> for AckStatus {
    fn from(status: AckWireStatus) -> Self {
        match status {
            AckWireStatus::Sent => AckStatus::Sent,
            AckWireStatus::Failed => AckStatus::Failed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ConversationItem {
    id: Uuid,
    phone_number: String,
    last_message: Option<String>,
    last_message_time: Option<DateTime<Utc>>,
    last_message_role: Option<&'static str>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ConversationsResponse {
    conversations: Vec<ConversationItem>,
    total: i64,
}

#[derive(Debug, Serialize)]
struct MessageItem {
    id: Uuid,
    role: &'static str,
    content: String,
    timestamp: DateTime<Utc>,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct MessagesResponse {
    messages: Vec<MessageItem>,
}

// ── Relay endpoints ─────────────────────────────────────────────────

async fn receive_sms(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IncomingSms>,
) -> Json<OkResponse> {
    if !key_matches(&state, &headers) {
        warn!("Inbound SMS with invalid API key");
        return Json(OkResponse { ok: false });
    }

    let outcome = state
        .processor
        .process_incoming(&req.from_number, &req.content)
        .await;

    // Unauthorized senders get a silent rejection; pipeline failures are
    // still `ok` toward the relay, which has nothing useful to do with them.
    Json(OkResponse {
        ok: !matches!(outcome, ProcessOutcome::Unauthorized),
    })
}

async fn get_outgoing(State(state): State<AppState>) -> Json<OutgoingResponse> {
    let messages = match state
        .processor
        .get_outgoing_messages(state.poll_batch_size)
        .await
    {
        Ok(entries) => entries
            .into_iter()
            .map(|e| OutboxItem {
                id: e.id,
                to: e.phone_number,
                content: e.content,
                created_at: e.created_at,
            })
            .collect(),
        Err(e) => {
            // Degrade to an empty batch; the relay polls again anyway.
            error!(error = %e, "Failed to read pending outbox");
            Vec::new()
        }
    };

    Json(OutgoingResponse { messages })
}

async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AckRequest>,
) -> Json<OkResponse> {
    // Already-resolved and unknown ids are no-ops; the contract toward
    // the relay is ok:true either way.
    if let Err(e) = state.processor.acknowledge_sent(id, req.status.into()).await {
        error!(entry = %id, error = %e, "Failed to acknowledge outbox entry");
    }
    Json(OkResponse { ok: true })
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.pending_outbox_count().await {
        Ok(pending) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "pending_outbox": pending })),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error" })),
            )
        }
    }
}

// ── Conversation endpoints ──────────────────────────────────────────
//
// Read-side convenience for a listing UI, not the relay. These are
// guarded by the shared secret when one is configured and may return
// real status codes.

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    if !key_matches(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let limit = params.limit.unwrap_or(50);
    let offset = params.offset.unwrap_or(0);

    match state.db.list_conversations(limit, offset).await {
        Ok((summaries, total)) => {
            let conversations = summaries
                .into_iter()
                .map(|s| ConversationItem {
                    id: s.id,
                    phone_number: s.phone_number,
                    last_message: s.last_message,
                    last_message_time: s.last_message_time,
                    last_message_role: s.last_message_role.map(|r| r.as_str()),
                    updated_at: s.updated_at,
                })
                .collect();
            Json(ConversationsResponse {
                conversations,
                total,
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to list conversations");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn conversation_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(phone): Path<String>,
) -> impl IntoResponse {
    if !key_matches(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let conversation = match state.db.find_conversation_by_phone(&phone).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to look up conversation");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match state.db.get_all_messages(conversation.id).await {
        Ok(messages) => {
            let messages = messages
                .into_iter()
                .map(|m| MessageItem {
                    id: m.id,
                    role: m.role.as_str(),
                    content: m.content,
                    timestamp: m.timestamp,
                    status: m.status.as_str(),
                })
                .collect();
            Json(MessagesResponse { messages }).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to load conversation messages");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn remove_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(phone): Path<String>,
) -> impl IntoResponse {
    if !key_matches(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.db.delete_conversation(&phone).await {
        Ok(existed) => Json(OkResponse { ok: existed }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to delete conversation");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// True when no shared secret is configured or the request carries it.
fn key_matches(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.api_key {
        None => true,
        Some(expected) => headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|presented| presented == expected),
    }
}
