//! HTTP handlers at the core boundary: the conversation SSE stream and the
//! notify-event ingress used by out-of-process MCP tools.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use steward_stream::{stream_conversation, SessionRef, StreamOptions};

use crate::app::AppState;

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub struct StreamQuery {
    #[serde(default = "default_true")]
    pub include_thinking: bool,
    pub after_uuid: Option<String>,
}

fn default_true() -> bool {
    true
}

/// GET /api/conversations/{id}/stream - push-based SSE, scoped to the
/// conversation. Session handoffs underneath never require a reconnect.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sessions = state.sessions.clone();
    let conversation = conversation_id.clone();
    let resolver: steward_stream::conversation::ActiveSessionFn = Arc::new(move || {
        sessions
            .active_session_for_conversation(&conversation)
            .ok()
            .flatten()
            .map(|session| SessionRef {
                session_id: session.session_id,
                transcript_path: session.transcript_path,
                tmux_pane: session.tmux_pane,
                role: Some(session.role.as_str().to_string()),
                mode: Some(session.mode.as_str().to_string()),
                agent_session_id: session.agent_session_id,
            })
    });

    let events = stream_conversation(
        conversation_id,
        resolver,
        state.tmux.clone(),
        StreamOptions {
            include_thinking: query.include_thinking,
            after_uuid: query.after_uuid,
        },
    );

    let sse_stream = events.map(|event| {
        let name = match serde_json::to_value(&event) {
            Ok(value) => value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("message")
                .to_string(),
            Err(_) => "message".to_string(),
        };
        Ok(Event::default()
            .event(name)
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
pub struct NotifyEventBody {
    pub event_type: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Serialize)]
pub struct NotifyEventResponse {
    pub ok: bool,
}

/// POST /api/sessions/notify-event - out-of-process MCP tools publish into
/// the event bus through this endpoint (they do not share our process).
pub async fn notify_event_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NotifyEventBody>,
) -> Result<Json<NotifyEventResponse>, StatusCode> {
    if body.event_type.is_empty() {
        warn!("notify-event with empty event_type rejected");
        return Err(StatusCode::BAD_REQUEST);
    }

    debug!(event_type = %body.event_type, session_id = ?body.session_id, "external event published");
    state.bus.publish(
        &body.event_type,
        serde_json::json!({
            "session_id": body.session_id,
            "data": body.data,
        }),
    );
    Ok(Json(NotifyEventResponse { ok: true }))
}

#[derive(Serialize)]
pub struct TerminateResponse {
    pub terminated: bool,
}

/// POST /api/workers/{id}/terminate - interrupt a running worker. The row is
/// left as the interrupt found it; only the agent process is stopped.
pub async fn terminate_worker_handler(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
) -> Json<TerminateResponse> {
    let terminated = state.executor.terminate(&worker_id);
    Json(TerminateResponse { terminated })
}
