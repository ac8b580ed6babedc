use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use steward_bus::EventBus;
use steward_sessions::SessionManager;
use steward_tmux::TmuxDriver;
use steward_workers::WorkerExecutor;

/// Central shared state - passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub tmux: TmuxDriver,
    pub sessions: Arc<SessionManager>,
    pub executor: Arc<WorkerExecutor>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health_handler))
        .route(
            "/api/conversations/{id}/stream",
            get(crate::http::stream_handler),
        )
        .route(
            "/api/sessions/notify-event",
            post(crate::http::notify_event_handler),
        )
        .route(
            "/api/workers/{id}/terminate",
            post(crate::http::terminate_worker_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
