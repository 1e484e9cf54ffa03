//! Session WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::session_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the server-driven session router
///
/// # Endpoint
///
/// `GET {session_path}` - WebSocket upgrade; see `handlers::session` for the
/// message protocol.
pub fn create_session_router(session_path: &str) -> Router<Arc<AppState>> {
    Router::new()
        .route(session_path, get(session_handler))
        .layer(TraceLayer::new_for_http())
}
