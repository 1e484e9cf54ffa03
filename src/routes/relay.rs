//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET {relay_path}` - WebSocket upgrade; every text message is a raw
/// realtime protocol event, relayed verbatim in both directions.
pub fn create_relay_router(relay_path: &str) -> Router<Arc<AppState>> {
    Router::new()
        .route(relay_path, get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
