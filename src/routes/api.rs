use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, upload};
use crate::state::AppState;
use std::sync::Arc;

/// Multipart framing allowance on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Create the HTTP API router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health_check))
        .route(
            "/upload-image",
            post(upload::upload_image)
                .layer(DefaultBodyLimit::max(upload::MAX_UPLOAD_SIZE + MULTIPART_OVERHEAD)),
        )
        .layer(TraceLayer::new_for_http())
}
