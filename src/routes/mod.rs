pub mod api;
pub mod relay;
pub mod session;

use std::sync::Arc;

use axum::Router;
use http::{Method, header::CONTENT_TYPE};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::handlers::fallback::unknown_path;
use crate::state::AppState;

/// Build the CORS layer from a comma-separated origin list.
///
/// `*` allows any origin; `None` leaves the server same-origin only.
pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    match origins {
        Some("*") => base.allow_origin(Any),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            base.allow_origin(origins)
        }
        None => {
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            base
        }
    }
}

/// Assemble the full application: API, relay, optional session endpoint,
/// and the catch-all that closes WebSockets on unknown paths.
pub fn create_app(state: Arc<AppState>) -> Router {
    let mut app = api::create_api_router().merge(relay::create_relay_router(&state.config.relay_path));

    if let Some(ref session_path) = state.config.session_path {
        info!("Session endpoint enabled at {}", session_path);
        app = app.merge(session::create_session_router(session_path));
    }

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let cors = cors_layer(state.config.cors_allowed_origins.as_deref());

    app.fallback(unknown_path)
        .with_state(state)
        .layer(cors)
        .layer(security_headers)
}
