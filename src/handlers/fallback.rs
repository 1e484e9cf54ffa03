use axum::{
    extract::ws::{Message, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    http::Uri,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::errors::AppError;

/// Catch-all for unknown paths.
///
/// WebSocket upgrades are accepted and immediately closed without entering
/// any relay logic; plain HTTP requests get a 404.
pub async fn unknown_path(
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => {
            warn!("Invalid pathname: \"{}\", closing connection", uri.path());
            ws.on_upgrade(|mut socket| async move {
                let _ = socket.send(Message::Close(None)).await;
            })
        }
        Err(_) => AppError::NotFound(format!("No route for {}", uri.path())).into_response(),
    }
}
