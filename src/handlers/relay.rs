//! Verbatim relay between a browser WebSocket and the upstream engine.
//!
//! Each accepted connection gets its own upstream session. Messages the
//! client sends before the upstream handshake completes are queued and
//! replayed in arrival order before anything newer is relayed. Upstream
//! events are forwarded untouched. Either side closing ends both.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::select;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::realtime::{UpstreamEndpoint, connect_upstream};
use crate::state::AppState;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Relay WebSocket handler.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let connection_id = uuid::Uuid::new_v4();
    info!(%addr, %connection_id, "Relay WebSocket connection upgrade requested");
    let endpoint = state.upstream_endpoint();
    ws.max_message_size(MAX_WS_MESSAGE_SIZE).on_upgrade(move |socket| {
        handle_relay_socket(socket, endpoint).instrument(info_span!("relay", %connection_id))
    })
}

/// Extract the event type of a client message.
///
/// Returns `None` for anything that is not a JSON object with a string
/// `type`; such messages are never relayed.
pub fn client_event_type(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

/// Accept a client message for relaying, logging and dropping malformed ones.
fn accept_client_text(text: &str) -> Option<String> {
    match client_event_type(text) {
        Some(event_type) => {
            debug!("Relaying \"{}\" to upstream", event_type);
            Some(text.to_string())
        }
        None => {
            warn!("Dropping malformed client message: {} bytes", text.len());
            None
        }
    }
}

/// Run one relay connection to completion.
pub async fn handle_relay_socket(socket: WebSocket, endpoint: UpstreamEndpoint) {
    let (mut client_tx, mut client_rx) = socket.split();

    info!("Connecting to upstream at {}", endpoint.url);
    let connect = connect_upstream(&endpoint);
    tokio::pin!(connect);

    let mut queue: VecDeque<String> = VecDeque::new();

    let upstream = loop {
        select! {
            result = &mut connect => match result {
                Ok(connection) => break connection,
                Err(e) => {
                    error!("Error connecting to upstream: {}", e);
                    let _ = client_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::ERROR,
                            reason: "Upstream connection failed".into(),
                        })))
                        .await;
                    return;
                }
            },
            msg = client_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(text) = accept_client_text(text.as_str()) {
                        queue.push_back(text);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client closed before upstream was ready");
                    return;
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Dropping binary client message: {} bytes", data.len());
                }
                Some(Err(e)) => {
                    warn!("Relay WebSocket error: {}", e);
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    };

    info!("Connected to upstream, replaying {} queued message(s)", queue.len());
    let (upstream_tx, mut upstream_rx) = upstream.into_parts();

    while let Some(text) = queue.pop_front() {
        if upstream_tx.send(text).await.is_err() {
            warn!("Upstream closed while draining queue");
            let _ = client_tx.send(Message::Close(None)).await;
            return;
        }
    }

    loop {
        select! {
            msg = client_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(text) = accept_client_text(text.as_str())
                        && upstream_tx.send(text).await.is_err()
                    {
                        warn!("Upstream closed, ending relay");
                        let _ = client_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Dropping binary client message: {} bytes", data.len());
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Relay client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    warn!("Relay WebSocket error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
            event = upstream_rx.recv() => match event {
                Some(text) => {
                    if let Err(e) = client_tx.send(Message::Text(text.into())).await {
                        warn!("Failed to relay upstream event to client: {}", e);
                        break;
                    }
                }
                None => {
                    info!("Upstream closed, closing client connection");
                    let _ = client_tx.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }

    // Dropping the sender closes the upstream socket.
    drop(upstream_tx);
    info!("Relay connection terminated");
}
