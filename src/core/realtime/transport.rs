//! Text-frame WebSocket transport to the upstream realtime engine.
//!
//! Shared by the verbatim relay and the typed OpenAI client. The socket is
//! owned by a single task; callers talk to it through two channels:
//!
//! - `outgoing`: JSON text to send upstream. Dropping every sender closes the
//!   socket with a Close frame.
//! - `incoming`: JSON text received from upstream. The channel ends when the
//!   upstream closes or errors.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use super::base::{RealtimeError, RealtimeResult};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Where and how to reach the upstream engine.
#[derive(Debug, Clone)]
pub struct UpstreamEndpoint {
    /// Base WebSocket URL without query string
    pub url: String,
    pub model: String,
    pub api_key: String,
}

impl UpstreamEndpoint {
    /// Build the WebSocket URL with model parameter.
    pub fn ws_url(&self) -> String {
        format!("{}?model={}", self.url, self.model)
    }
}

/// Live upstream connection.
pub struct UpstreamConnection {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<String>,
}

impl UpstreamConnection {
    pub fn into_parts(self) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        (self.outgoing, self.incoming)
    }
}

/// Open an authenticated WebSocket to the upstream engine.
pub async fn connect_upstream(endpoint: &UpstreamEndpoint) -> RealtimeResult<UpstreamConnection> {
    let url = endpoint.ws_url();

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

    let auth = HeaderValue::from_str(&format!("Bearer {}", endpoint.api_key))
        .map_err(|e| RealtimeError::AuthenticationFailed(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert("Authorization", auth);
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

    tracing::info!("Connected to realtime upstream at {}", endpoint.url);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(WS_CHANNEL_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<String>(WS_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                outgoing = out_rx.recv() => match outgoing {
                    Some(text) => {
                        if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }
                    None => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        tracing::debug!("Upstream sender dropped, closed WebSocket");
                        break;
                    }
                },

                incoming = ws_stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(text.as_str().to_owned()).await.is_err() {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            tracing::error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("WebSocket closed by upstream");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Upstream WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    });

    Ok(UpstreamConnection {
        outgoing: out_tx,
        incoming: in_rx,
    })
}
