//! Mock upstream realtime engine
//!
//! A local WebSocket server speaking just enough of the realtime protocol
//! for relay tests:
//! - Optional delay before completing the handshake, so clients can race it
//! - `session.created` sent as soon as a connection is accepted
//! - Every text message recorded in arrival order, binary frames counted
//! - Finished connections counted, so tests can see the relay hang up
//! - `mock.echo` sent back verbatim, `mock.close` closes the connection

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

#[derive(Default)]
pub struct MockUpstreamState {
    pub received: Mutex<Vec<String>>,
    pub connections: AtomicUsize,
    /// Connections that have ended, for whatever reason
    pub closed: AtomicUsize,
    pub binary_frames: AtomicUsize,
    /// Request URI and Authorization header of each handshake
    pub handshakes: Mutex<Vec<(String, Option<String>)>>,
}

pub struct MockUpstream {
    pub url: String,
    pub state: Arc<MockUpstreamState>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        Self::start_with_delay(Duration::ZERO).await
    }

    /// Start a server that waits `accept_delay` before each handshake.
    pub async fn start_with_delay(accept_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockUpstreamState::default());

        let server_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = server_state.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(accept_delay).await;
                    let _ = handle_connection(stream, state.clone()).await;
                    state.closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            state,
        }
    }

    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }

    pub fn received_json(&self) -> Vec<Value> {
        self.received()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn binary_frames(&self) -> usize {
        self.state.binary_frames.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` connections have ended.
    pub async fn wait_for_closed(&self, count: usize) {
        for _ in 0..500 {
            if self.closed() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Expected {} closed upstream connections, got {}", count, self.closed());
    }

    /// Wait until at least `count` messages have been received.
    pub async fn wait_for_messages(&self, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let received = self.received();
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "Expected {} upstream messages, got {:?}",
            count,
            self.received()
        );
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockUpstreamState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handshake_state = state.clone();
    let callback = move |request: &Request, response: Response| {
        let auth = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        handshake_state
            .handshakes
            .lock()
            .push((request.uri().to_string(), auth));
        Ok(response)
    };
    let ws_stream = accept_hdr_async(stream, callback).await?;
    let (mut write, mut read) = ws_stream.split();
    state.connections.fetch_add(1, Ordering::SeqCst);

    let created = json!({
        "type": "session.created",
        "event_id": "event_mock_1",
        "session": {"id": "sess_mock", "model": "gpt-4o-realtime-preview"}
    });
    write.send(Message::Text(created.to_string().into())).await?;

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                let text = text.to_string();
                state.received.lock().push(text.clone());

                let event_type = serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|v| v["type"].as_str().map(str::to_string));
                match event_type.as_deref() {
                    Some("mock.echo") => write.send(Message::Text(text.into())).await?,
                    Some("mock.close") => {
                        write.send(Message::Close(None)).await?;
                        break;
                    }
                    _ => {}
                }
            }
            Message::Binary(_) => {
                state.binary_frames.fetch_add(1, Ordering::SeqCst);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
