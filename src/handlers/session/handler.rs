//! Session WebSocket handler
//!
//! Runs a [`SessionDriver`] on the server on behalf of a browser. The browser
//! streams microphone audio as binary frames and sends JSON commands; the
//! server streams back assistant audio, the conversation, the event log and
//! tool side effects.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::audio::{pcm16_from_bytes, pcm16_to_bytes};
use crate::core::realtime::{RealtimeError, create_realtime_client};
use crate::core::session::{
    ChannelCapture, PlaybackEvent, PublishedItem, SessionDriver, SessionError, SessionEvent,
    SessionState, StreamPlayer,
};
use crate::core::tools::{
    CameraFeed, SessionToolState, ToolDispatcher, ToolError, builtin_registry,
};
use crate::state::AppState;

use super::messages::{SessionIncomingMessage, SessionMessageRoute, SessionOutgoingMessage};

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
enum SetupError {
    #[error("Failed to register tools: {0}")]
    Tools(#[from] ToolError),

    #[error("Failed to create realtime client: {0}")]
    Realtime(#[from] RealtimeError),
}

/// Everything one socket owns.
struct SessionContext {
    driver: SessionDriver,
    capture: Arc<ChannelCapture>,
    camera: CameraFeed,
    sampler: JoinHandle<()>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    playback: mpsc::UnboundedReceiver<PlaybackEvent>,
    conversation: watch::Receiver<Vec<PublishedItem>>,
}

fn build_session(app_state: &AppState) -> Result<SessionContext, SetupError> {
    let tools = SessionToolState::default();
    let registry = builtin_registry(&tools, &app_state.tool_services())?;
    let dispatcher = ToolDispatcher::new(registry);
    let realtime =
        create_realtime_client(app_state.realtime_config(dispatcher.function_definitions()))?;

    let capture = Arc::new(ChannelCapture::new());
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();
    let playback = Arc::new(StreamPlayer::new(playback_tx));
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let camera = CameraFeed::new(tools.frames.clone());
    let sampler = camera.spawn_sampler();

    let driver = SessionDriver::new(
        realtime,
        capture.clone(),
        playback,
        dispatcher,
        tools,
        event_tx,
    );
    let conversation = driver.store().subscribe();

    Ok(SessionContext {
        driver,
        capture,
        camera,
        sampler,
        events: event_rx,
        playback: playback_rx,
        conversation,
    })
}

/// Session WebSocket handler
pub async fn session_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let session_id = uuid::Uuid::new_v4();
    info!(%session_id, "Session WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            handle_session_socket(socket, state).instrument(info_span!("session", %session_id))
        })
}

async fn handle_session_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("Session WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<SessionMessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, SessionMessageRoute::Close);

            let result = match route {
                SessionMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                SessionMessageRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                SessionMessageRoute::Close => {
                    info!("Closing session WebSocket connection");
                    sender.send(Message::Close(None)).await
                }
            };

            if let Err(e) = result {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    let mut session = match build_session(&app_state) {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            let _ = message_tx
                .send(SessionMessageRoute::Outgoing(SessionOutgoingMessage::error(
                    "setup_error",
                    e.to_string(),
                )))
                .await;
            let _ = message_tx.send(SessionMessageRoute::Close).await;
            let _ = sender_task.await;
            return;
        }
    };

    send_state(&session.driver, &message_tx).await;

    loop {
        select! {
            msg_result = receiver.next() => match msg_result {
                Some(Ok(msg)) => {
                    if !process_session_message(msg, &session, &message_tx).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("Session WebSocket error: {}", e);
                    break;
                }
                None => {
                    info!("Session WebSocket connection closed by client");
                    break;
                }
            },
            Some(event) = session.events.recv() => {
                let outgoing = match event {
                    SessionEvent::State(_) => {
                        send_state(&session.driver, &message_tx).await;
                        continue;
                    }
                    SessionEvent::EventLog { index, entry } => {
                        SessionOutgoingMessage::EventLog { index, entry }
                    }
                    SessionEvent::Places(places) => SessionOutgoingMessage::Places { places },
                    SessionEvent::Memory(memory) => SessionOutgoingMessage::Memory { memory },
                    SessionEvent::Error(message) => {
                        SessionOutgoingMessage::error("upstream_error", message)
                    }
                };
                let _ = message_tx.send(SessionMessageRoute::Outgoing(outgoing)).await;
            }
            Some(playback) = session.playback.recv() => {
                let route = match playback {
                    PlaybackEvent::Audio { samples, .. } => {
                        SessionMessageRoute::Audio(Bytes::from(pcm16_to_bytes(&samples)))
                    }
                    PlaybackEvent::Interrupted { track_id, offset } => {
                        SessionMessageRoute::Outgoing(SessionOutgoingMessage::Interrupted {
                            track_id,
                            offset,
                        })
                    }
                };
                let _ = message_tx.send(route).await;
            }
            Ok(()) = session.conversation.changed() => {
                let items = session.conversation.borrow_and_update().clone();
                let _ = message_tx
                    .send(SessionMessageRoute::Outgoing(SessionOutgoingMessage::Conversation {
                        items,
                    }))
                    .await;
            }
        }
    }

    // Cleanup
    if matches!(
        session.driver.state(),
        SessionState::Connecting | SessionState::Connected
    ) {
        session.driver.disconnect().await;
    }
    session.sampler.abort();
    sender_task.abort();

    info!("Session WebSocket connection terminated");
}

async fn send_state(driver: &SessionDriver, message_tx: &mpsc::Sender<SessionMessageRoute>) {
    let _ = message_tx
        .send(SessionMessageRoute::Outgoing(SessionOutgoingMessage::State {
            state: driver.state(),
            mode: driver.mode(),
        }))
        .await;
}

async fn send_error(
    message_tx: &mpsc::Sender<SessionMessageRoute>,
    code: &str,
    message: impl Into<String>,
) {
    let _ = message_tx
        .send(SessionMessageRoute::Outgoing(SessionOutgoingMessage::error(
            code, message,
        )))
        .await;
}

/// Process incoming WebSocket message. Returns `false` to end the socket.
async fn process_session_message(
    msg: Message,
    session: &SessionContext,
    message_tx: &mpsc::Sender<SessionMessageRoute>,
) -> bool {
    match msg {
        Message::Text(text) => {
            debug!("Received text message: {} bytes", text.len());

            let incoming: SessionIncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to parse session message: {}", e);
                    send_error(message_tx, "parse_error", format!("Invalid message format: {e}"))
                        .await;
                    return true;
                }
            };

            if let Err(e) = incoming.validate_size() {
                warn!("Message validation failed: {}", e);
                send_error(message_tx, "validation_error", e).await;
                return true;
            }

            handle_session_incoming(incoming, session, message_tx).await;
            true
        }
        Message::Binary(data) => {
            match pcm16_from_bytes(&data) {
                Ok(frame) => {
                    if !session.capture.push(frame).await {
                        debug!("Not recording, dropping {} bytes of audio", data.len());
                    }
                }
                Err(e) => warn!("Dropping audio frame: {}", e),
            }
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("Session WebSocket close received");
            false
        }
    }
}

async fn handle_session_incoming(
    msg: SessionIncomingMessage,
    session: &SessionContext,
    message_tx: &mpsc::Sender<SessionMessageRoute>,
) {
    let driver = &session.driver;
    let result = match msg {
        SessionIncomingMessage::Connect => {
            // Off the socket loop so a disconnect can cut the handshake short
            let driver = driver.clone();
            let message_tx = message_tx.clone();
            tokio::spawn(
                async move {
                    match driver.connect().await {
                        Ok(()) | Err(SessionError::Cancelled) => {}
                        Err(e) => {
                            warn!("Session connect failed: {}", e);
                            send_error(&message_tx, "session_error", e.to_string()).await;
                        }
                    }
                }
                .in_current_span(),
            );
            Ok(())
        }
        SessionIncomingMessage::Disconnect => {
            driver.disconnect().await;
            Ok(())
        }
        SessionIncomingMessage::SetMode { mode } => {
            let result = driver.set_mode(mode).await;
            send_state(driver, message_tx).await;
            result
        }
        SessionIncomingMessage::StartTalking => driver.start_talking().await,
        SessionIncomingMessage::StopTalking => driver.stop_talking().await,
        SessionIncomingMessage::CameraFrame { image } => {
            session.camera.push(image);
            Ok(())
        }
        SessionIncomingMessage::DeleteItem { item_id } => driver.delete_item(&item_id).await,
    };

    if let Err(e) = result {
        warn!("Session command failed: {}", e);
        send_error(message_tx, "session_error", e.to_string()).await;
    }
}
