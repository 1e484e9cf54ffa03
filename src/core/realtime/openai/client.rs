//! OpenAI Realtime API client implementation.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! The client owns the authoritative [`RealtimeConversation`]: every server
//! event is folded into it before the owner is notified, so
//! [`BaseRealtime::conversation_items`] always reflects what the engine sent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::config::{
    DEFAULT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_AUDIO_FORMAT, OPENAI_REALTIME_SAMPLE_RATE,
    OpenAIRealtimeVoice,
};
use super::messages::{
    ClientEvent, InputAudioTranscription, ItemParam, ServerEvent, SessionConfig, ToolDef,
    TurnDetection,
};
use crate::core::audio::TrackSampleOffset;
use crate::core::realtime::base::{
    BaseRealtime, ConnectionState, EventSource, FunctionCallRequest, NotificationCallback,
    RealtimeConfig, RealtimeError, RealtimeNotification, RealtimeResult, SessionUpdate,
};
use crate::core::realtime::conversation::{ConversationItem, RealtimeConversation};
use crate::core::realtime::transport::{UpstreamEndpoint, connect_upstream};

type SharedCallback = Arc<RwLock<Option<NotificationCallback>>>;

/// OpenAI Realtime API client.
///
/// All state sits behind `Arc` so the reader task can share it. Locks are
/// never held across an await point.
pub struct OpenAIRealtime {
    config: RealtimeConfig,
    voice: OpenAIRealtimeVoice,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    /// Set by `disconnect` so the reader does not report `Closed`
    intentional_disconnect: Arc<AtomicBool>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    callback: SharedCallback,
    conversation: Arc<Mutex<RealtimeConversation>>,
    /// Maps call_id -> function name. Populated by OutputItemAdded, consumed
    /// by FunctionCallArgumentsDone which does not carry the name.
    pending_function_calls: Arc<Mutex<HashMap<String, String>>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl OpenAIRealtime {
    pub fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let voice = config
            .voice
            .as_deref()
            .map(OpenAIRealtimeVoice::from_str_or_default)
            .unwrap_or_default();

        Ok(Self {
            config,
            voice,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            callback: Arc::new(RwLock::new(None)),
            conversation: Arc::new(Mutex::new(RealtimeConversation::new())),
            pending_function_calls: Arc::new(Mutex::new(HashMap::new())),
            reader_handle: Mutex::new(None),
        })
    }

    /// Get the configured voice.
    pub fn voice(&self) -> OpenAIRealtimeVoice {
        self.voice
    }

    fn endpoint(&self) -> UpstreamEndpoint {
        UpstreamEndpoint {
            url: self.config.url.clone(),
            model: self.config.model.clone(),
            api_key: self.config.api_key.clone(),
        }
    }

    /// Build the initial session configuration.
    fn build_session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: self.config.instructions.clone(),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_format: Some(OPENAI_REALTIME_AUDIO_FORMAT.to_string()),
            output_audio_format: Some(OPENAI_REALTIME_AUDIO_FORMAT.to_string()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: self
                    .config
                    .input_audio_transcription
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            }),
            turn_detection: Some(TurnDetection::from_mode(self.config.turn_detection)),
            tools: Some(self.config.tools.iter().map(ToolDef::from).collect()),
            tool_choice: Some("auto".to_string()),
        }
    }

    async fn notify(callback: &SharedCallback, notification: RealtimeNotification) {
        let cb = callback.read().clone();
        if let Some(cb) = cb {
            cb(notification).await;
        }
    }

    /// Serialize, report and send a client event.
    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        let sender = self
            .ws_sender
            .lock()
            .clone()
            .ok_or(RealtimeError::NotConnected)?;

        let payload = serde_json::to_value(&event)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        let event_type = payload
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        let text = payload.to_string();

        Self::notify(
            &self.callback,
            RealtimeNotification::Event {
                source: EventSource::Client,
                event_type,
                payload,
            },
        )
        .await;

        sender
            .send(text)
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    /// Handle one text frame from the engine.
    async fn handle_server_text(
        text: String,
        callback: &SharedCallback,
        conversation: &Arc<Mutex<RealtimeConversation>>,
        pending_function_calls: &Arc<Mutex<HashMap<String, String>>>,
    ) {
        let payload: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to parse server event: {} - {}", e, text);
                return;
            }
        };
        let event_type = payload
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        let event = match serde_json::from_value::<ServerEvent>(payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Malformed {} event: {}", event_type, e);
                ServerEvent::Other
            }
        };

        Self::notify(
            callback,
            RealtimeNotification::Event {
                source: EventSource::Server,
                event_type,
                payload,
            },
        )
        .await;

        let change = conversation.lock().apply(&event);

        match &event {
            ServerEvent::SessionCreated { session } => {
                tracing::info!("OpenAI Realtime session created: {}", session.id);
            }
            ServerEvent::Error { error } => {
                tracing::error!(
                    "OpenAI Realtime error: {} - {}",
                    error.error_type,
                    error.message
                );
                Self::notify(
                    callback,
                    RealtimeNotification::Error(format!(
                        "{}: {}",
                        error.error_type, error.message
                    )),
                )
                .await;
            }
            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                tracing::debug!("Speech started at {}ms", audio_start_ms);
                Self::notify(callback, RealtimeNotification::Interrupted).await;
            }
            // Track function calls when output items are added
            ServerEvent::OutputItemAdded { item } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (&item.call_id, &item.name)
                {
                    tracing::debug!("Tracking function call: call_id={}, name={}", call_id, name);
                    pending_function_calls
                        .lock()
                        .insert(call_id.clone(), name.clone());
                }
            }
            _ => {}
        }

        if let Some(change) = change {
            Self::notify(
                callback,
                RealtimeNotification::ConversationUpdated {
                    item_id: change.item_id,
                    delta: change.delta,
                },
            )
            .await;
        }

        if let ServerEvent::FunctionCallArgumentsDone {
            call_id,
            arguments,
            item_id,
        } = event
        {
            let tracked = pending_function_calls.lock().remove(&call_id);
            let name = tracked
                .or_else(|| {
                    conversation
                        .lock()
                        .item(&item_id)
                        .and_then(|i| i.tool.as_ref().map(|t| t.name.clone()))
                })
                .unwrap_or_else(|| {
                    tracing::warn!("Function name not found for call_id: {}", call_id);
                    String::new()
                });

            tracing::debug!(
                "Function call complete: name={}, call_id={}, args={}",
                name,
                call_id,
                arguments
            );

            Self::notify(
                callback,
                RealtimeNotification::FunctionCall(FunctionCallRequest {
                    call_id,
                    name,
                    arguments,
                    item_id: Some(item_id),
                }),
            )
            .await;
        }
    }

    fn ensure_connected(&self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RealtimeError::NotConnected)
        }
    }
}

#[async_trait]
impl BaseRealtime for OpenAIRealtime {
    async fn connect(&self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;

        let connection = match connect_upstream(&self.endpoint()).await {
            Ok(c) => c,
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        let (outgoing, mut incoming) = connection.into_parts();
        *self.ws_sender.lock() = Some(outgoing);

        self.connected.store(true, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connected;

        let callback = self.callback.clone();
        let conversation = self.conversation.clone();
        let pending = self.pending_function_calls.clone();
        let connected = self.connected.clone();
        let state = self.state.clone();
        let ws_sender = self.ws_sender.clone();
        let intentional = self.intentional_disconnect.clone();

        let handle = tokio::spawn(async move {
            while let Some(text) = incoming.recv().await {
                Self::handle_server_text(text, &callback, &conversation, &pending).await;
            }

            connected.store(false, Ordering::SeqCst);
            *state.write() = ConnectionState::Disconnected;
            ws_sender.lock().take();

            if !intentional.load(Ordering::SeqCst) {
                tracing::warn!("Realtime upstream closed unexpectedly");
                Self::notify(&callback, RealtimeNotification::Closed).await;
            }
        });
        *self.reader_handle.lock() = Some(handle);

        self.send_event(ClientEvent::SessionUpdate {
            session: self.build_session_config(),
        })
        .await
    }

    async fn disconnect(&self) -> RealtimeResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);

        // Dropping the sender closes the socket
        self.ws_sender.lock().take();
        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Disconnected;
        self.conversation.lock().clear();
        self.pending_function_calls.lock().clear();

        tracing::info!("Disconnected from OpenAI Realtime API");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn on_notification(&self, callback: NotificationCallback) {
        *self.callback.write() = Some(callback);
    }

    async fn append_input_audio(&self, samples: &[i16]) -> RealtimeResult<()> {
        self.ensure_connected()?;
        if samples.is_empty() {
            return Ok(());
        }
        self.conversation.lock().append_input(samples);
        self.send_event(ClientEvent::audio_append(samples)).await
    }

    async fn send_user_text(&self, text: &str) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ConversationItemCreate {
            item: ItemParam::user_text(text),
        })
        .await?;
        self.create_response().await
    }

    async fn create_response(&self) -> RealtimeResult<()> {
        self.ensure_connected()?;
        let committed = self.conversation.lock().commit_input();
        if committed {
            self.send_event(ClientEvent::InputAudioBufferCommit).await?;
        }
        self.send_event(ClientEvent::ResponseCreate).await
    }

    async fn cancel_response(&self, interrupted: Option<TrackSampleOffset>) -> RealtimeResult<()> {
        self.ensure_connected()?;

        let Some(offset) = interrupted else {
            return self.send_event(ClientEvent::ResponseCancel).await;
        };

        let content_index = {
            let conversation = self.conversation.lock();
            let item = conversation.item(&offset.track_id).ok_or_else(|| {
                RealtimeError::SessionError(format!(
                    "Could not find item \"{}\"",
                    offset.track_id
                ))
            })?;
            if !item.is_assistant_message() {
                return Err(RealtimeError::SessionError(
                    "Can only cancel assistant messages".to_string(),
                ));
            }
            item.audio_content_index().ok_or_else(|| {
                RealtimeError::SessionError("Could not find audio on item to cancel".to_string())
            })?
        };

        self.send_event(ClientEvent::ResponseCancel).await?;
        self.send_event(ClientEvent::ConversationItemTruncate {
            item_id: offset.track_id.clone(),
            content_index: content_index as u32,
            audio_end_ms: offset.played_ms(OPENAI_REALTIME_SAMPLE_RATE) as u64,
        })
        .await
    }

    async fn update_session(&self, update: SessionUpdate) -> RealtimeResult<()> {
        self.ensure_connected()?;
        let session = SessionConfig {
            instructions: update.instructions,
            input_audio_transcription: update
                .input_audio_transcription
                .map(|model| InputAudioTranscription { model }),
            turn_detection: update.turn_detection.map(TurnDetection::from_mode),
            tools: update
                .tools
                .map(|tools| tools.iter().map(ToolDef::from).collect()),
            ..Default::default()
        };
        self.send_event(ClientEvent::SessionUpdate { session }).await
    }

    async fn submit_function_result(&self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ConversationItemCreate {
            item: ItemParam::function_output(call_id, output),
        })
        .await?;
        self.create_response().await
    }

    async fn delete_item(&self, item_id: &str) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ConversationItemDelete {
            item_id: item_id.to_string(),
        })
        .await
    }

    fn conversation_items(&self) -> Vec<ConversationItem> {
        self.conversation.lock().items().to_vec()
    }
}
