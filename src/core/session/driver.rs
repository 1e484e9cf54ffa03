//! Session driver: owns one voice session end to end.
//!
//! Ties the upstream realtime client to a capture source and a playback
//! sink, runs tool calls through the dispatcher, and keeps the event log and
//! conversation store current. Lifecycle is
//! `Init -> Connecting -> Connected -> Disconnected`; a failed connect or a
//! dropped upstream lands in `Disconnected`, from where a new `connect` may
//! start over.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::capture::{AudioCapture, FrameCallback};
use super::conversation_store::ConversationStore;
use super::event_log::{EventLog, RealtimeEvent};
use super::playback::PlaybackSink;
use super::silence_guard::{NoiseSink, SilenceGuard};
use crate::core::audio::TrackSampleOffset;
use crate::core::collaborators::Place;
use crate::core::realtime::{
    FunctionCallRequest, RealtimeError, RealtimeNotification, SessionUpdate, SharedRealtime,
    TurnDetectionMode,
};
use crate::core::tools::{SessionToolState, ToolCall, ToolContext, ToolDispatcher};

/// Greeting sent as the first user turn of every session.
pub const GREETING: &str = "Hello!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Init,
    Connecting,
    Connected,
    Disconnected,
}

/// How user audio reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureMode {
    /// Stream continuously, the engine detects turn ends
    #[default]
    #[serde(rename = "server_vad")]
    VadStreaming,
    /// Stream only while the user holds the talk control
    #[serde(rename = "manual", alias = "none")]
    PushToTalk,
}

impl CaptureMode {
    pub fn turn_detection(self) -> TurnDetectionMode {
        match self {
            CaptureMode::VadStreaming => TurnDetectionMode::ServerVad,
            CaptureMode::PushToTalk => TurnDetectionMode::Disabled,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Operation not available in {0:?} mode")]
    WrongMode(CaptureMode),

    #[error("Session was disconnected while connecting")]
    Cancelled,
}

/// Updates pushed to whoever presents the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    State(SessionState),
    /// Entry `index` of the event log was appended or coalesced
    EventLog {
        index: usize,
        entry: RealtimeEvent,
    },
    Places(Vec<Place>),
    Memory(BTreeMap<String, String>),
    Error(String),
}

struct DriverInner {
    realtime: SharedRealtime,
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn PlaybackSink>,
    dispatcher: ToolDispatcher,
    tools: SessionToolState,
    event_log: EventLog,
    store: ConversationStore,
    guard: SilenceGuard,
    state: RwLock<SessionState>,
    mode: RwLock<CaptureMode>,
    /// Set while connecting or connected
    connect_latch: AtomicBool,
    /// Bumped on every connect/disconnect; tool results from an older
    /// epoch are discarded
    epoch: AtomicU64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Cheaply cloneable handle to one session.
#[derive(Clone)]
pub struct SessionDriver {
    inner: Arc<DriverInner>,
}

impl SessionDriver {
    pub fn new(
        realtime: SharedRealtime,
        capture: Arc<dyn AudioCapture>,
        playback: Arc<dyn PlaybackSink>,
        dispatcher: ToolDispatcher,
        tools: SessionToolState,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let noise_target = realtime.clone();
        let noise_sink: NoiseSink = Arc::new(move |frame| {
            let realtime = noise_target.clone();
            Box::pin(async move {
                if let Err(e) = realtime.append_input_audio(&frame).await {
                    tracing::debug!("Dropping noise frame: {}", e);
                }
            })
        });

        let inner = Arc::new(DriverInner {
            realtime,
            capture,
            playback,
            dispatcher,
            tools,
            event_log: EventLog::new(),
            store: ConversationStore::new(),
            guard: SilenceGuard::new(noise_sink),
            state: RwLock::new(SessionState::Init),
            mode: RwLock::new(CaptureMode::default()),
            connect_latch: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            events,
        });

        let weak = Arc::downgrade(&inner);
        inner.realtime.on_notification(Arc::new(move |notification| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    DriverInner::handle_notification(&inner, notification).await;
                }
            })
        }));

        Self { inner }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn mode(&self) -> CaptureMode {
        *self.inner.mode.read()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.inner.event_log
    }

    pub fn store(&self) -> &ConversationStore {
        &self.inner.store
    }

    pub fn tools(&self) -> &SessionToolState {
        &self.inner.tools
    }

    pub fn silence_guard(&self) -> &SilenceGuard {
        &self.inner.guard
    }

    /// Connect to the engine and greet it.
    ///
    /// A second call while connecting or connected does nothing.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        if inner.connect_latch.swap(true, Ordering::SeqCst) {
            tracing::debug!("connect() ignored, session already active");
            return Ok(());
        }

        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        inner.tools.reset(epoch);
        inner.set_state(SessionState::Connecting);
        inner.event_log.reset();
        inner.store.reset();
        inner.capture.open();
        inner.playback.open();

        let connected = inner.realtime.connect().await;
        if !inner.is_current(epoch) {
            tracing::info!("Disconnected while connecting, dropping upstream");
            // A newer connect owns the client now
            if connected.is_ok()
                && self.state() == SessionState::Disconnected
                && let Err(e) = inner.realtime.disconnect().await
            {
                tracing::warn!("Upstream disconnect failed: {}", e);
            }
            return Err(SessionError::Cancelled);
        }
        if let Err(e) = connected {
            tracing::error!("Failed to connect upstream: {}", e);
            inner.teardown();
            inner.emit(SessionEvent::Error(e.to_string()));
            return Err(e.into());
        }
        inner.set_state(SessionState::Connected);
        tracing::info!("Session connected");

        // The client opens with server VAD; bring it in line with a mode
        // chosen before connecting.
        let mode = self.mode();
        if mode != CaptureMode::VadStreaming
            && let Err(e) = inner
                .realtime
                .update_session(SessionUpdate {
                    turn_detection: Some(mode.turn_detection()),
                    ..Default::default()
                })
                .await
        {
            tracing::warn!("Failed to apply capture mode: {}", e);
        }

        if let Err(e) = inner.realtime.send_user_text(GREETING).await {
            tracing::warn!("Failed to send greeting: {}", e);
        }

        if self.mode() == CaptureMode::VadStreaming && inner.is_current(epoch) {
            DriverInner::start_streaming(inner);
        }
        Ok(())
    }

    /// End the session.
    ///
    /// Returns where playback was cut, if anything was playing. Tool calls
    /// still running finish on their own; their results and any state they
    /// would have written are dropped.
    pub async fn disconnect(&self) -> Option<TrackSampleOffset> {
        let inner = &self.inner;
        let offset = inner.teardown();
        if let Err(e) = inner.realtime.disconnect().await {
            tracing::warn!("Upstream disconnect failed: {}", e);
        }
        tracing::info!("Session disconnected");
        offset
    }

    /// Switch between continuous streaming and push-to-talk.
    pub async fn set_mode(&self, mode: CaptureMode) -> Result<(), SessionError> {
        let inner = &self.inner;
        *inner.mode.write() = mode;

        if mode == CaptureMode::PushToTalk && inner.capture.is_recording() {
            inner.capture.pause();
            inner.guard.reset();
        }

        let connected = self.state() == SessionState::Connected;
        if connected {
            inner
                .realtime
                .update_session(SessionUpdate {
                    turn_detection: Some(mode.turn_detection()),
                    ..Default::default()
                })
                .await?;
        }

        if mode == CaptureMode::VadStreaming && connected && !inner.capture.is_recording() {
            DriverInner::start_streaming(inner);
        }
        tracing::info!(?mode, "Capture mode changed");
        Ok(())
    }

    /// Push-to-talk press: cut off the assistant and start streaming.
    pub async fn start_talking(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        self.ensure_push_to_talk()?;

        if let Some(offset) = inner.playback.interrupt() {
            inner.realtime.cancel_response(Some(offset)).await?;
        }
        DriverInner::start_streaming(inner);
        Ok(())
    }

    /// Push-to-talk release: stop streaming and ask for a response.
    pub async fn stop_talking(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        self.ensure_push_to_talk()?;

        inner.capture.pause();
        inner.guard.reset();
        inner.realtime.create_response().await?;
        Ok(())
    }

    /// Remove an item from the upstream conversation.
    pub async fn delete_item(&self, item_id: &str) -> Result<(), SessionError> {
        if self.state() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.inner.realtime.delete_item(item_id).await?;
        Ok(())
    }

    fn ensure_push_to_talk(&self) -> Result<(), SessionError> {
        if self.state() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        match self.mode() {
            CaptureMode::PushToTalk => Ok(()),
            mode => Err(SessionError::WrongMode(mode)),
        }
    }
}

impl DriverInner {
    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(?previous, ?state, "Session state changed");
            self.emit(SessionEvent::State(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // The presenter may already be gone during shutdown.
        let _ = self.events.send(event);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Stop local audio, forget tool state and move to `Disconnected`.
    fn teardown(&self) -> Option<TrackSampleOffset> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.tools.reset(epoch);
        self.connect_latch.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Disconnected);
        self.guard.reset();
        self.capture.close();
        let offset = self.playback.interrupt();
        self.playback.close();
        offset
    }

    /// Stream captured frames upstream through the silence guard.
    fn start_streaming(inner: &Arc<DriverInner>) {
        inner.guard.reset();
        let weak: Weak<DriverInner> = Arc::downgrade(inner);
        let on_frame: FrameCallback = Arc::new(move |frame| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.guard.observe(&frame);
                if let Err(e) = inner.realtime.append_input_audio(&frame).await {
                    tracing::debug!("Dropping captured frame: {}", e);
                }
            })
        });
        inner.capture.record(on_frame);
    }

    async fn handle_notification(inner: &Arc<DriverInner>, notification: RealtimeNotification) {
        match notification {
            RealtimeNotification::Event {
                source,
                event_type,
                payload,
            } => {
                let (index, entry) = inner.event_log.record(source, &event_type, payload);
                inner.emit(SessionEvent::EventLog { index, entry });
            }
            RealtimeNotification::ConversationUpdated { item_id, delta } => {
                if let Some(audio) = delta.and_then(|d| d.audio) {
                    inner.playback.add_pcm16(&item_id, &audio);
                }
                inner.store.refresh(inner.realtime.conversation_items());
            }
            RealtimeNotification::Interrupted => {
                if let Some(offset) = inner.playback.interrupt()
                    && let Err(e) = inner.realtime.cancel_response(Some(offset)).await
                {
                    tracing::warn!("Failed to cancel interrupted response: {}", e);
                }
            }
            RealtimeNotification::FunctionCall(request) => {
                Self::spawn_tool_call(inner, request);
            }
            RealtimeNotification::Error(message) => {
                tracing::warn!("Upstream error: {}", message);
                inner.emit(SessionEvent::Error(message));
            }
            RealtimeNotification::Closed => {
                tracing::warn!("Upstream connection dropped");
                inner.teardown();
            }
        }
    }

    fn spawn_tool_call(inner: &Arc<DriverInner>, request: FunctionCallRequest) {
        let epoch = inner.epoch.load(Ordering::SeqCst);
        let inner = inner.clone();
        tokio::spawn(async move {
            let call = ToolCall {
                call_id: request.call_id,
                name: request.name,
                arguments: request.arguments,
            };
            let outcome = inner
                .dispatcher
                .dispatch_in(&call, ToolContext { epoch })
                .await;

            if !inner.is_current(epoch) {
                tracing::debug!(call_id = %call.call_id, "Session moved on, discarding tool result");
                return;
            }
            match call.name.as_str() {
                "find_places" => inner.emit(SessionEvent::Places(inner.tools.places.snapshot())),
                "set_memory" => inner.emit(SessionEvent::Memory(inner.tools.memory.snapshot())),
                _ => {}
            }
            if let Err(e) = inner
                .realtime
                .submit_function_result(&call.call_id, &outcome.to_output())
                .await
            {
                tracing::warn!("Failed to submit tool result: {}", e);
            }
        });
    }
}
