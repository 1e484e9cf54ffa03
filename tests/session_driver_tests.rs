//! Session Driver Tests
//!
//! Drives a `SessionDriver` against a recording mock of the realtime client.
//! Notifications are injected through the callback the driver registers, so
//! every upstream event can be simulated without a network.

mod fixtures;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

use fixtures::audio_fixtures::{FRAME_20MS, generate_a440_tone, generate_silence};
use visio_gateway::core::audio::TrackSampleOffset;
use visio_gateway::core::realtime::{
    BaseRealtime, ConnectionState, ConversationItem, EventSource, FunctionCallRequest, ItemDelta,
    ItemKind, ItemStatus, NotificationCallback, RealtimeError, RealtimeNotification,
    RealtimeResult, Role, SessionUpdate, TurnDetectionMode,
};
use visio_gateway::core::session::{
    AudioCapture, CaptureMode, ChannelCapture, GREETING, NOISE_FRAME_SAMPLES, PlaybackEvent,
    SILENCE_TIMEOUT, SessionDriver, SessionError, SessionEvent, SessionState, StreamPlayer,
};
use visio_gateway::core::tools::{
    SessionToolState, SetMemoryTool, ToolContext, ToolDefinition, ToolDispatcher, ToolError,
    ToolHandler, ToolRegistry,
};

// =============================================================================
// Mock realtime client
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Connect,
    Disconnect,
    AppendAudio(usize),
    UserText(String),
    CreateResponse,
    Cancel(Option<TrackSampleOffset>),
    UpdateSession(Option<TurnDetectionMode>),
    SubmitResult { call_id: String, output: String },
    DeleteItem(String),
}

#[derive(Default)]
struct MockRealtime {
    calls: Mutex<Vec<Call>>,
    callback: Mutex<Option<NotificationCallback>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    /// When set, `connect` waits for it before completing
    connect_gate: Mutex<Option<Arc<Notify>>>,
    items: Mutex<Vec<ConversationItem>>,
}

impl MockRealtime {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn audio_appends(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AppendAudio(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    fn submitted(&self) -> Vec<(String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SubmitResult { call_id, output } => {
                    Some((call_id, serde_json::from_str(&output).unwrap()))
                }
                _ => None,
            })
            .collect()
    }

    /// Deliver a notification the way the real client would.
    async fn notify(&self, notification: RealtimeNotification) {
        let callback = self
            .callback
            .lock()
            .clone()
            .expect("driver did not register a callback");
        callback(notification).await;
    }

    /// Wait for a spawned tool task to submit its result.
    async fn wait_for_submit(&self) -> (String, Value) {
        for _ in 0..200 {
            if let Some(first) = self.submitted().into_iter().next() {
                return first;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no tool result submitted: {:?}", self.calls());
    }
}

#[async_trait]
impl BaseRealtime for MockRealtime {
    async fn connect(&self) -> RealtimeResult<()> {
        self.record(Call::Connect);
        let gate = self.connect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(RealtimeError::ConnectionFailed("refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> RealtimeResult<()> {
        self.record(Call::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_ready() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn on_notification(&self, callback: NotificationCallback) {
        *self.callback.lock() = Some(callback);
    }

    async fn append_input_audio(&self, samples: &[i16]) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.record(Call::AppendAudio(samples.len()));
        Ok(())
    }

    async fn send_user_text(&self, text: &str) -> RealtimeResult<()> {
        self.record(Call::UserText(text.to_string()));
        Ok(())
    }

    async fn create_response(&self) -> RealtimeResult<()> {
        self.record(Call::CreateResponse);
        Ok(())
    }

    async fn cancel_response(&self, interrupted: Option<TrackSampleOffset>) -> RealtimeResult<()> {
        self.record(Call::Cancel(interrupted));
        Ok(())
    }

    async fn update_session(&self, update: SessionUpdate) -> RealtimeResult<()> {
        self.record(Call::UpdateSession(update.turn_detection));
        Ok(())
    }

    async fn submit_function_result(&self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.record(Call::SubmitResult {
            call_id: call_id.to_string(),
            output: output.to_string(),
        });
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> RealtimeResult<()> {
        self.record(Call::DeleteItem(item_id.to_string()));
        Ok(())
    }

    fn conversation_items(&self) -> Vec<ConversationItem> {
        self.items.lock().clone()
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Tool that blocks until released, for racing disconnects. Given a
/// key and value it then behaves like `set_memory`.
struct GatedTool {
    gate: Arc<Notify>,
    memory: SetMemoryTool,
}

#[async_trait]
impl ToolHandler for GatedTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("gated", "Waits for the test", json!({"type": "object"}))
    }

    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        self.gate.notified().await;
        if args.get("key").is_some() {
            return self.memory.call(args, ctx).await;
        }
        Ok(json!({"done": true}))
    }
}

struct Harness {
    mock: Arc<MockRealtime>,
    driver: SessionDriver,
    capture: Arc<ChannelCapture>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    playback: mpsc::UnboundedReceiver<PlaybackEvent>,
    gate: Arc<Notify>,
}

impl Harness {
    fn new() -> Self {
        let mock = Arc::new(MockRealtime::default());
        let capture = Arc::new(ChannelCapture::new());
        let (playback_tx, playback) = mpsc::unbounded_channel();
        let player = Arc::new(StreamPlayer::new(playback_tx));
        let (events_tx, events) = mpsc::unbounded_channel();

        let tools = SessionToolState::default();
        let gate = Arc::new(Notify::new());
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(SetMemoryTool::new(tools.memory.clone())))
            .unwrap();
        registry
            .register(Arc::new(GatedTool {
                gate: gate.clone(),
                memory: SetMemoryTool::new(tools.memory.clone()),
            }))
            .unwrap();

        let driver = SessionDriver::new(
            mock.clone(),
            capture.clone(),
            player,
            ToolDispatcher::new(registry),
            tools,
            events_tx,
        );

        Self {
            mock,
            driver,
            capture,
            events,
            playback,
            gate,
        }
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn states(&mut self) -> Vec<SessionState> {
        self.drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::State(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    async fn function_call(&self, call_id: &str, name: &str, arguments: &str) {
        self.mock
            .notify(RealtimeNotification::FunctionCall(FunctionCallRequest {
                call_id: call_id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
                item_id: Some(format!("item_{call_id}")),
            }))
            .await;
    }
}

fn assistant_item(id: &str, status: ItemStatus, audio: Vec<i16>) -> ConversationItem {
    ConversationItem {
        id: id.to_string(),
        kind: ItemKind::Message,
        role: Some(Role::Assistant),
        status,
        text: String::new(),
        transcript: "Hi there".to_string(),
        audio,
        tool: None,
        output: None,
        content_types: vec!["audio".to_string()],
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_connect_greets_and_streams() {
    let mut h = Harness::new();
    assert_eq!(h.driver.state(), SessionState::Init);

    h.driver.connect().await.unwrap();

    assert_eq!(h.driver.state(), SessionState::Connected);
    assert_eq!(
        h.mock.calls(),
        vec![Call::Connect, Call::UserText(GREETING.to_string())]
    );
    assert!(h.capture.is_recording());
    assert_eq!(
        h.states(),
        vec![SessionState::Connecting, SessionState::Connected]
    );
}

#[tokio::test]
async fn test_second_connect_is_ignored() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();
    h.driver.connect().await.unwrap();

    let connects = h
        .mock
        .calls()
        .iter()
        .filter(|c| **c == Call::Connect)
        .count();
    assert_eq!(connects, 1);
}

#[tokio::test]
async fn test_connect_failure_lands_in_disconnected() {
    let mut h = Harness::new();
    h.mock.fail_connect.store(true, Ordering::SeqCst);

    let result = h.driver.connect().await;
    assert!(matches!(result, Err(SessionError::Realtime(_))));
    assert_eq!(h.driver.state(), SessionState::Disconnected);
    assert!(!h.capture.is_open());

    let events = h.drain_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SessionEvent::Error(m) if m.contains("refused")))
    );

    // A later attempt starts over
    h.mock.fail_connect.store(false, Ordering::SeqCst);
    h.driver.connect().await.unwrap();
    assert_eq!(h.driver.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_disconnect_clears_session_memory() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();
    h.driver.tools().memory.set("user_name", "Ada");
    h.driver.tools().frames.store("data:image/jpeg;base64,AAAA");

    h.driver.disconnect().await;

    assert_eq!(h.driver.state(), SessionState::Disconnected);
    assert!(h.driver.tools().memory.snapshot().is_empty());
    assert!(h.driver.tools().frames.latest().is_none());
    assert!(!h.capture.is_open());
    assert_eq!(h.mock.calls().last(), Some(&Call::Disconnect));
}

#[tokio::test]
async fn test_disconnect_while_connecting_wins() {
    let mut h = Harness::new();
    let gate = Arc::new(Notify::new());
    *h.mock.connect_gate.lock() = Some(gate.clone());

    let driver = h.driver.clone();
    let connecting = tokio::spawn(async move { driver.connect().await });
    for _ in 0..200 {
        if h.mock.calls().contains(&Call::Connect) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.driver.state(), SessionState::Connecting);

    h.driver.disconnect().await;
    gate.notify_one();
    let result = connecting.await.unwrap();

    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(h.driver.state(), SessionState::Disconnected);
    assert!(!h.capture.is_open());
    assert!(!h.capture.is_recording());
    assert!(!h.mock.is_ready());
    // The late upstream is hung up and never greeted
    assert_eq!(
        h.mock.calls(),
        vec![Call::Connect, Call::Disconnect, Call::Disconnect]
    );
    assert_eq!(
        h.states(),
        vec![SessionState::Connecting, SessionState::Disconnected]
    );
}

#[tokio::test]
async fn test_upstream_close_forgets_tool_state() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();
    h.driver.tools().memory.set("user_name", "Ada");
    h.driver.tools().frames.store("data:image/jpeg;base64,AAAA");

    h.mock.notify(RealtimeNotification::Closed).await;

    assert!(h.driver.tools().memory.snapshot().is_empty());
    assert!(h.driver.tools().frames.latest().is_none());

    h.driver.connect().await.unwrap();
    assert_eq!(h.driver.state(), SessionState::Connected);
    assert!(h.driver.tools().memory.snapshot().is_empty());
}

#[tokio::test]
async fn test_upstream_closed_disconnects() {
    let mut h = Harness::new();
    h.driver.connect().await.unwrap();
    h.drain_events();

    h.mock.notify(RealtimeNotification::Closed).await;

    assert_eq!(h.driver.state(), SessionState::Disconnected);
    assert!(!h.capture.is_recording());
    assert_eq!(h.states(), vec![SessionState::Disconnected]);
}

#[tokio::test]
async fn test_engine_error_is_reported_without_disconnect() {
    let mut h = Harness::new();
    h.driver.connect().await.unwrap();
    h.drain_events();

    h.mock
        .notify(RealtimeNotification::Error("bad item".to_string()))
        .await;

    assert_eq!(h.driver.state(), SessionState::Connected);
    let events = h.drain_events();
    assert!(matches!(&events[..], [SessionEvent::Error(m)] if m == "bad item"));
}

// =============================================================================
// Event log and conversation
// =============================================================================

#[tokio::test]
async fn test_events_are_logged_and_coalesced() {
    let mut h = Harness::new();
    h.driver.connect().await.unwrap();
    h.drain_events();

    for _ in 0..2 {
        h.mock
            .notify(RealtimeNotification::Event {
                source: EventSource::Client,
                event_type: "input_audio_buffer.append".to_string(),
                payload: json!({"type": "input_audio_buffer.append"}),
            })
            .await;
    }
    h.mock
        .notify(RealtimeNotification::Event {
            source: EventSource::Server,
            event_type: "response.created".to_string(),
            payload: json!({"type": "response.created"}),
        })
        .await;

    let log = h.driver.event_log().entries();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].count, 2);
    assert_eq!(log[1].event_type, "response.created");

    let updates: Vec<(usize, u32)> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::EventLog { index, entry } => Some((index, entry.count)),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![(0, 1), (0, 2), (1, 1)]);
}

#[tokio::test]
async fn test_audio_delta_plays_and_refreshes_store() {
    let mut h = Harness::new();
    h.driver.connect().await.unwrap();

    let tone = generate_a440_tone(FRAME_20MS);
    *h.mock.items.lock() = vec![assistant_item("item_a", ItemStatus::Completed, tone.clone())];

    h.mock
        .notify(RealtimeNotification::ConversationUpdated {
            item_id: "item_a".to_string(),
            delta: Some(ItemDelta {
                audio: Some(tone.clone()),
                ..Default::default()
            }),
        })
        .await;

    match h.playback.try_recv() {
        Ok(PlaybackEvent::Audio { track_id, samples }) => {
            assert_eq!(track_id, "item_a");
            assert_eq!(samples, tone);
        }
        other => panic!("expected audio, got {:?}", other),
    }

    let published = h.driver.store().snapshot();
    assert_eq!(published.len(), 1);
    assert!(published[0].has_audio);
    assert!(h.driver.store().wav("item_a").is_some());
}

#[tokio::test]
async fn test_delete_item_requires_connection() {
    let h = Harness::new();
    assert!(matches!(
        h.driver.delete_item("item_1").await,
        Err(SessionError::NotConnected)
    ));

    h.driver.connect().await.unwrap();
    h.driver.delete_item("item_1").await.unwrap();
    assert_eq!(
        h.mock.calls().last(),
        Some(&Call::DeleteItem("item_1".to_string()))
    );
}

// =============================================================================
// Interruption and modes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_interruption_truncates_to_heard_audio() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();

    // one second of assistant audio
    h.mock
        .notify(RealtimeNotification::ConversationUpdated {
            item_id: "item_a".to_string(),
            delta: Some(ItemDelta {
                audio: Some(vec![0; 24_000]),
                ..Default::default()
            }),
        })
        .await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    h.mock.notify(RealtimeNotification::Interrupted).await;

    assert_eq!(
        h.mock.calls().last(),
        Some(&Call::Cancel(Some(TrackSampleOffset {
            track_id: "item_a".to_string(),
            offset: 12_000,
        })))
    );
}

#[tokio::test]
async fn test_interruption_with_nothing_playing_sends_nothing() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();
    let before = h.mock.calls().len();

    h.mock.notify(RealtimeNotification::Interrupted).await;

    assert_eq!(h.mock.calls().len(), before);
}

#[tokio::test]
async fn test_push_to_talk_cycle() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();
    assert!(h.capture.is_recording());

    h.driver.set_mode(CaptureMode::PushToTalk).await.unwrap();
    assert!(!h.capture.is_recording());
    assert_eq!(
        h.mock.calls().last(),
        Some(&Call::UpdateSession(Some(TurnDetectionMode::Disabled)))
    );

    h.driver.start_talking().await.unwrap();
    assert!(h.capture.is_recording());
    assert!(h.capture.push(generate_a440_tone(FRAME_20MS)).await);
    assert_eq!(h.mock.audio_appends(), vec![FRAME_20MS]);

    h.driver.stop_talking().await.unwrap();
    assert!(!h.capture.is_recording());
    assert_eq!(h.mock.calls().last(), Some(&Call::CreateResponse));
    assert!(!h.capture.push(generate_a440_tone(FRAME_20MS)).await);

    h.driver.set_mode(CaptureMode::VadStreaming).await.unwrap();
    assert!(h.capture.is_recording());
    assert_eq!(
        h.mock.calls().last(),
        Some(&Call::UpdateSession(Some(TurnDetectionMode::ServerVad)))
    );
}

#[tokio::test]
async fn test_talk_controls_need_push_to_talk() {
    let h = Harness::new();
    assert!(matches!(
        h.driver.start_talking().await,
        Err(SessionError::NotConnected)
    ));

    h.driver.connect().await.unwrap();
    assert!(matches!(
        h.driver.start_talking().await,
        Err(SessionError::WrongMode(CaptureMode::VadStreaming))
    ));
    assert!(matches!(
        h.driver.stop_talking().await,
        Err(SessionError::WrongMode(CaptureMode::VadStreaming))
    ));
}

#[tokio::test]
async fn test_mode_before_connect_applies_on_connect() {
    let h = Harness::new();
    h.driver.set_mode(CaptureMode::PushToTalk).await.unwrap();
    assert!(h.mock.calls().is_empty());

    h.driver.connect().await.unwrap();
    assert!(!h.capture.is_recording());
    assert_eq!(
        h.mock.calls(),
        vec![
            Call::Connect,
            Call::UpdateSession(Some(TurnDetectionMode::Disabled)),
            Call::UserText(GREETING.to_string()),
        ]
    );
}

// =============================================================================
// Tool calls
// =============================================================================

#[tokio::test]
async fn test_set_memory_tool_round_trip() {
    let mut h = Harness::new();
    h.driver.connect().await.unwrap();
    h.drain_events();

    h.function_call("call_1", "set_memory", r#"{"key":"user_name","value":"Ada"}"#)
        .await;

    let (call_id, output) = h.mock.wait_for_submit().await;
    assert_eq!(call_id, "call_1");
    assert_eq!(output, json!({"ok": true}));

    let memory = h.drain_events().into_iter().find_map(|e| match e {
        SessionEvent::Memory(m) => Some(m),
        _ => None,
    });
    assert_eq!(
        memory.unwrap().get("user_name").map(String::as_str),
        Some("Ada")
    );
}

#[tokio::test]
async fn test_unknown_tool_reports_error_to_model() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();

    h.function_call("call_2", "teleport", "{}").await;

    let (call_id, output) = h.mock.wait_for_submit().await;
    assert_eq!(call_id, "call_2");
    assert_eq!(output, json!({"error": "Tool \"teleport\" has not been added"}));
    assert_eq!(h.driver.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_tool_result_after_disconnect_is_dropped() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();

    h.function_call("call_3", "gated", "{}").await;
    h.driver.disconnect().await;
    h.gate.notify_one();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.mock.submitted().is_empty());
}

#[tokio::test]
async fn test_tool_result_from_previous_session_is_dropped() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();

    h.function_call("call_4", "gated", "{}").await;
    h.driver.disconnect().await;
    h.driver.connect().await.unwrap();
    h.gate.notify_one();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.mock.submitted().is_empty());
}

#[tokio::test]
async fn test_late_tool_write_does_not_reach_next_session() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();

    h.function_call("call_5", "gated", r#"{"key":"user_name","value":"Ada"}"#)
        .await;
    h.driver.disconnect().await;
    h.driver.connect().await.unwrap();
    h.gate.notify_one();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.driver.tools().memory.snapshot().is_empty());
    assert!(h.mock.submitted().is_empty());
}

#[tokio::test]
async fn test_gated_write_lands_in_live_session() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();

    h.function_call("call_6", "gated", r#"{"key":"user_name","value":"Ada"}"#)
        .await;
    h.gate.notify_one();

    let (call_id, output) = h.mock.wait_for_submit().await;
    assert_eq!(call_id, "call_6");
    assert_eq!(output, json!({"ok": true}));
    assert_eq!(
        h.driver.tools().memory.get("user_name").as_deref(),
        Some("Ada")
    );
}

// =============================================================================
// Silence guard
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sustained_silence_injects_noise() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();

    h.capture.push(generate_silence(FRAME_20MS)).await;
    assert!(h.driver.silence_guard().is_armed());

    tokio::time::sleep(SILENCE_TIMEOUT + Duration::from_millis(100)).await;

    assert_eq!(h.mock.audio_appends(), vec![FRAME_20MS, NOISE_FRAME_SAMPLES]);
    assert!(!h.driver.silence_guard().is_armed());
}

#[tokio::test(start_paused = true)]
async fn test_speech_cancels_silence_timer() {
    let h = Harness::new();
    h.driver.connect().await.unwrap();

    h.capture.push(generate_silence(FRAME_20MS)).await;
    tokio::time::sleep(Duration::from_millis(2000)).await;
    h.capture.push(generate_a440_tone(FRAME_20MS)).await;
    assert!(!h.driver.silence_guard().is_armed());

    tokio::time::sleep(SILENCE_TIMEOUT).await;
    assert_eq!(h.mock.audio_appends(), vec![FRAME_20MS, FRAME_20MS]);
}
