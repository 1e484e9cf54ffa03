//! Base traits and types for the upstream realtime engine.
//!
//! The engine is a bidirectional event stream: the gateway pushes audio and
//! control events, the engine pushes back audio/transcript deltas, item
//! lifecycle events and tool-call requests.
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz sample rate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use super::conversation::ConversationItem;
use crate::core::audio::TrackSampleOffset;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the upstream engine failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Engine-reported error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Session error (invalid item references and similar)
    #[error("Session error: {0}")]
    SessionError(String),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for the upstream realtime client.
#[derive(Debug, Clone, Default)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// WebSocket endpoint without query string
    pub url: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    pub model: String,

    /// Voice ID for audio output
    pub voice: Option<String>,

    /// System instructions for the assistant
    pub instructions: Option<String>,

    /// Input audio transcription model (e.g., "whisper-1")
    pub input_audio_transcription: Option<String>,

    /// Turn detection sent with the initial session update
    pub turn_detection: TurnDetectionMode,

    /// Tool definitions for function calling
    pub tools: Vec<FunctionDefinition>,
}

/// How the engine decides that a user turn has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetectionMode {
    /// Engine-side voice activity detection
    #[default]
    ServerVad,
    /// No automatic turn detection; the client commits turns explicitly
    Disabled,
}

/// Partial session update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub instructions: Option<String>,
    pub turn_detection: Option<TurnDetectionMode>,
    pub input_audio_transcription: Option<String>,
    pub tools: Option<Vec<FunctionDefinition>>,
}

/// Function definition advertised to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Function description
    pub description: String,
    /// JSON schema for parameters
    pub parameters: serde_json::Value,
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state for the upstream engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Direction of a protocol event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Client,
    Server,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Client => write!(f, "client"),
            EventSource::Server => write!(f, "server"),
        }
    }
}

/// Incremental change carried by a conversation update.
#[derive(Debug, Clone, Default)]
pub struct ItemDelta {
    /// Newly decoded PCM16 samples
    pub audio: Option<Vec<i16>>,
    pub transcript: Option<String>,
    pub text: Option<String>,
    pub arguments: Option<String>,
}

/// Function call request from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Call ID used to correlate the output
    pub call_id: String,
    /// Function name
    pub name: String,
    /// JSON arguments as sent by the engine
    pub arguments: String,
    /// Item ID
    pub item_id: Option<String>,
}

/// Everything the upstream client reports to its owner.
#[derive(Debug, Clone)]
pub enum RealtimeNotification {
    /// Raw protocol event, sent or received
    Event {
        source: EventSource,
        event_type: String,
        payload: serde_json::Value,
    },
    /// The authoritative conversation changed
    ConversationUpdated {
        item_id: String,
        delta: Option<ItemDelta>,
    },
    /// User speech detected while the assistant may be talking
    Interrupted,
    /// The model asked for a tool to be run
    FunctionCall(FunctionCallRequest),
    /// Engine-reported error
    Error(String),
    /// Upstream connection ended without a local disconnect
    Closed,
}

/// Callback type for upstream notifications.
pub type NotificationCallback =
    Arc<dyn Fn(RealtimeNotification) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Base Trait
// =============================================================================

/// Upstream realtime engine client.
///
/// Methods take `&self` so a single client can be shared between the session
/// driver, tool tasks and the capture callback.
#[async_trait]
pub trait BaseRealtime: Send + Sync {
    /// Open the upstream connection and send the initial session update.
    async fn connect(&self) -> RealtimeResult<()>;

    /// Close the upstream connection. Safe to call when already disconnected.
    async fn disconnect(&self) -> RealtimeResult<()>;

    /// Check if the client is connected and ready.
    fn is_ready(&self) -> bool;

    /// Get the current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Register the notification callback. Replaces any previous one.
    fn on_notification(&self, callback: NotificationCallback);

    // -------------------------------------------------------------------------
    // Audio and conversation input
    // -------------------------------------------------------------------------

    /// Append captured audio to the engine's input buffer.
    async fn append_input_audio(&self, samples: &[i16]) -> RealtimeResult<()>;

    /// Add a user text message and request a response.
    async fn send_user_text(&self, text: &str) -> RealtimeResult<()>;

    // -------------------------------------------------------------------------
    // Session Control
    // -------------------------------------------------------------------------

    /// Request a response, committing any buffered input audio first.
    async fn create_response(&self) -> RealtimeResult<()>;

    /// Cancel the in-flight response. When an interrupted playback position is
    /// given, the assistant item is truncated to the audio actually played.
    async fn cancel_response(&self, interrupted: Option<TrackSampleOffset>) -> RealtimeResult<()>;

    /// Apply a partial session update.
    async fn update_session(&self, update: SessionUpdate) -> RealtimeResult<()>;

    /// Submit a tool result and ask the model to continue.
    async fn submit_function_result(&self, call_id: &str, output: &str) -> RealtimeResult<()>;

    /// Remove an item from the upstream conversation.
    async fn delete_item(&self, item_id: &str) -> RealtimeResult<()>;

    /// Snapshot of the authoritative, ordered conversation.
    fn conversation_items(&self) -> Vec<ConversationItem>;
}
