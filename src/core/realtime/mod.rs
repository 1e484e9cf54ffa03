//! Upstream realtime engine.
//!
//! - `BaseRealtime` trait for the engine client
//! - `transport` for the raw authenticated WebSocket, shared with the relay
//! - `conversation` for the item list rebuilt from server events
//! - Callback-based notification of everything the engine reports
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz.

mod base;
pub mod conversation;
pub mod openai;
pub mod transport;

pub use base::{
    BaseRealtime, ConnectionState, EventSource, FunctionCallRequest, FunctionDefinition,
    ItemDelta, NotificationCallback, RealtimeConfig, RealtimeError, RealtimeNotification,
    RealtimeResult, SessionUpdate, TurnDetectionMode,
};
pub use conversation::{ConversationItem, ItemKind, ItemStatus, RealtimeConversation, Role};
pub use openai::{OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtime};
pub use transport::{UpstreamConnection, UpstreamEndpoint, connect_upstream};

/// Boxed realtime client shared between the session driver and its tasks.
pub type SharedRealtime = std::sync::Arc<dyn BaseRealtime>;

/// Create the realtime client for a session.
pub fn create_realtime_client(config: RealtimeConfig) -> RealtimeResult<SharedRealtime> {
    Ok(std::sync::Arc::new(OpenAIRealtime::new(config)?))
}
