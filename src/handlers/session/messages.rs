//! Session WebSocket message types
//!
//! Binary frames carry raw PCM16 (24kHz mono, little-endian) in both
//! directions. Everything else is JSON tagged by `type`.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::collaborators::Place;
use crate::core::session::{CaptureMode, PublishedItem, RealtimeEvent, SessionState};

/// Maximum size of one camera frame data URL (5 MB)
pub const MAX_CAMERA_FRAME_SIZE: usize = 5 * 1024 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionIncomingMessage {
    /// Open the upstream session
    Connect,
    /// Close the upstream session
    Disconnect,
    /// Switch between `server_vad` and `manual`
    SetMode { mode: CaptureMode },
    /// Push-to-talk pressed
    StartTalking,
    /// Push-to-talk released
    StopTalking,
    /// Latest webcam still, as a data URL
    CameraFrame { image: String },
    /// Remove an item from the conversation
    DeleteItem { item_id: String },
}

impl SessionIncomingMessage {
    pub fn validate_size(&self) -> Result<(), String> {
        if let SessionIncomingMessage::CameraFrame { image } = self
            && image.len() > MAX_CAMERA_FRAME_SIZE
        {
            return Err(format!(
                "Camera frame too large: {} bytes (max {})",
                image.len(),
                MAX_CAMERA_FRAME_SIZE
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionOutgoingMessage {
    State {
        state: SessionState,
        mode: CaptureMode,
    },
    Conversation {
        items: Vec<PublishedItem>,
    },
    EventLog {
        index: usize,
        entry: RealtimeEvent,
    },
    Places {
        places: Vec<Place>,
    },
    Memory {
        memory: BTreeMap<String, String>,
    },
    /// Playback of `track_id` was cut after `offset` samples
    Interrupted {
        track_id: String,
        offset: u64,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
}

impl SessionOutgoingMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        SessionOutgoingMessage::Error {
            code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

/// Routing for the socket's sender task.
#[derive(Debug)]
pub enum SessionMessageRoute {
    Outgoing(SessionOutgoingMessage),
    Audio(Bytes),
    Close,
}
