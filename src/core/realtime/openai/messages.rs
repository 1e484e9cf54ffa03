//! OpenAI Realtime API WebSocket message types.
//!
//! All events are JSON objects discriminated by their `type` field.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - input_audio_buffer.append - Append audio to buffer
//! - input_audio_buffer.commit - Commit audio buffer
//! - conversation.item.create - Add item to conversation
//! - conversation.item.truncate - Cut an assistant item to the audio played
//! - conversation.item.delete - Delete conversation item
//! - response.create - Generate a response
//! - response.cancel - Cancel current response
//!
//! Server events are only partially modelled: the ones that change the
//! conversation are typed, everything else lands in [`ServerEvent::Other`]
//! and is still visible to the event log as raw JSON.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::audio::pcm16_to_bytes;
use crate::core::realtime::base::{FunctionDefinition, TurnDetectionMode};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration for the `session.update` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection. `Some(None)` is sent as an explicit `null`, which
    /// disables engine-side VAD.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<Option<TurnDetection>>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
}

impl TurnDetection {
    /// Wire value for a turn detection mode; `None` disables detection.
    pub fn from_mode(mode: TurnDetectionMode) -> Option<Self> {
        match mode {
            TurnDetectionMode::ServerVad => Some(TurnDetection::ServerVad {
                threshold: None,
                prefix_padding_ms: None,
                silence_duration_ms: None,
            }),
            TurnDetectionMode::Disabled => None,
        }
    }
}

/// Tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl From<&FunctionDefinition> for ToolDef {
    fn from(def: &FunctionDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: def.name.clone(),
            description: Some(def.description.clone()),
            parameters: Some(def.parameters.clone()),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item as it appears on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemParam {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ItemParam {
    /// User text message.
    pub fn user_text(text: &str) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    /// Tool result correlated by call id.
    pub fn function_output(call_id: &str, output: &str) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.to_string()),
            output: Some(output.to_string()),
            ..Default::default()
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Audio content (base64 encoded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16 little-endian
        audio: String,
    },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ItemParam },

    /// Truncate a conversation item
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },

    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete { item_id: String },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from PCM16 samples.
    pub fn audio_append(samples: &[i16]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(pcm16_to_bytes(samples)),
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the OpenAI Realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated { session: Session },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted { audio_start_ms: u64, item_id: String },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped { audio_end_ms: u64, item_id: String },

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: ItemParam },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        item_id: String,
        #[serde(default)]
        content_index: u32,
        transcript: String,
    },

    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        item_id: String,
        #[serde(default)]
        content_index: u32,
        audio_end_ms: u64,
    },

    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted { item_id: String },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: ItemParam },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: ItemParam },

    #[serde(rename = "response.content_part.added")]
    ContentPartAdded { item_id: String, part: ContentPart },

    #[serde(rename = "response.text.delta")]
    TextDelta { item_id: String, delta: String },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { item_id: String, delta: String },

    /// Audio delta (base64 PCM16 chunk)
    #[serde(rename = "response.audio.delta")]
    AudioDelta { item_id: String, delta: String },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        item_id: String,
        call_id: String,
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        item_id: String,
        call_id: String,
        arguments: String,
    },

    /// Any event type without conversation side effects
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Decode base64 audio from an AudioDelta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

/// Session information.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
}
