//! OpenAI Realtime API module.
//!
//! Bidirectional audio streaming against OpenAI's Realtime API with
//! server-side VAD, input transcription and function calling.
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.

mod client;
mod config;
pub mod messages;

pub use client::OpenAIRealtime;
pub use config::{
    DEFAULT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_AUDIO_FORMAT, OPENAI_REALTIME_SAMPLE_RATE,
    OPENAI_REALTIME_URL, OpenAIRealtimeVoice,
};
pub use messages::{ClientEvent, ServerEvent, SessionConfig, TurnDetection};
