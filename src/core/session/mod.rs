//! One browser-facing voice session and the pieces it is built from.

pub mod capture;
pub mod conversation_store;
pub mod driver;
pub mod event_log;
pub mod playback;
pub mod silence_guard;

pub use capture::{AudioCapture, ChannelCapture, FrameCallback};
pub use conversation_store::{ConversationStore, PublishedItem};
pub use driver::{CaptureMode, GREETING, SessionDriver, SessionError, SessionEvent, SessionState};
pub use event_log::{EventLog, RealtimeEvent, format_offset};
pub use playback::{PlaybackEvent, PlaybackSink, StreamPlayer};
pub use silence_guard::{
    NOISE_FRAME_SAMPLES, NoiseSink, SILENCE_THRESHOLD, SILENCE_TIMEOUT, SilenceGuard, noise_frame,
};
