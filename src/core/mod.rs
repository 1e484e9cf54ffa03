pub mod audio;
pub mod collaborators;
pub mod realtime;
pub mod session;
pub mod tools;

// Re-export commonly used types for convenience
pub use realtime::{
    BaseRealtime, OpenAIRealtime, RealtimeConfig, RealtimeError, RealtimeNotification,
    RealtimeResult, SharedRealtime, create_realtime_client,
};

pub use session::{CaptureMode, SessionDriver, SessionError, SessionEvent, SessionState};

pub use tools::{ToolDispatcher, ToolError, ToolOutcome, ToolRegistry};
