//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `relay` - Verbatim relay to the upstream realtime engine
//! - `session` - Server-driven voice session
//! - `upload` - Image intake
//! - `fallback` - Unknown paths

pub mod api;
pub mod fallback;
pub mod relay;
pub mod session;
pub mod upload;

pub use relay::relay_handler;
pub use session::session_handler;
