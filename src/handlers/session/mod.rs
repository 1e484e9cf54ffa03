//! Server-driven voice session WebSocket
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **connect** / **disconnect**: open or close the upstream session
//! - **set_mode**: `server_vad` or `manual`
//! - **start_talking** / **stop_talking**: push-to-talk control
//! - **camera_frame**: latest webcam still as a data URL
//! - **delete_item**: remove a conversation item
//! - **Binary frames**: microphone audio (PCM 16-bit, 24kHz, mono)
//!
//! ## Server → Client
//!
//! - **state**: session state and capture mode
//! - **conversation**: full ordered item list after every update
//! - **event_log**: appended or coalesced event log entry
//! - **places** / **memory**: tool side effects
//! - **interrupted**: playback cut point
//! - **error**: command or upstream failure
//! - **Binary frames**: assistant audio

mod handler;
pub mod messages;

pub use handler::session_handler;
