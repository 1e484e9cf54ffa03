//! Audio capture seam.
//!
//! The driver never touches a device. A capture source delivers PCM16
//! frames through a push callback while recording; [`ChannelCapture`] is the
//! source used by the session WebSocket, where frames arrive from the
//! browser.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

/// Receives captured frames, in capture order.
pub type FrameCallback =
    Arc<dyn Fn(Vec<i16>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub trait AudioCapture: Send + Sync {
    /// Acquire the source. Frames are not delivered until [`record`](Self::record).
    fn open(&self);

    /// Start delivering frames to `on_frame`, replacing any previous callback.
    fn record(&self, on_frame: FrameCallback);

    /// Stop delivering frames but keep the source open.
    fn pause(&self);

    /// Stop delivering frames and release the source.
    fn close(&self);

    fn is_open(&self) -> bool;

    fn is_recording(&self) -> bool;
}

#[derive(Default)]
struct CaptureState {
    open: bool,
    on_frame: Option<FrameCallback>,
}

/// Capture fed by pushing frames from elsewhere.
#[derive(Default)]
pub struct ChannelCapture {
    state: RwLock<CaptureState>,
}

impl ChannelCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a frame. Dropped unless recording.
    pub async fn push(&self, frame: Vec<i16>) -> bool {
        let callback = self.state.read().on_frame.clone();
        match callback {
            Some(on_frame) => {
                on_frame(frame).await;
                true
            }
            None => false,
        }
    }
}

impl AudioCapture for ChannelCapture {
    fn open(&self) {
        self.state.write().open = true;
    }

    fn record(&self, on_frame: FrameCallback) {
        let mut state = self.state.write();
        if !state.open {
            tracing::warn!("record() on a closed capture source, opening it");
            state.open = true;
        }
        state.on_frame = Some(on_frame);
    }

    fn pause(&self) {
        self.state.write().on_frame = None;
    }

    fn close(&self) {
        let mut state = self.state.write();
        state.on_frame = None;
        state.open = false;
    }

    fn is_open(&self) -> bool {
        self.state.read().open
    }

    fn is_recording(&self) -> bool {
        self.state.read().on_frame.is_some()
    }
}
