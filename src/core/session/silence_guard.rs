//! Keeps the upstream stream alive through long silences.
//!
//! Every outbound frame is inspected. When a run of frames stays below the
//! silence threshold for [`SILENCE_TIMEOUT`], one short frame of low-level
//! noise is injected as if it had been captured, then tracking starts over.
//! The deadline is anchored at the first silent frame of the run; further
//! silent frames do not push it back. Any louder frame cancels the timer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::core::audio::{float_to_pcm16, peak_amplitude};

/// Normalized peak below which a frame counts as silent.
pub const SILENCE_THRESHOLD: f32 = 0.01;

/// Silence duration before noise is injected.
pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Length of an injected noise frame, in samples.
pub const NOISE_FRAME_SAMPLES: usize = 500;

/// Peak-to-peak span of injected noise, normalized.
pub const NOISE_SPAN: f32 = 0.05;

/// Receives injected noise frames.
pub type NoiseSink = Arc<dyn Fn(Vec<i16>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Default)]
struct GuardState {
    /// Bumped on every arm/cancel so a stale timer never fires
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct SilenceGuard {
    state: Arc<Mutex<GuardState>>,
    sink: NoiseSink,
    timeout: Duration,
}

impl SilenceGuard {
    pub fn new(sink: NoiseSink) -> Self {
        Self::with_timeout(sink, SILENCE_TIMEOUT)
    }

    pub fn with_timeout(sink: NoiseSink, timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(GuardState::default())),
            sink,
            timeout,
        }
    }

    /// Inspect an outbound frame. Returns `true` if it was silent.
    pub fn observe(&self, frame: &[i16]) -> bool {
        if peak_amplitude(frame) < SILENCE_THRESHOLD {
            self.arm();
            true
        } else {
            self.cancel();
            false
        }
    }

    /// Start the silence timer unless one is already pending.
    pub fn arm(&self) {
        let mut state = self.state.lock();
        if state.timer.is_some() {
            return;
        }
        state.generation += 1;
        let generation = state.generation;

        let shared = self.state.clone();
        let sink = self.sink.clone();
        let timeout = self.timeout;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            {
                let mut state = shared.lock();
                if state.generation != generation {
                    return;
                }
                state.timer = None;
            }
            tracing::debug!("{}ms of silence, injecting noise frame", timeout.as_millis());
            sink(noise_frame()).await;
        }));
    }

    /// Cancel a pending timer and clear tracking.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    /// Inject a noise frame now and clear tracking.
    pub async fn fire(&self) {
        self.cancel();
        (self.sink)(noise_frame()).await;
    }

    /// Forget all tracking. Called whenever capture restarts.
    pub fn reset(&self) {
        self.cancel();
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().timer.is_some()
    }
}

impl Drop for SilenceGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One frame of uniform noise centred on zero.
pub fn noise_frame() -> Vec<i16> {
    (0..NOISE_FRAME_SAMPLES)
        .map(|_| float_to_pcm16((rand::random::<f32>() - 0.5) * NOISE_SPAN))
        .collect()
}
