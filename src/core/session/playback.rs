//! Playback seam and the streaming player behind the session WebSocket.
//!
//! Assistant audio is queued per track (one track per conversation item).
//! The player cannot observe the client's speaker, so it estimates the play
//! head from wall time: chunks play back to back from the moment the first
//! one is queued. On interrupt it reports how many samples of the current
//! track were heard, which bounds the upstream truncation.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::core::audio::{SAMPLE_RATE, TrackSampleOffset};

pub trait PlaybackSink: Send + Sync {
    fn open(&self);

    /// Queue samples for `track_id`. Chunks for interrupted tracks are dropped.
    fn add_pcm16(&self, track_id: &str, samples: &[i16]);

    /// Stop the current track and report how far it got.
    ///
    /// Returns `None` when nothing is playing.
    fn interrupt(&self) -> Option<TrackSampleOffset>;

    fn close(&self);
}

/// Output of [`StreamPlayer`], consumed by the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    Audio {
        track_id: String,
        #[serde(skip)]
        samples: Vec<i16>,
    },
    Interrupted {
        track_id: String,
        offset: u64,
    },
}

struct Track {
    id: String,
    started: Instant,
    queued: u64,
}

#[derive(Default)]
struct PlayerState {
    open: bool,
    current: Option<Track>,
    /// When the last queued sample finishes playing
    busy_until: Option<Instant>,
    interrupted: HashSet<String>,
}

pub struct StreamPlayer {
    state: Mutex<PlayerState>,
    sample_rate: u32,
    tx: mpsc::UnboundedSender<PlaybackEvent>,
}

impl StreamPlayer {
    pub fn new(tx: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self::with_sample_rate(tx, SAMPLE_RATE)
    }

    pub fn with_sample_rate(tx: mpsc::UnboundedSender<PlaybackEvent>, sample_rate: u32) -> Self {
        Self {
            state: Mutex::new(PlayerState::default()),
            sample_rate,
            tx,
        }
    }

    fn duration_of(&self, samples: u64) -> Duration {
        Duration::from_micros(samples * 1_000_000 / self.sample_rate.max(1) as u64)
    }

    fn samples_in(&self, elapsed: Duration) -> u64 {
        (elapsed.as_micros() * self.sample_rate as u128 / 1_000_000) as u64
    }

    /// Samples of the current track heard so far.
    pub fn position(&self) -> Option<TrackSampleOffset> {
        let state = self.state.lock();
        let track = state.current.as_ref()?;
        let heard = self
            .samples_in(Instant::now().saturating_duration_since(track.started))
            .min(track.queued);
        Some(TrackSampleOffset {
            track_id: track.id.clone(),
            offset: heard,
        })
    }
}

impl PlaybackSink for StreamPlayer {
    fn open(&self) {
        let mut state = self.state.lock();
        state.open = true;
        state.interrupted.clear();
    }

    fn add_pcm16(&self, track_id: &str, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        if !state.open || state.interrupted.contains(track_id) {
            return;
        }

        let now = Instant::now();
        let start = state.busy_until.filter(|t| *t > now).unwrap_or(now);
        let is_new_track = state
            .current
            .as_ref()
            .is_none_or(|track| track.id != track_id);
        if is_new_track {
            state.current = Some(Track {
                id: track_id.to_string(),
                started: start,
                queued: 0,
            });
        }
        if let Some(track) = state.current.as_mut() {
            track.queued += samples.len() as u64;
        }
        state.busy_until = Some(start + self.duration_of(samples.len() as u64));
        drop(state);

        let _ = self.tx.send(PlaybackEvent::Audio {
            track_id: track_id.to_string(),
            samples: samples.to_vec(),
        });
    }

    fn interrupt(&self) -> Option<TrackSampleOffset> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let still_playing = state.busy_until.is_some_and(|t| t > now);
        let track = state.current.take()?;
        state.busy_until = None;
        if !still_playing {
            return None;
        }

        let heard = self
            .samples_in(now.saturating_duration_since(track.started))
            .min(track.queued);
        state.interrupted.insert(track.id.clone());
        drop(state);

        tracing::debug!(track_id = %track.id, offset = heard, "Playback interrupted");
        let _ = self.tx.send(PlaybackEvent::Interrupted {
            track_id: track.id.clone(),
            offset: heard,
        });
        Some(TrackSampleOffset {
            track_id: track.id,
            offset: heard,
        })
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.open = false;
        state.current = None;
        state.busy_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> (StreamPlayer, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = StreamPlayer::new(tx);
        player.open();
        (player, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_reports_heard_samples() {
        let (player, mut rx) = player();
        // one second of audio
        player.add_pcm16("item_1", &vec![0; 24_000]);
        assert!(matches!(rx.recv().await, Some(PlaybackEvent::Audio { .. })));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let offset = player.interrupt().unwrap();
        assert_eq!(offset.track_id, "item_1");
        assert_eq!(offset.offset, 6_000);
        assert_eq!(
            rx.recv().await,
            Some(PlaybackEvent::Interrupted {
                track_id: "item_1".to_string(),
                offset: 6_000
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_for_interrupted_track_are_dropped() {
        let (player, mut rx) = player();
        player.add_pcm16("item_1", &vec![0; 2_400]);
        rx.recv().await.unwrap();
        player.interrupt().unwrap();
        rx.recv().await.unwrap();

        player.add_pcm16("item_1", &vec![0; 2_400]);
        assert!(rx.try_recv().is_err());

        player.add_pcm16("item_2", &vec![0; 2_400]);
        assert!(matches!(
            rx.try_recv(),
            Ok(PlaybackEvent::Audio { track_id, .. }) if track_id == "item_2"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_after_playback_finished() {
        let (player, _rx) = player();
        player.add_pcm16("item_1", &vec![0; 2_400]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(player.interrupt().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_with_nothing_queued() {
        let (player, _rx) = player();
        assert!(player.interrupt().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_capped_at_queued() {
        let (player, _rx) = player();
        player.add_pcm16("item_1", &vec![0; 2_400]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(player.position().unwrap().offset, 1_200);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(player.position().unwrap().offset, 2_400);
    }
}
