//! PCM16 helpers shared by the capture, playback and conversation paths.
//!
//! All audio in the gateway is mono, signed 16-bit little-endian at 24kHz.

use std::io::Cursor;

use thiserror::Error;

/// Sample rate of every frame exchanged with the upstream engine.
pub const SAMPLE_RATE: u32 = 24_000;

/// Playback position of an interrupted track, in samples.
///
/// Reported when playback is cut short so the upstream engine can truncate
/// the assistant item to what the user actually heard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSampleOffset {
    pub track_id: String,
    pub offset: u64,
}

impl TrackSampleOffset {
    /// Played duration in milliseconds at the given sample rate.
    pub fn played_ms(&self, sample_rate: u32) -> u32 {
        (self.offset.saturating_mul(1000) / sample_rate.max(1) as u64) as u32
    }
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("PCM16 payload has odd length: {0} bytes")]
    OddLength(usize),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Decode little-endian PCM16 bytes into samples.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode samples as little-endian PCM16 bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Normalize a sample to [-1.0, 1.0).
#[inline]
pub fn normalize(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert a float sample back to PCM16, clamping out-of-range input.
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Peak absolute amplitude of a frame, normalized. Empty frames are silent.
pub fn peak_amplitude(samples: &[i16]) -> f32 {
    samples
        .iter()
        .map(|s| normalize(*s).abs())
        .fold(0.0_f32, f32::max)
}

/// Wrap PCM16 samples in a playable WAV container.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for s in samples {
            writer.write_sample(*s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
