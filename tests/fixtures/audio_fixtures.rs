//! Audio Test Fixtures
//!
//! Generated PCM16 frames at the gateway's 24kHz rate:
//! - Silence (pure zeros)
//! - Near-silence (below the silence threshold)
//! - Sine wave tones

use std::f32::consts::PI;

/// Sample rate of every frame exchanged with the upstream engine
pub const SAMPLE_RATE: u32 = 24_000;

/// 20ms frame at 24kHz
pub const FRAME_20MS: usize = 480;

/// Generate silence (zeros)
pub fn generate_silence(duration_samples: usize) -> Vec<i16> {
    vec![0i16; duration_samples]
}

/// Low-level hum whose peak stays under 1% of full scale
pub fn generate_near_silence(duration_samples: usize) -> Vec<i16> {
    generate_sine_wave(duration_samples, 50.0, 0.005)
}

/// Generate a sine wave with amplitude in 0.0 - 1.0
pub fn generate_sine_wave(duration_samples: usize, frequency: f32, amplitude: f32) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    (0..duration_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (max_amplitude * (2.0 * PI * frequency * t).sin()) as i16
        })
        .collect()
}

/// Half-scale A440, clearly above the silence threshold
pub fn generate_a440_tone(duration_samples: usize) -> Vec<i16> {
    generate_sine_wave(duration_samples, 440.0, 0.5)
}

/// Encode samples as little-endian bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
