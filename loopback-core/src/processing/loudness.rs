//! Loudness metering over signed 16-bit little-endian PCM.
//!
//! Purely observational: nothing here decides whether a frame is forwarded.

use crate::models::audio_models::FrameLevels;

/// Decode the complete samples in `frame`. A trailing odd byte is ignored.
pub fn samples_i16(frame: &[u8]) -> impl Iterator<Item = i16> + '_ {
    frame
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// Root-mean-square amplitude, rounded to the nearest integer.
///
/// Returns 0 for frames without a complete sample.
pub fn rms_loudness(frame: &[u8]) -> u32 {
    let count = frame.len() / 2;
    if count == 0 {
        return 0;
    }

    let sum_sq: u64 = samples_i16(frame)
        .map(|s| {
            let v = s as i64;
            (v * v) as u64
        })
        .sum();
    let mean = sum_sq as f64 / count as f64;
    mean.sqrt().round() as u32
}

/// Largest absolute sample value.
pub fn peak_amplitude(frame: &[u8]) -> u32 {
    samples_i16(frame)
        .map(|s| (s as i32).unsigned_abs())
        .max()
        .unwrap_or(0)
}

/// RMS and peak of one frame.
pub fn measure(frame: &[u8]) -> FrameLevels {
    FrameLevels {
        rms: rms_loudness(frame),
        peak: peak_amplitude(frame),
    }
}
