//! Audio Test Fixtures
//!
//! Programmatically generated audio, so tests have no file dependencies and
//! exact control over length and content.
//!
//! Formats:
//! - Capture: mono f32 in [-1.0, 1.0] at 16kHz, 4096-sample frames
//! - Inbound chunks: base64 16-bit little-endian PCM, `audio/pcm;rate=<hz>`

use std::f32::consts::PI;

use base64::prelude::*;

use keepsake_voice::core::audio::{CAPTURE_FRAME_LEN, CAPTURE_SAMPLE_RATE, CaptureFrame, pcm_mime};

/// Playback rate the remote service speaks at
pub const SPEECH_RATE: u32 = 24000;

/// One capture frame of silence
pub fn silent_frame() -> CaptureFrame {
    CaptureFrame::silence(CAPTURE_FRAME_LEN, CAPTURE_SAMPLE_RATE)
}

/// One capture frame of a sine tone
pub fn tone_frame(frequency: f32, amplitude: f32) -> CaptureFrame {
    let angular_freq = 2.0 * PI * frequency / CAPTURE_SAMPLE_RATE as f32;
    let samples = (0..CAPTURE_FRAME_LEN)
        .map(|i| (angular_freq * i as f32).sin() * amplitude)
        .collect();
    CaptureFrame::new(samples, CAPTURE_SAMPLE_RATE)
}

/// Raw PCM16 bytes of `seconds` of a 220Hz tone at `rate`
pub fn speech_bytes(seconds: f64, rate: u32) -> Vec<u8> {
    let len = (seconds * rate as f64).round() as usize;
    let angular_freq = 2.0 * PI * 220.0 / rate as f32;
    (0..len)
        .flat_map(|i| {
            let sample = ((angular_freq * i as f32).sin() * 0.25 * i16::MAX as f32) as i16;
            sample.to_le_bytes()
        })
        .collect()
}

/// `(mime, data)` for an `audioDelta` of `seconds` at `rate`
pub fn speech_chunk(seconds: f64, rate: u32) -> (String, String) {
    (
        pcm_mime(rate),
        BASE64_STANDARD.encode(speech_bytes(seconds, rate)),
    )
}

/// Decode a base64 PCM16 payload back to samples
pub fn decode_pcm16(data: &str) -> Vec<i16> {
    BASE64_STANDARD
        .decode(data)
        .unwrap_or_default()
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}
