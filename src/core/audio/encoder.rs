//! Capture frame encoding.
//!
//! Each frame is converted independently: samples are scaled to PCM16,
//! packed little-endian and base64 encoded. Nothing is buffered across frames.

use base64::prelude::*;

use super::{CaptureFrame, TransportBlob, pcm_mime};

/// Scale a float sample in `[-1.0, 1.0]` to a signed 16-bit value.
///
/// Uses `round(sample * 32768)` clamped to the i16 range, so `1.0` maps to
/// `i16::MAX` and `-1.0` to `i16::MIN`.
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    // NaN casts to 0
    (sample.clamp(-1.0, 1.0) * 32768.0)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Inverse of [`float_to_pcm16`].
#[inline]
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Turns capture frames into transport blobs.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    sample_rate: u32,
    mime: String,
}

impl FrameEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            mime: pcm_mime(sample_rate),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Encode one frame. The frame's own rate is declared on the blob.
    pub fn encode(&self, frame: &CaptureFrame) -> TransportBlob {
        if frame.sample_rate != self.sample_rate {
            tracing::trace!(
                expected = self.sample_rate,
                actual = frame.sample_rate,
                "capture frame rate differs from encoder rate"
            );
            return TransportBlob {
                mime: pcm_mime(frame.sample_rate),
                rate: frame.sample_rate,
                data: Self::encode_samples(&frame.samples),
            };
        }

        TransportBlob {
            mime: self.mime.clone(),
            rate: self.sample_rate,
            data: Self::encode_samples(&frame.samples),
        }
    }

    /// PCM16 little-endian pack + base64.
    pub fn encode_samples(samples: &[f32]) -> String {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            bytes.extend_from_slice(&float_to_pcm16(s).to_le_bytes());
        }
        BASE64_STANDARD.encode(bytes)
    }
}
