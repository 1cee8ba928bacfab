//! Audio units exchanged between the local devices and the remote voice service.
//!
//! # Audio Format
//!
//! - Outbound (capture): PCM 16-bit signed little-endian, mono, 16kHz, base64 encoded
//! - Inbound (playback): PCM 16-bit signed little-endian, mono, 24kHz, base64 encoded
//!
//! Both directions declare their format with an `audio/pcm;rate=<hz>` mime tag.

mod chunk;
mod encoder;

pub use chunk::{ChunkDecodeError, PlaybackChunk};
pub use encoder::{FrameEncoder, float_to_pcm16, pcm16_to_float};

/// Default capture sample rate in Hz.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Default number of samples per capture frame.
pub const CAPTURE_FRAME_LEN: usize = 4096;

/// Default playback sample rate in Hz.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// One chunk of raw microphone audio, as delivered by a capture callback tick.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    /// Mono samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl CaptureFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A frame of digital silence.
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; len], sample_rate)
    }
}

/// Wire-ready audio unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportBlob {
    /// Declared mime type (e.g. `audio/pcm;rate=16000`)
    pub mime: String,
    /// Sample rate in Hz
    pub rate: u32,
    /// Base64-encoded PCM16 little-endian bytes
    pub data: String,
}

/// Build the mime tag for raw PCM16 at the given rate.
pub fn pcm_mime(rate: u32) -> String {
    format!("audio/pcm;rate={rate}")
}

/// Parse an `audio/pcm[;rate=<hz>]` mime tag.
///
/// Returns `None` for non-PCM mime types, `Some(None)` when no rate parameter is
/// present and `Some(Some(rate))` otherwise.
pub fn parse_pcm_mime(mime: &str) -> Option<Option<u32>> {
    let mut parts = mime.split(';').map(str::trim);
    let essence = parts.next()?.to_ascii_lowercase();
    if essence != "audio/pcm" && essence != "audio/l16" {
        return None;
    }

    let rate = parts
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, v)| v.trim().parse::<u32>().ok());
    Some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_mime_roundtrip() {
        assert_eq!(pcm_mime(16000), "audio/pcm;rate=16000");
        assert_eq!(parse_pcm_mime("audio/pcm;rate=24000"), Some(Some(24000)));
    }

    #[test]
    fn test_parse_pcm_mime_variants() {
        assert_eq!(parse_pcm_mime("audio/pcm"), Some(None));
        assert_eq!(parse_pcm_mime("AUDIO/PCM; rate=8000"), Some(Some(8000)));
        assert_eq!(parse_pcm_mime("audio/L16;rate=16000"), Some(Some(16000)));
        assert_eq!(parse_pcm_mime("audio/pcm;rate=abc"), Some(None));
        assert_eq!(parse_pcm_mime("audio/mpeg"), None);
        assert_eq!(parse_pcm_mime(""), None);
    }

    #[test]
    fn test_silence_frame() {
        let frame = CaptureFrame::silence(CAPTURE_FRAME_LEN, CAPTURE_SAMPLE_RATE);
        assert_eq!(frame.samples.len(), 4096);
        assert!(frame.samples.iter().all(|s| *s == 0.0));
    }
}
