//! Decoded inbound audio.

use std::sync::Arc;

use base64::prelude::*;
use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

use super::{parse_pcm_mime, pcm16_to_float};

/// Reasons an inbound audio delta cannot be turned into a playback chunk.
#[derive(Debug, Error)]
pub enum ChunkDecodeError {
    /// Mime type is not raw PCM
    #[error("Unsupported audio mime type: {0}")]
    UnsupportedMime(String),

    /// Neither the event nor the mime declares a sample rate
    #[error("Audio delta does not declare a sample rate")]
    MissingRate,

    /// Payload is not valid base64
    #[error("Invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// PCM16 payload with an odd number of bytes
    #[error("PCM16 payload has odd length: {0} bytes")]
    OddLength(usize),

    /// Payload decoded to zero samples
    #[error("Audio delta is empty")]
    Empty,
}

/// One decoded inbound audio buffer, ready to be scheduled.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    /// Mono samples in `[-1.0, 1.0]`
    pub samples: Arc<[f32]>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Arrival order within the session
    pub sequence: u64,
}

impl PlaybackChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
        }
    }

    /// Build a silent chunk lasting `seconds`.
    pub fn silence(seconds: f64, sample_rate: u32, sequence: u64) -> Self {
        let len = (seconds * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate, sequence)
    }

    /// Decode an `audioDelta` payload.
    ///
    /// An explicit `rate` takes precedence over the mime `rate` parameter.
    pub fn decode(
        mime: &str,
        rate: Option<u32>,
        data: &str,
        sequence: u64,
    ) -> Result<Self, ChunkDecodeError> {
        let mime_rate =
            parse_pcm_mime(mime).ok_or_else(|| ChunkDecodeError::UnsupportedMime(mime.to_string()))?;
        let sample_rate = rate
            .or(mime_rate)
            .filter(|r| *r > 0)
            .ok_or(ChunkDecodeError::MissingRate)?;

        let bytes = BASE64_STANDARD.decode(data)?;
        if bytes.len() % 2 != 0 {
            return Err(ChunkDecodeError::OddLength(bytes.len()));
        }
        if bytes.is_empty() {
            return Err(ChunkDecodeError::Empty);
        }

        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|c| pcm16_to_float(i16::from_le_bytes([c[0], c[1]])))
            .collect();

        Ok(Self::new(samples, sample_rate, sequence))
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Resample to `target_rate`. Returns `self` unchanged when the rates
    /// already match.
    ///
    /// Uses an FFT resampler with its delay trimmed, so the output lines up
    /// with the input and lasts as long. Falls back to linear interpolation if
    /// the resampler rejects the rate pair.
    pub fn resampled(self, target_rate: u32) -> Self {
        if target_rate == 0 || target_rate == self.sample_rate || self.samples.is_empty() {
            return self;
        }

        let samples = match resample_fft(&self.samples, self.sample_rate, target_rate) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::debug!(
                    from = self.sample_rate,
                    to = target_rate,
                    error = %e,
                    "fft resampler unavailable, falling back to linear"
                );
                resample_linear(&self.samples, self.sample_rate, target_rate)
            }
        };
        Self::new(samples, target_rate, self.sequence)
    }
}

const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;
const MAX_FLUSHES: usize = 8;

#[derive(Debug, Error)]
enum ResampleFailure {
    #[error("Resampler construction failed: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("Resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

fn resampled_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    ((input_len as f64) * to_rate as f64 / from_rate as f64)
        .round()
        .max(1.0) as usize
}

fn resample_fft(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, ResampleFailure> {
    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        1,
    )?;
    let block_len = resampler.input_frames_next();
    let delay = resampler.output_delay();
    let wanted = resampled_len(input.len(), from_rate, to_rate);
    let mut output = Vec::with_capacity(delay + wanted + resampler.output_frames_max());

    let mut blocks = input.chunks_exact(block_len);
    for block in &mut blocks {
        let out = resampler.process(&[block], None)?;
        output.extend_from_slice(&out[0]);
    }
    let rest = blocks.remainder();
    if !rest.is_empty() {
        let out = resampler.process_partial(Some(&[rest][..]), None)?;
        output.extend_from_slice(&out[0]);
    }

    // drain the samples still held back by the resampler delay
    let mut flushes = 0;
    while output.len() < delay + wanted && flushes < MAX_FLUSHES {
        let out = resampler.process_partial(None::<&[&[f32]]>, None)?;
        output.extend_from_slice(&out[0]);
        flushes += 1;
    }

    let mut samples: Vec<f32> = output.into_iter().skip(delay).take(wanted).collect();
    let pad = samples.last().copied().unwrap_or(0.0);
    samples.resize(wanted, pad);
    Ok(samples)
}

/// Linear interpolation between neighbouring samples.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let Some(last) = input.len().checked_sub(1) else {
        return Vec::new();
    };
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = resampled_len(input.len(), from_rate, to_rate);

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            if idx >= last {
                return input[last];
            }
            let frac = (pos - idx as f64) as f32;
            input[idx] * (1.0 - frac) + input[idx + 1] * frac
        })
        .collect()
}
