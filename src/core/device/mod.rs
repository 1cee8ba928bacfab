//! Local audio device boundary.
//!
//! The session never talks to an audio backend directly. It asks an
//! [`AudioHost`] for a permissioned microphone, a capture-rate context and a
//! playback-rate context, and releases each of them through the lifecycle
//! manager's resource group.
//!
//! Capture and completion callbacks run on backend threads. They must not
//! block: the capture path goes through a [`FrameSink`] and playback
//! completions through a [`SourceEndedSender`], both of which only enqueue.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::audio::CaptureFrame;

#[cfg(feature = "audio-device")]
mod cpal_host;

#[cfg(feature = "audio-device")]
pub use cpal_host::CpalAudioHost;

/// Identifier of one scheduled playback source.
pub type SourceId = u64;

/// Receives every capture frame, on the capture thread.
pub type FrameSink = Arc<dyn Fn(CaptureFrame) + Send + Sync>;

/// Notified when a scheduled source finishes playing naturally.
pub type SourceEndedSender = Arc<dyn Fn(SourceId) + Send + Sync>;

/// Errors raised by audio devices.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Microphone access refused
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable device or configuration
    #[error("Audio device unavailable: {0}")]
    Unavailable(String),

    /// Backend-specific failure
    #[error("Audio backend error: {0}")]
    Backend(String),

    /// Operation on a released device
    #[error("Audio device already closed")]
    Closed,
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Factory for the three device resources a session owns.
#[async_trait]
pub trait AudioHost: Send + Sync {
    /// Acquire mono microphone input. Suspends while the user is prompted.
    async fn request_microphone(&self, sample_rate: u32) -> DeviceResult<Arc<dyn MicrophoneStream>>;

    /// Open a device context running at the capture rate.
    async fn open_capture_context(&self, sample_rate: u32) -> DeviceResult<Arc<dyn CaptureContext>>;

    /// Open a schedulable output timeline running at the playback rate.
    async fn open_playback_context(
        &self,
        sample_rate: u32,
        on_source_ended: SourceEndedSender,
    ) -> DeviceResult<Box<dyn PlaybackDevice>>;
}

/// A granted microphone.
pub trait MicrophoneStream: Send + Sync {
    /// Stop every input track. Safe to call more than once.
    fn stop_tracks(&self) -> DeviceResult<()>;

    /// Whether tracks are still delivering audio.
    fn is_live(&self) -> bool;
}

/// Capture-rate device context.
pub trait CaptureContext: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Begin delivering `frame_len`-sample frames from `microphone` to `sink`.
    ///
    /// Frames are delivered in capture order. When the underlying stream ends or
    /// fails, delivery simply stops.
    fn start_capture(
        &self,
        microphone: Arc<dyn MicrophoneStream>,
        frame_len: usize,
        sink: FrameSink,
    ) -> DeviceResult<()>;

    /// Stop capture and release the context. Safe to call more than once.
    fn close(&self) -> DeviceResult<()>;
}

/// Playback-rate device context exposing an output timeline.
///
/// Times are seconds on the device's own output clock.
pub trait PlaybackDevice: Send {
    fn sample_rate(&self) -> u32;

    /// Current position of the output clock.
    fn now(&self) -> f64;

    /// Register `samples` to start exactly at `start_at`. Returns immediately.
    fn schedule(&mut self, id: SourceId, samples: Arc<[f32]>, start_at: f64) -> DeviceResult<()>;

    /// Silence a source now, whether it has started or not.
    fn stop_source(&mut self, id: SourceId) -> DeviceResult<()>;

    /// Release the output context. Safe to call more than once.
    fn close(&mut self) -> DeviceResult<()>;
}
