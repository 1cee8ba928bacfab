//! Remote voice service boundary.
//!
//! A [`RealtimeTransport`] opens one bidirectional channel per session. The
//! channel reports everything it receives as [`SessionEvent`]s on the
//! session's event queue and accepts outbound traffic through an
//! [`OutboundSender`].
//!
//! # Audio Format
//!
//! Outbound audio is PCM 16-bit signed little-endian at the capture rate,
//! base64 encoded and tagged `audio/pcm;rate=<hz>`. Inbound audio uses the
//! same encoding at whatever rate the service declares.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::messages::ClientMessage;
use crate::core::audio::TransportBlob;
use crate::core::session::SessionEvent;
use crate::core::tools::{ToolCallResponse, ToolDeclaration};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on the remote channel.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// Connection to the service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Error event reported by the service
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Channel already closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Outbound queue is full
    #[error("Outbound queue full")]
    QueueFull,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session Setup
// =============================================================================

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// User speech transcript
    User,
    /// Assistant speech transcript
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Output the service is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// Parameters declared when the channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    /// Model identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// System / persona instructions
    pub instructions: String,

    /// Voice identity selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Response modalities
    pub response_modalities: Vec<ResponseModality>,

    /// Stream transcription of the user's speech
    pub input_transcription: bool,

    /// Stream transcription of the assistant's speech
    pub output_transcription: bool,

    /// Tool schema
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
}

impl SessionSetup {
    /// Audio responses with both transcripts, no tools.
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            model: None,
            instructions: instructions.into(),
            voice: None,
            response_modalities: vec![ResponseModality::Audio],
            input_transcription: true,
            output_transcription: true,
            tools: Vec::new(),
        }
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Outbound traffic counters.
#[derive(Debug, Default)]
pub struct OutboundStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl OutboundStats {
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// Cloneable handle for writing to a remote channel.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<ClientMessage>,
    stats: Arc<OutboundStats>,
}

impl OutboundSender {
    pub fn new(tx: mpsc::Sender<ClientMessage>) -> Self {
        Self {
            tx,
            stats: Arc::new(OutboundStats::default()),
        }
    }

    /// Create a sender together with the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ClientMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn stats(&self) -> Arc<OutboundStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue one audio frame. Never blocks and never fails: under backpressure
    /// or after close the frame is dropped and counted.
    pub fn send_audio(&self, blob: TransportBlob) -> bool {
        let message = ClientMessage::Audio {
            mime: blob.mime,
            rate: blob.rate,
            data: blob.data,
        };
        match self.tx.try_send(message) {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(dropped, "outbound queue full, dropping audio frame");
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("channel closed, dropping audio frame");
                false
            }
        }
    }

    /// Queue typed text without waiting.
    pub fn send_text(&self, text: impl Into<String>) -> RealtimeResult<()> {
        self.tx
            .try_send(ClientMessage::Text { data: text.into() })
            .map_err(|e| match e {
                TrySendError::Full(_) => RealtimeError::QueueFull,
                TrySendError::Closed(_) => RealtimeError::ChannelClosed,
            })
    }

    /// Queue a tool response, waiting for queue space if needed.
    pub async fn send_tool_response(&self, response: ToolCallResponse) -> RealtimeResult<()> {
        self.tx
            .send(ClientMessage::ToolResponse {
                id: response.id,
                name: response.name,
                result: response.result,
            })
            .await
            .map_err(|_| RealtimeError::ChannelClosed)
    }
}

// =============================================================================
// Transport Traits
// =============================================================================

/// Where a channel delivers inbound events.
pub type EventSender = mpsc::Sender<SessionEvent>;

/// Opens remote channels.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Connect and declare `setup`.
    ///
    /// Returns once the transport is connected. Readiness is reported later as
    /// [`SessionEvent::Opened`] on `events`; everything received afterwards
    /// follows on the same queue, ending with `Closed` or `Errored`.
    async fn open(
        &self,
        setup: SessionSetup,
        events: EventSender,
    ) -> RealtimeResult<Box<dyn RemoteChannel>>;
}

/// One open channel.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    fn outbound(&self) -> OutboundSender;

    fn is_open(&self) -> bool;

    /// Close the channel. Safe to call more than once.
    async fn close(&mut self) -> RealtimeResult<()>;
}
