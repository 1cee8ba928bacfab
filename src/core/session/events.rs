//! The tagged union consumed by the session loop.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;

use crate::core::device::{SourceEndedSender, SourceId};
use crate::core::realtime::{EventSender, RealtimeError, TranscriptRole};
use crate::core::tools::ToolCallRequest;

/// Everything the session loop reacts to, in arrival order.
///
/// The remote channel, the playback device and the application all feed the
/// same queue, so one consumer sees one totally ordered stream.
#[derive(Debug)]
pub enum SessionEvent {
    /// Remote side confirmed the session setup
    Opened,
    /// Encoded audio chunk to decode and schedule
    AudioDelta {
        mime: String,
        rate: Option<u32>,
        data: String,
    },
    /// Partial transcript for one role
    TranscriptDelta { role: TranscriptRole, text: String },
    /// Batch of tool call requests
    ToolCall(Vec<ToolCallRequest>),
    /// End of turn
    TurnComplete,
    /// User barged in
    Interrupted,
    /// Channel failure or remote error event
    Errored(RealtimeError),
    /// Remote side closed the channel
    Closed(Option<String>),
    /// A playback source finished naturally
    SourceEnded(SourceId),
    /// Text the user typed while live
    LocalText(String),
}

impl SessionEvent {
    /// Tag used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Opened => "opened",
            SessionEvent::AudioDelta { .. } => "audio_delta",
            SessionEvent::TranscriptDelta { .. } => "transcript_delta",
            SessionEvent::ToolCall(_) => "tool_call",
            SessionEvent::TurnComplete => "turn_complete",
            SessionEvent::Interrupted => "interrupted",
            SessionEvent::Errored(_) => "errored",
            SessionEvent::Closed(_) => "closed",
            SessionEvent::SourceEnded(_) => "source_ended",
            SessionEvent::LocalText(_) => "local_text",
        }
    }
}

/// Completion callback for a playback device that posts onto the session queue.
///
/// Runs on the audio thread, so it only ever `try_send`s. A lost notification
/// is recovered by the scheduler's reaping of expired sources.
pub fn source_ended_sender(events: EventSender) -> SourceEndedSender {
    Arc::new(move |id: SourceId| match events.try_send(SessionEvent::SourceEnded(id)) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::debug!(source = id, "event queue full, dropping source completion");
        }
        Err(TrySendError::Closed(_)) => {}
    })
}
