//! Application-facing session callbacks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use super::SessionState;
use crate::core::realtime::{RealtimeError, TranscriptRole};
use crate::core::tools::{ToolCallRequest, ToolCallResponse};
use crate::core::transcript::MessagePair;

/// One partial transcript fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptUpdate {
    pub role: TranscriptRole,
    pub text: String,
}

/// A tool call and the response sent for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub request: ToolCallRequest,
    pub response: ToolCallResponse,
}

/// Callback type for transcript deltas.
pub type TranscriptDeltaCallback =
    Arc<dyn Fn(TranscriptUpdate) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for finalized turns.
pub type MessageCommittedCallback =
    Arc<dyn Fn(MessagePair) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for "assistant audio is playing" transitions.
pub type VocalIntensityCallback =
    Arc<dyn Fn(bool) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for answered tool calls.
pub type ToolEventCallback =
    Arc<dyn Fn(ToolEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for lifecycle transitions.
pub type StateChangeCallback =
    Arc<dyn Fn(SessionState) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for mid-session channel errors.
pub type SessionErrorCallback =
    Arc<dyn Fn(RealtimeError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Registered callbacks. Snapshotted when a session starts.
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    pub on_transcript_delta: Option<TranscriptDeltaCallback>,
    pub on_message_committed: Option<MessageCommittedCallback>,
    pub on_vocal_intensity_change: Option<VocalIntensityCallback>,
    pub on_tool_event: Option<ToolEventCallback>,
    pub on_state_change: Option<StateChangeCallback>,
    pub on_error: Option<SessionErrorCallback>,
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_transcript_delta", &self.on_transcript_delta.is_some())
            .field("on_message_committed", &self.on_message_committed.is_some())
            .field("on_vocal_intensity_change", &self.on_vocal_intensity_change.is_some())
            .field("on_tool_event", &self.on_tool_event.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Reports speaking transitions exactly once each, whoever observes them.
#[derive(Clone)]
pub(crate) struct SpeakingNotifier {
    last: Arc<AtomicBool>,
    callback: Option<VocalIntensityCallback>,
}

impl SpeakingNotifier {
    pub(crate) fn new(callback: Option<VocalIntensityCallback>) -> Self {
        Self {
            last: Arc::new(AtomicBool::new(false)),
            callback,
        }
    }

    pub(crate) async fn set(&self, speaking: bool) {
        if self.last.swap(speaking, Ordering::SeqCst) == speaking {
            return;
        }
        tracing::debug!(speaking, "vocal intensity changed");
        if let Some(cb) = &self.callback {
            cb(speaking).await;
        }
    }
}
