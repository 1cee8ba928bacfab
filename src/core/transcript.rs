//! Turn reconstruction from transcription deltas.

use serde::{Deserialize, Serialize};

use crate::core::realtime::TranscriptRole;

/// Sentinel used for the user side of a turn that was spoken, not typed,
/// when no input transcription arrived.
pub const DEFAULT_VOICE_INPUT_PLACEHOLDER: &str = "[voice message]";

/// One finalized exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePair {
    pub user: String,
    pub ai: String,
}

/// Accumulates per-role text until the remote side closes the turn.
#[derive(Debug, Clone)]
pub struct TranscriptAggregator {
    user: String,
    assistant: String,
    placeholder: String,
}

impl Default for TranscriptAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_VOICE_INPUT_PLACEHOLDER)
    }
}

impl TranscriptAggregator {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            user: String::new(),
            assistant: String::new(),
            placeholder: placeholder.into(),
        }
    }

    /// Concatenate `fragment` onto the in-progress buffer for `role`.
    pub fn append(&mut self, role: TranscriptRole, fragment: &str) {
        match role {
            TranscriptRole::User => self.user.push_str(fragment),
            TranscriptRole::Assistant => self.assistant.push_str(fragment),
        }
    }

    pub fn pending(&self, role: TranscriptRole) -> &str {
        match role {
            TranscriptRole::User => &self.user,
            TranscriptRole::Assistant => &self.assistant,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.assistant.is_empty()
    }

    /// Close the current turn.
    ///
    /// Emits a pair only when the assistant said something. Both buffers are
    /// empty afterwards, whatever the outcome.
    pub fn commit(&mut self) -> Option<MessagePair> {
        let user = std::mem::take(&mut self.user);
        let ai = std::mem::take(&mut self.assistant);

        if ai.is_empty() {
            if !user.is_empty() {
                tracing::debug!(
                    chars = user.len(),
                    "turn completed without assistant text, dropping user transcript"
                );
            }
            return None;
        }

        let user = if user.is_empty() {
            self.placeholder.clone()
        } else {
            user
        };
        Some(MessagePair { user, ai })
    }

    /// Discard both buffers without emitting anything.
    pub fn clear(&mut self) {
        self.user.clear();
        self.assistant.clear();
    }
}
