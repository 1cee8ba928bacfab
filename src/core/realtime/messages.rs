//! Wire messages for the remote voice service.
//!
//! All messages are JSON text frames.
//!
//! # Protocol Overview
//!
//! Client messages (`kind` tag):
//! - setup - first frame after connect, declares the session
//! - audio - one capture frame
//! - text - typed input
//! - toolResponse - answer to one tool call request
//!
//! Server events (`event` tag):
//! - setupComplete - channel ready, capture may begin
//! - interrupted - user barged in, silence playback
//! - inputTranscriptionDelta / outputTranscriptionDelta - partial transcripts
//! - audioDelta - synthesized audio chunk
//! - toolCall - batch of tool call requests
//! - turnComplete - end of turn
//! - error - service error
//! - close - service is closing the session

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::base::{RealtimeError, SessionSetup, TranscriptRole};
use crate::core::session::SessionEvent;
use crate::core::tools::ToolCallRequest;

/// Messages sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Setup(SessionSetup),
    Audio {
        mime: String,
        rate: u32,
        data: String,
    },
    Text {
        data: String,
    },
    ToolResponse {
        id: String,
        name: String,
        result: Value,
    },
}

impl ClientMessage {
    /// Tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::Audio { .. } => "audio",
            ClientMessage::Text { .. } => "text",
            ClientMessage::ToolResponse { .. } => "toolResponse",
        }
    }
}

/// Events received from the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    SetupComplete,
    Interrupted,
    InputTranscriptionDelta {
        text: String,
    },
    OutputTranscriptionDelta {
        text: String,
    },
    AudioDelta {
        mime: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rate: Option<u32>,
        data: String,
    },
    ToolCall {
        requests: Vec<ToolCallRequest>,
    },
    TurnComplete,
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<Value>,
    },
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ServerMessage {
    /// Tag used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::SetupComplete => "setupComplete",
            ServerMessage::Interrupted => "interrupted",
            ServerMessage::InputTranscriptionDelta { .. } => "inputTranscriptionDelta",
            ServerMessage::OutputTranscriptionDelta { .. } => "outputTranscriptionDelta",
            ServerMessage::AudioDelta { .. } => "audioDelta",
            ServerMessage::ToolCall { .. } => "toolCall",
            ServerMessage::TurnComplete => "turnComplete",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Close { .. } => "close",
        }
    }
}

impl From<ServerMessage> for SessionEvent {
    fn from(message: ServerMessage) -> Self {
        match message {
            ServerMessage::SetupComplete => SessionEvent::Opened,
            ServerMessage::Interrupted => SessionEvent::Interrupted,
            ServerMessage::InputTranscriptionDelta { text } => SessionEvent::TranscriptDelta {
                role: TranscriptRole::User,
                text,
            },
            ServerMessage::OutputTranscriptionDelta { text } => SessionEvent::TranscriptDelta {
                role: TranscriptRole::Assistant,
                text,
            },
            ServerMessage::AudioDelta { mime, rate, data } => {
                SessionEvent::AudioDelta { mime, rate, data }
            }
            ServerMessage::ToolCall { requests } => SessionEvent::ToolCall(requests),
            ServerMessage::TurnComplete => SessionEvent::TurnComplete,
            ServerMessage::Error { message, code } => {
                let detail = match code {
                    Some(Value::String(code)) => format!("{code}: {message}"),
                    Some(code) => format!("{code}: {message}"),
                    None => message,
                };
                SessionEvent::Errored(RealtimeError::ProviderError(detail))
            }
            ServerMessage::Close { reason } => SessionEvent::Closed(reason),
        }
    }
}
