//! Conversation personas.

use serde::{Deserialize, Serialize};

use crate::core::realtime::SessionSetup;
use crate::core::tools::ToolCallDispatcher;

const COMPANION_INSTRUCTIONS: &str = "You are a warm, patient companion. \
Speak naturally and briefly, listen more than you talk, and ask gentle follow-up \
questions about the person's day, memories and the people in their life.";

const INTERVIEWER_INSTRUCTIONS: &str = "You are a kind family-history interviewer. \
Help the person tell the story of their life one memory at a time. Ask one \
question at a time and let them finish. Whenever they share a concrete fact \
about their life, a person, a place or an event, call the record_memory tool \
with that fact before moving on.";

/// Who the assistant is for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub name: String,

    /// System instructions declared at session open
    pub instructions: String,

    /// Voice identity; falls back to the configured default
    #[serde(default)]
    pub voice: Option<String>,

    /// Sent as typed input once the session is live, so the assistant speaks first
    #[serde(default)]
    pub opening_prompt: Option<String>,

    /// Declare registered tools to the remote service
    #[serde(default)]
    pub tools_enabled: bool,
}

impl PersonaConfig {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            voice: None,
            opening_prompt: None,
            tools_enabled: false,
        }
    }

    /// Free-form chat.
    pub fn companion() -> Self {
        Self {
            opening_prompt: Some("Say hello and ask how my day is going.".to_string()),
            ..Self::new("companion", COMPANION_INSTRUCTIONS)
        }
    }

    /// Guided interview that records facts with `record_memory`.
    pub fn interviewer() -> Self {
        Self {
            opening_prompt: Some(
                "Introduce yourself and ask me where I grew up.".to_string(),
            ),
            tools_enabled: true,
            ..Self::new("interviewer", INTERVIEWER_INSTRUCTIONS)
        }
    }

    /// Look up a built-in preset by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "companion" => Some(Self::companion()),
            "interviewer" => Some(Self::interviewer()),
            _ => None,
        }
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &["companion", "interviewer"]
    }

    /// Build the setup frame declared when the channel opens.
    pub fn session_setup(
        &self,
        model: Option<&str>,
        default_voice: Option<&str>,
        tools: &ToolCallDispatcher,
    ) -> SessionSetup {
        let mut setup = SessionSetup::new(self.instructions.clone());
        setup.model = model.map(str::to_string);
        setup.voice = self
            .voice
            .as_deref()
            .or(default_voice)
            .map(str::to_string);
        if self.tools_enabled {
            setup.tools = tools.declarations();
        }
        setup
    }
}
