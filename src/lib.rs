//! Real-time bidirectional voice sessions.
//!
//! Microphone audio is encoded into fixed-size frames and streamed to a remote
//! conversational voice service; synthesized audio coming back is scheduled for
//! gapless playback, partial transcripts are assembled into finished turns, and
//! tool calls raised mid-turn are answered locally.
//!
//! The entry point is [`SessionLifecycleManager`], which owns the microphone,
//! both audio device contexts and the remote channel of the one live session.

pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use config::VoiceConfig;
pub use core::*;
pub use errors::{SessionError, SessionResult};
