//! Remote conversational voice service.
//!
//! # Architecture
//!
//! - [`RealtimeTransport`] opens a [`RemoteChannel`] per session
//! - inbound traffic is delivered as `SessionEvent`s on the session queue
//! - outbound traffic goes through a cloneable [`OutboundSender`]
//! - [`WebSocketTransport`] speaks the JSON protocol in [`messages`]

mod base;
mod client;
pub mod messages;

pub use base::{
    EventSender, OutboundSender, OutboundStats, RealtimeError, RealtimeResult, RealtimeTransport,
    RemoteChannel, ResponseModality, SessionSetup, TranscriptRole,
};
pub use client::{WS_CHANNEL_CAPACITY, WebSocketTransport};
pub use messages::{ClientMessage, ServerMessage};
