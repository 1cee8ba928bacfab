pub mod audio;
pub mod device;
pub mod playback;
pub mod realtime;
pub mod session;
pub mod tools;
pub mod transcript;

// Re-export commonly used types for convenience
pub use audio::{CaptureFrame, FrameEncoder, PlaybackChunk, TransportBlob};

pub use device::{AudioHost, CaptureContext, DeviceError, MicrophoneStream, PlaybackDevice};
#[cfg(feature = "audio-device")]
pub use device::CpalAudioHost;

pub use playback::{PlaybackScheduler, ScheduledSource};

pub use realtime::{
    RealtimeError, RealtimeResult, RealtimeTransport, RemoteChannel, SessionSetup, TranscriptRole,
    WebSocketTransport,
};

pub use session::{
    PersonaConfig, SessionCallbacks, SessionEvent, SessionLifecycleManager, SessionSettings,
    SessionState, SessionStats, VoiceSession,
};

pub use tools::{MemoryNotebook, ToolCallDispatcher, ToolCallRequest, ToolCallResponse, ToolHandler};

pub use transcript::{MessagePair, TranscriptAggregator};
