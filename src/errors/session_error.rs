use thiserror::Error;

use crate::core::device::DeviceError;
use crate::core::realtime::RealtimeError;
use crate::core::session::SessionState;

/// Errors surfaced to the application by the session lifecycle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone access refused. Fatal for this attempt, never retried.
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device error: {0}")]
    Device(DeviceError),

    /// Handshake or transport failure on the remote channel.
    #[error("Channel error: {0}")]
    Channel(#[from] RealtimeError),

    #[error("A session is already active (state: {0})")]
    AlreadyActive(SessionState),

    #[error("No live session")]
    NotLive,

    #[error("Session start was cancelled")]
    Cancelled,
}

impl From<DeviceError> for SessionError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied(reason) => SessionError::PermissionDenied(reason),
            other => SessionError::Device(other),
        }
    }
}

impl SessionError {
    /// Whether calling `start()` again may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Channel(_) | SessionError::Cancelled)
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_maps_through() {
        let err: SessionError = DeviceError::PermissionDenied("user refused".to_string()).into();
        assert!(matches!(err, SessionError::PermissionDenied(_)));
        assert!(!err.is_retryable());

        let err: SessionError = DeviceError::Unavailable("no input".to_string()).into();
        assert!(matches!(err, SessionError::Device(DeviceError::Unavailable(_))));
    }

    #[test]
    fn test_display() {
        let err = SessionError::AlreadyActive(SessionState::Live);
        assert_eq!(err.to_string(), "A session is already active (state: live)");
        assert!(SessionError::Channel(RealtimeError::NotConnected).is_retryable());
    }
}
