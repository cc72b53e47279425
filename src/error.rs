//! Error taxonomy of the live session core.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    /// Microphone access denied, or no capture capability on this platform.
    CaptureUnavailable(String),
    /// The connection failed before the session reached OPEN.
    SessionOpenFailure(String),
    /// A realtime-input send failed after the session was open. Non-fatal.
    TransmitFailure(String),
    /// A malformed inline audio chunk. Non-fatal, the chunk is skipped.
    DecodeFailure(String),
    /// Reported by the session's error callback.
    SessionError(String),
}

impl LiveError {
    /// Fatal errors end the session; the others are logged and the session goes on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LiveError::TransmitFailure(_) | LiveError::DecodeFailure(_))
    }
}

impl fmt::Display for LiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveError::CaptureUnavailable(msg) => write!(f, "Microphone unavailable: {}", msg),
            LiveError::SessionOpenFailure(msg) => write!(f, "Failed to open live session: {}", msg),
            LiveError::TransmitFailure(msg) => write!(f, "Failed to send audio: {}", msg),
            LiveError::DecodeFailure(msg) => write!(f, "Failed to decode audio chunk: {}", msg),
            LiveError::SessionError(msg) => write!(f, "Live session error: {}", msg),
        }
    }
}

impl std::error::Error for LiveError {}
