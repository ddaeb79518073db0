//! Error taxonomy for the presence core.
//!
//! Only the terminal wake-word failures ever reach the presentation surface.
//! Everything else is absorbed by the component that produced it.

use thiserror::Error;

/// Result type alias for presence-core operations.
pub type Result<T> = std::result::Result<T, PresenceError>;

/// Errors produced inside the presence core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PresenceError {
    /// Microphone access was refused. Terminal for the wake-word session.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// The platform lacks speech recognition or audio capture/output.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// No-speech timeout, capture glitch and similar recoverable faults.
    #[error("transient recognition fault: {0}")]
    TransientRecognitionFault(String),

    /// A sound file is missing, corrupt or too slow to load.
    #[error("failed to load sound asset {filename}: {reason}")]
    AssetLoadFailure { filename: String, reason: String },

    /// A deferred callback outlived the session or generation that armed it.
    #[error("stale callback (generation {0})")]
    StaleCallback(u64),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error (message only, so the error stays `Clone`).
    #[error("io error: {0}")]
    Io(String),
}

impl PresenceError {
    /// Terminal errors end the wake-word session and are never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::CapabilityUnavailable(_)
        )
    }

    pub(crate) fn asset(filename: &str, reason: impl Into<String>) -> Self {
        Self::AssetLoadFailure {
            filename: filename.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for PresenceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
