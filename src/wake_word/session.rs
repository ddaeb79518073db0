//! Wake-word session status.

use serde::Serialize;
use tokio::time::Instant;

use crate::error::PresenceError;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeWordStatus {
    /// Not initialized, or stopped.
    Idle,
    /// Capability checked and microphone granted; not yet listening.
    Initializing,
    /// Recognition stream open, transcripts are matched.
    Listening,
    /// Stream stopped after a match; restarts when the window elapses.
    Cooldown,
    /// Stream stopped after a transient fault; restarts after a delay.
    ErrorBackoff,
    /// Permission denied or capability missing. Terminal.
    Failed,
}

impl WakeWordStatus {
    /// A session task owns a recognition run in these states.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Listening | Self::Cooldown | Self::ErrorBackoff)
    }
}

impl std::fmt::Display for WakeWordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Initializing => write!(f, "initializing"),
            Self::Listening => write!(f, "listening"),
            Self::Cooldown => write!(f, "cooldown"),
            Self::ErrorBackoff => write!(f, "error_backoff"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable session record. Only the engine writes it.
#[derive(Debug, Clone)]
pub struct WakeWordSession {
    pub status: WakeWordStatus,
    pub cooldown_until: Option<Instant>,
    /// Consecutive transient faults since the last transcript.
    pub restart_attempt: u32,
    /// Reason for `Failed`.
    pub failure: Option<PresenceError>,
}

impl WakeWordSession {
    pub fn new() -> Self {
        Self {
            status: WakeWordStatus::Idle,
            cooldown_until: None,
            restart_attempt: 0,
            failure: None,
        }
    }
}

impl Default for WakeWordSession {
    fn default() -> Self {
        Self::new()
    }
}
