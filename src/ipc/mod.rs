//! IPC protocol types for talking to the presentation surface.
//!
//! Events use `{"event": "<name>", "data": {...}}` (core -> surface).
//! Commands use `{"command": "<name>", ...}` (surface -> core).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::visibility::VisibilityState;
use crate::wake_word::WakeWordStatus;

// ---------------------------------------------------------------------------
// Events: core -> surface (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the surface as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "kebab-case")]
pub enum HostEvent {
    Starting {},
    Ready {
        version: String,
    },
    /// Run the entrance animation.
    Appear {},
    /// Run the exit animation.
    Hide {},
    Visibility {
        state: VisibilityState,
    },
    WakeWordStatus {
        status: WakeWordStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Version {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<serde_json::Value>,
        version: String,
    },
    MicrophonePermission {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<serde_json::Value>,
        granted: bool,
    },
    Pong {},
    Error {
        message: String,
    },
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: surface -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the surface as JSON lines.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "kebab-case")]
pub enum SurfaceCommand {
    /// User clicked the companion away.
    Dismiss {},
    /// Assistant state reported by the surface (informational).
    StateChange { state: String },
    /// The surface detected the wake phrase on its own.
    WakeWordDetected {},
    GetVersion {
        #[serde(default)]
        id: Option<serde_json::Value>,
    },
    RequestMicrophonePermission {
        #[serde(default)]
        id: Option<serde_json::Value>,
    },
    Toggle {},
    Show {},
    #[serde(rename_all = "camelCase")]
    TakeBreak {
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    SetVolume { volume: f32 },
    /// Recognition transcript chunk.
    #[serde(rename_all = "camelCase")]
    Transcript {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    /// Recognition error code.
    RecognitionError { fault: String },
    /// Recognition stream closed on its own.
    RecognitionEnd {},
    /// The overlay window was destroyed.
    SurfaceClosed {},
    Ping {},
    Stop {},
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = HostEvent::Visibility {
            state: VisibilityState::Appearing,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "visibility", "data": {"state": "appearing"}})
        );

        let event = HostEvent::WakeWordStatus {
            status: WakeWordStatus::Failed,
            message: Some("microphone permission denied".into()),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "wake-word-status",
                "data": {"status": "failed", "message": "microphone permission denied"}
            })
        );

        assert_eq!(
            serde_json::to_value(HostEvent::Appear {}).unwrap(),
            json!({"event": "appear", "data": {}})
        );
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: SurfaceCommand = serde_json::from_str(r#"{"command":"dismiss"}"#).unwrap();
        assert_eq!(cmd, SurfaceCommand::Dismiss {});

        let cmd: SurfaceCommand =
            serde_json::from_str(r#"{"command":"take-break","durationMs":60000}"#).unwrap();
        assert_eq!(
            cmd,
            SurfaceCommand::TakeBreak {
                duration_ms: Some(60000)
            }
        );

        let cmd: SurfaceCommand =
            serde_json::from_str(r#"{"command":"transcript","text":"hey minion","isFinal":true}"#)
                .unwrap();
        assert_eq!(
            cmd,
            SurfaceCommand::Transcript {
                text: "hey minion".into(),
                is_final: true
            }
        );

        let cmd: SurfaceCommand =
            serde_json::from_str(r#"{"command":"get-version","id":7}"#).unwrap();
        assert_eq!(cmd, SurfaceCommand::GetVersion { id: Some(json!(7)) });
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_str::<SurfaceCommand>(r#"{"command":"dance"}"#).is_err());
    }
}
