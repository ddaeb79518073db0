//! IPC bridge: line reader thread and JSON-line event emitters.
//!
//! A blocking reader thread deserializes commands and forwards them through
//! an mpsc channel. Events go out through an `EventEmitter` so the
//! coordinator can be driven without a real stdout.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{HostEvent, SurfaceCommand};

/// Destination for outbound events.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: HostEvent);
}

/// Writes events as JSON lines on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutEmitter;

impl EventEmitter for StdoutEmitter {
    fn emit(&self, event: HostEvent) {
        emit_event(&event);
    }
}

/// Forwards events into a channel.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: HostEvent) {
        let _ = self.tx.send(event);
    }
}

/// Emit a `HostEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &HostEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Pipe may be closed.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

/// Convenience helper for emitting error events.
pub fn emit_error(message: &str) {
    emit_event(&HostEvent::Error {
        message: message.to_string(),
    });
}

/// If the line has a `"type"` field but no `"command"` field, rename it so
/// the tagged enum can deserialize it.
fn normalize_command_json(input: &str) -> String {
    if let Ok(mut obj) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(input)
    {
        if !obj.contains_key("command") {
            if let Some(type_val) = obj.remove("type") {
                obj.insert("command".to_string(), type_val);
                if let Ok(json) = serde_json::to_string(&obj) {
                    return json;
                }
            }
        }
    }
    input.to_string()
}

/// Parse one inbound line.
pub fn parse_command_line(line: &str) -> Result<SurfaceCommand, serde_json::Error> {
    serde_json::from_str(&normalize_command_json(line))
}

/// Spawn a blocking thread that reads command lines from `reader` and
/// forwards them through the returned channel.
///
/// The thread exits at EOF (parent process gone), on a read error, or when
/// the receiver is dropped.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<SurfaceCommand>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(text) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match parse_command_line(trimmed) {
                        Ok(cmd) => {
                            debug!(?cmd, "Received command from surface");
                            if tx.send(cmd).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Invalid JSON command: {} (input: {})", e, trimmed);
                            emit_error(&format!("Invalid JSON command: {}", e));
                        }
                    }
                }
                Err(e) => {
                    error!("Input read error: {}", e);
                    break;
                }
            }
        }
        debug!("Command reader thread exiting");
    });

    rx
}

/// Read commands from stdin.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<SurfaceCommand> {
    // `StdinLock` is not `Send`; buffer the handle and lock per read.
    spawn_line_reader(io::BufReader::new(io::stdin()))
}
