//! Streaming speech-recognition primitive.
//!
//! A recognizer hands out one `RecognitionStream` per listening run. The
//! stream yields transcript chunks, faults and the natural end of the
//! stream. Dropping (or stopping) a stream releases its capture resources.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{PresenceError, Result};

/// One event from a recognition stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Interim or final transcript chunk.
    Transcript { text: String, is_final: bool },
    /// Recognition error reported by the engine.
    Fault(PresenceError),
    /// The engine closed the stream on its own.
    Ended,
}

/// Map an engine error code (Web Speech API style) onto the taxonomy.
pub fn fault_from_code(code: &str) -> PresenceError {
    match code {
        "not-allowed" | "service-not-allowed" | "permission-denied" => {
            PresenceError::PermissionDenied
        }
        "language-not-supported" | "unsupported" => {
            PresenceError::CapabilityUnavailable(format!("recognition: {code}"))
        }
        other => PresenceError::TransientRecognitionFault(other.to_string()),
    }
}

/// Active recognition run. Runs its stop hook exactly once, on `stop()` or
/// on drop.
pub struct RecognitionStream {
    events: mpsc::UnboundedReceiver<RecognitionEvent>,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl RecognitionStream {
    pub fn new<F>(events: mpsc::UnboundedReceiver<RecognitionEvent>, on_stop: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            events,
            on_stop: Some(Box::new(on_stop)),
        }
    }

    /// Next event; `None` once the producer side is gone.
    pub async fn next_event(&mut self) -> Option<RecognitionEvent> {
        self.events.recv().await
    }

    /// Stop capture and discard anything still queued.
    pub fn stop(&mut self) {
        if let Some(hook) = self.on_stop.take() {
            hook();
        }
        self.events.close();
    }
}

impl Drop for RecognitionStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Streaming recognition capability (dyn-compatible).
pub trait SpeechRecognizer: Send + Sync {
    /// Whether the platform offers streaming recognition at all.
    fn is_supported(&self) -> bool;

    /// Ask for microphone access. May prompt the user.
    fn request_permission(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Open a new recognition run.
    fn start(&self) -> Result<RecognitionStream>;
}

type ActiveSender = Arc<Mutex<Option<(u64, mpsc::UnboundedSender<RecognitionEvent>)>>>;

/// Recognizer fed from the outside.
///
/// The presentation surface runs the actual speech recognition and forwards
/// transcripts, errors and stream ends over IPC; `feed()` routes them into
/// the currently open stream. Events arriving while no stream is open are
/// dropped, which is how cooldown discards repeated utterances.
pub struct ChannelRecognizer {
    supported: bool,
    microphone_allowed: bool,
    active: ActiveSender,
    next_id: AtomicU64,
    starts: AtomicU32,
}

impl ChannelRecognizer {
    pub fn new(supported: bool, microphone_allowed: bool) -> Self {
        Self {
            supported,
            microphone_allowed,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
            starts: AtomicU32::new(0),
        }
    }

    /// Deliver an event to the open stream. Returns `false` if it was dropped.
    pub fn feed(&self, event: RecognitionEvent) -> bool {
        let guard = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => {
                debug!(?event, "No recognition stream open, event dropped");
                false
            }
        }
    }

    /// Whether a stream is currently open (capture held).
    pub fn is_streaming(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Number of streams opened so far.
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::Acquire)
    }
}

impl SpeechRecognizer for ChannelRecognizer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn request_permission(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.microphone_allowed {
                Ok(())
            } else {
                Err(PresenceError::PermissionDenied)
            }
        })
    }

    fn start(&self) -> Result<RecognitionStream> {
        if !self.supported {
            return Err(PresenceError::CapabilityUnavailable(
                "speech recognition".into(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut guard = self.active.lock().unwrap_or_else(|e| e.into_inner());
            // Replacing the sender ends any previous stream.
            *guard = Some((id, tx));
        }
        self.starts.fetch_add(1, Ordering::AcqRel);
        debug!(stream = id, "Recognition stream opened");

        let active = Arc::clone(&self.active);
        Ok(RecognitionStream::new(rx, move || {
            let mut guard = active.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(guard.as_ref(), Some((current, _)) if *current == id) {
                *guard = None;
                debug!(stream = id, "Recognition stream closed");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_codes() {
        assert_eq!(fault_from_code("not-allowed"), PresenceError::PermissionDenied);
        assert!(fault_from_code("language-not-supported").is_terminal());
        assert_eq!(
            fault_from_code("no-speech"),
            PresenceError::TransientRecognitionFault("no-speech".into())
        );
    }

    #[tokio::test]
    async fn test_feed_routes_to_open_stream() {
        let rec = ChannelRecognizer::new(true, true);
        assert!(!rec.feed(RecognitionEvent::Ended));

        let mut stream = rec.start().unwrap();
        assert!(rec.is_streaming());
        assert!(rec.feed(RecognitionEvent::Transcript {
            text: "hi".into(),
            is_final: true
        }));
        assert_eq!(
            stream.next_event().await,
            Some(RecognitionEvent::Transcript {
                text: "hi".into(),
                is_final: true
            })
        );
    }

    #[tokio::test]
    async fn test_drop_releases_capture() {
        let rec = ChannelRecognizer::new(true, true);
        let stream = rec.start().unwrap();
        drop(stream);
        assert!(!rec.is_streaming());
        assert!(!rec.feed(RecognitionEvent::Ended));
    }

    #[tokio::test]
    async fn test_old_stream_drop_keeps_new_stream() {
        let rec = ChannelRecognizer::new(true, true);
        let old = rec.start().unwrap();
        let _new = rec.start().unwrap();
        drop(old);
        assert!(rec.is_streaming());
        assert_eq!(rec.starts(), 2);
    }

    #[tokio::test]
    async fn test_permission_and_support() {
        let denied = ChannelRecognizer::new(true, false);
        assert_eq!(
            denied.request_permission().await,
            Err(PresenceError::PermissionDenied)
        );
        let unsupported = ChannelRecognizer::new(false, true);
        assert!(!unsupported.is_supported());
        assert!(unsupported.start().is_err());
    }
}
