//! Continuous wake-phrase listening.
//!
//! `Idle -> Initializing -> Listening <-> Cooldown`, with `ErrorBackoff` on
//! transient faults and a terminal `Failed`. Each listening run is a tokio
//! task owning a `CancellationToken`; every restart path checks the token,
//! and `stop_listening()` waits for the task to finish, so no match callback
//! can fire after it returns.

pub mod matcher;
pub mod recognizer;
pub mod session;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CompanionConfig, MatchMode};
use crate::error::{PresenceError, Result};

pub use matcher::PhraseMatcher;
pub use recognizer::{
    fault_from_code, ChannelRecognizer, RecognitionEvent, RecognitionStream, SpeechRecognizer,
};
pub use session::{WakeWordSession, WakeWordStatus};

/// Backoff grows linearly with the attempt count up to this many steps.
const MAX_BACKOFF_STEPS: u32 = 4;

/// Streams that end this many times in a row without any event are
/// treated as a transient fault.
const MAX_EMPTY_RESTARTS: u32 = 3;

/// Called with the matched phrase. Must not call back into the engine's
/// `stop_listening()`/`release()`.
pub type MatchCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Engine timing and phrases.
#[derive(Debug, Clone)]
pub struct WakeWordSettings {
    pub phrases: Vec<String>,
    pub match_mode: MatchMode,
    pub cooldown: Duration,
    pub error_backoff: Duration,
}

impl WakeWordSettings {
    pub fn from_config(config: &CompanionConfig) -> Self {
        Self {
            phrases: config.wake_phrases.clone(),
            match_mode: config.match_mode,
            cooldown: config.cooldown(),
            error_backoff: config.error_backoff(),
        }
    }
}

/// Restart delay for the given consecutive-fault count.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * attempt.clamp(1, MAX_BACKOFF_STEPS)
}

enum RunOutcome {
    Cancelled,
    Matched,
    Ended { received: bool },
    Fault(PresenceError),
}

struct Shared {
    recognizer: Arc<dyn SpeechRecognizer>,
    matcher: PhraseMatcher,
    cooldown: Duration,
    error_backoff: Duration,
    session: Mutex<WakeWordSession>,
    status_tx: watch::Sender<WakeWordStatus>,
    callback: Mutex<Option<MatchCallback>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Cheaply cloneable handle to the wake-word engine.
#[derive(Clone)]
pub struct WakeWordEngine {
    shared: Arc<Shared>,
}

impl WakeWordEngine {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, settings: WakeWordSettings) -> Self {
        let (status_tx, _) = watch::channel(WakeWordStatus::Idle);
        Self {
            shared: Arc::new(Shared {
                recognizer,
                matcher: PhraseMatcher::new(&settings.phrases, settings.match_mode),
                cooldown: settings.cooldown,
                error_backoff: settings.error_backoff,
                session: Mutex::new(WakeWordSession::new()),
                status_tx,
                callback: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> WakeWordStatus {
        self.shared.session().status
    }

    /// Snapshot of the session record.
    pub fn session(&self) -> WakeWordSession {
        self.shared.session().clone()
    }

    /// Status change notifications.
    pub fn watch_status(&self) -> watch::Receiver<WakeWordStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Check capability and microphone access, and register `on_match`.
    ///
    /// Returns `false` and moves to `Failed` when recognition is unsupported
    /// or access is refused. A failed engine never prompts again.
    pub async fn initialize<F>(&self, on_match: F) -> bool
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        match self.status() {
            WakeWordStatus::Failed => {
                debug!("Wake word engine already failed, not retrying");
                return false;
            }
            WakeWordStatus::Idle => {}
            status => {
                debug!(%status, "Wake word engine already initialized");
                return true;
            }
        }

        if self.shared.matcher.is_empty() {
            warn!("No wake phrases configured, wake word disabled");
            self.shared.fail(PresenceError::Config("no wake phrases".into()));
            return false;
        }

        if !self.shared.recognizer.is_supported() {
            self.shared.fail(PresenceError::CapabilityUnavailable(
                "speech recognition".into(),
            ));
            return false;
        }

        if let Err(e) = self.shared.recognizer.request_permission().await {
            // Any failure here is final: re-asking would re-prompt the user.
            self.shared.fail(e);
            return false;
        }

        *self.shared.callback() = Some(Arc::new(on_match));
        self.shared.set_status(WakeWordStatus::Initializing);
        let phrases: Vec<&str> = self.shared.matcher.phrases().collect();
        info!(?phrases, "Wake word engine initialized");
        true
    }

    /// Open the recognition stream and start the session task.
    pub fn start_listening(&self) -> bool {
        let mut task = self.shared.task();
        if task.is_some() {
            debug!("Wake word session already running");
            return false;
        }
        if self.shared.callback().is_none() {
            debug!("start_listening() before initialize()");
            return false;
        }
        if self.status() == WakeWordStatus::Failed {
            return false;
        }

        let token = CancellationToken::new();
        let first = match self.shared.recognizer.start() {
            Ok(stream) => {
                self.shared.set_status(WakeWordStatus::Listening);
                Ok(stream)
            }
            Err(e) if e.is_terminal() => {
                self.shared.fail(e);
                return false;
            }
            Err(e) => {
                // The session task backs off before the next attempt.
                warn!("Recognition failed to start: {}", e);
                self.shared.set_status(WakeWordStatus::ErrorBackoff);
                Err(e)
            }
        };

        let shared = Arc::clone(&self.shared);
        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            shared.run(run_token, first).await;
        });
        *task = Some((token, handle));
        info!("Wake word detection started");
        true
    }

    /// Stop the session task and release the recognition stream.
    ///
    /// Idempotent. Once this returns, no match callback fires and no
    /// stream is open.
    pub async fn stop_listening(&self) {
        let task = self.shared.task().take();
        let Some((token, handle)) = task else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            debug!("Wake word task ended abnormally: {}", e);
        }

        let mut session = self.shared.session();
        session.cooldown_until = None;
        session.restart_attempt = 0;
        if session.status != WakeWordStatus::Failed {
            session.status = WakeWordStatus::Idle;
            self.shared.status_tx.send_replace(WakeWordStatus::Idle);
        }
        info!("Wake word detection stopped");
    }

    /// Stop listening and drop the match callback. Idempotent.
    pub async fn release(&self) {
        self.stop_listening().await;
        if self.shared.callback().take().is_some() {
            debug!("Wake word engine released");
        }
    }
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, WakeWordSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn callback(&self) -> MutexGuard<'_, Option<MatchCallback>> {
        self.callback.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn task(&self) -> MutexGuard<'_, Option<(CancellationToken, JoinHandle<()>)>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: WakeWordStatus) {
        let mut session = self.session();
        if session.status == status {
            return;
        }
        debug!(from = %session.status, to = %status, "Wake word status");
        session.status = status;
        if status != WakeWordStatus::Cooldown {
            session.cooldown_until = None;
        }
        self.status_tx.send_replace(status);
    }

    /// Status write from the session task; ignored once cancelled.
    fn set_status_for(&self, token: &CancellationToken, status: WakeWordStatus) -> bool {
        if token.is_cancelled() {
            return false;
        }
        self.set_status(status);
        true
    }

    fn fail(&self, error: PresenceError) {
        warn!("Wake word detection unavailable: {}", error);
        let mut session = self.session();
        session.failure = Some(error);
        session.cooldown_until = None;
        session.status = WakeWordStatus::Failed;
        self.status_tx.send_replace(WakeWordStatus::Failed);
    }

    async fn run(self: Arc<Self>, token: CancellationToken, first: Result<RecognitionStream>) {
        let mut pending = Some(first);
        let mut empty_ends = 0u32;

        loop {
            if token.is_cancelled() {
                return;
            }

            let opened = match pending.take() {
                Some(opened) => opened,
                None => {
                    let opened = self.recognizer.start();
                    if opened.is_ok() && !self.set_status_for(&token, WakeWordStatus::Listening) {
                        return;
                    }
                    opened
                }
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) => {
                    if !self.absorb_fault(e, &token).await {
                        return;
                    }
                    continue;
                }
            };

            let outcome = self.listen(&mut stream, &token).await;
            // Release capture before cooling down or backing off.
            drop(stream);

            match outcome {
                RunOutcome::Cancelled => return,
                RunOutcome::Matched => {
                    empty_ends = 0;
                    if !self.set_status_for(&token, WakeWordStatus::Cooldown) {
                        return;
                    }
                    self.session().cooldown_until =
                        Some(tokio::time::Instant::now() + self.cooldown);
                    if !sleep_or_cancel(self.cooldown, &token).await {
                        return;
                    }
                }
                RunOutcome::Ended { received } => {
                    empty_ends = if received { 0 } else { empty_ends + 1 };
                    if empty_ends >= MAX_EMPTY_RESTARTS {
                        empty_ends = 0;
                        let fault = PresenceError::TransientRecognitionFault(
                            "stream keeps ending immediately".into(),
                        );
                        if !self.absorb_fault(fault, &token).await {
                            return;
                        }
                    } else {
                        debug!("Recognition stream ended, restarting");
                    }
                }
                RunOutcome::Fault(e) => {
                    if !self.absorb_fault(e, &token).await {
                        return;
                    }
                }
            }
        }
    }

    /// Handle a fault. Returns `true` when the session should restart.
    async fn absorb_fault(&self, error: PresenceError, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        if error.is_terminal() {
            self.fail(error);
            return false;
        }

        let attempt = {
            let mut session = self.session();
            session.restart_attempt += 1;
            session.restart_attempt
        };
        let delay = backoff_delay(self.error_backoff, attempt);
        let delay_ms = delay.as_millis() as u64;
        debug!(attempt, delay_ms, "Recognition fault: {}", error);
        if !self.set_status_for(token, WakeWordStatus::ErrorBackoff) {
            return false;
        }
        sleep_or_cancel(delay, token).await
    }

    async fn listen(&self, stream: &mut RecognitionStream, token: &CancellationToken) -> RunOutcome {
        let mut received = false;
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return RunOutcome::Cancelled,
                event = stream.next_event() => event,
            };

            match event {
                Some(RecognitionEvent::Transcript { text, is_final }) => {
                    received = true;
                    self.session().restart_attempt = 0;
                    let Some(phrase) = self.matcher.find(&text) else {
                        continue;
                    };
                    info!(phrase, is_final, transcript = %text, "Wake phrase detected");
                    if !self.dispatch(phrase, token) {
                        return RunOutcome::Cancelled;
                    }
                    return RunOutcome::Matched;
                }
                Some(RecognitionEvent::Fault(e)) => return RunOutcome::Fault(e),
                Some(RecognitionEvent::Ended) | None => return RunOutcome::Ended { received },
            }
        }
    }

    /// Invoke the match callback unless the run was cancelled.
    fn dispatch(&self, phrase: &str, token: &CancellationToken) -> bool {
        let callback = self.callback().clone();
        match callback {
            Some(cb) if !token.is_cancelled() => {
                cb(phrase);
                true
            }
            _ => {
                debug!("Match after stop, dropped");
                false
            }
        }
    }
}

/// Sleep unless cancelled first. Returns `true` if the full delay elapsed.
async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
