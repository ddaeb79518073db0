//! Wires the trigger sources into the visibility state machine.
//!
//! `Coordinator` is the context object built once at process entry. It owns
//! every component; nothing reaches for global state. The run loop reacts to
//! surface commands, visibility events, wake-word matches and wake-word
//! status changes, and turns them into IPC events and sounds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::CompanionConfig;
use crate::ipc::bridge::{EventEmitter, StdoutEmitter};
use crate::ipc::{HostEvent, SurfaceCommand};
use crate::scheduler::{
    AlwaysAllow, InterruptionPolicy, IntervalSource, PresenceScheduler, SeededSource,
};
use crate::sound::{
    open_default_output, AssetLoader, AudioOutput, FileAssetLoader, SoundEffect, SoundSubsystem,
};
use crate::visibility::{HostSurface, VisibilityController, VisibilityEvent};
use crate::wake_word::{
    fault_from_code, ChannelRecognizer, RecognitionEvent, SpeechRecognizer, WakeWordEngine,
    WakeWordSettings, WakeWordStatus,
};

/// Version reported to the surface.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Injected collaborators. `native()` builds the production set.
pub struct Services {
    pub emitter: Arc<dyn EventEmitter>,
    pub audio: Arc<dyn AudioOutput>,
    pub assets: Arc<dyn AssetLoader>,
    pub intervals: Box<dyn IntervalSource>,
    pub chimes: Box<dyn IntervalSource>,
    pub policy: Arc<dyn InterruptionPolicy>,
    /// Whether the surface can run speech recognition.
    pub speech_supported: bool,
}

impl Services {
    pub fn native(config: &CompanionConfig) -> Self {
        Self {
            emitter: Arc::new(StdoutEmitter),
            audio: Arc::from(open_default_output()),
            assets: Arc::new(FileAssetLoader::new(config.resolved_sound_dir())),
            intervals: Box::new(SeededSource::from_entropy()),
            chimes: Box::new(SeededSource::from_entropy()),
            policy: Arc::new(AlwaysAllow),
            speech_supported: true,
        }
    }
}

pub struct Coordinator {
    config: CompanionConfig,
    emitter: Arc<dyn EventEmitter>,
    surface: Arc<HostSurface>,
    visibility: VisibilityController,
    scheduler: PresenceScheduler,
    recognizer: Arc<ChannelRecognizer>,
    wake_word: WakeWordEngine,
    sounds: Arc<SoundSubsystem>,
}

impl Coordinator {
    pub fn new(config: CompanionConfig, services: Services) -> Self {
        let config = config.normalized();

        let surface = Arc::new(HostSurface::new());
        let visibility = VisibilityController::new(
            surface.clone(),
            config.entrance_delay(),
            config.exit_delay(),
        );
        let scheduler = PresenceScheduler::new(
            visibility.clone(),
            config.min_interval_ms,
            config.max_interval_ms,
            services.intervals,
            services.policy,
        );
        let recognizer = Arc::new(ChannelRecognizer::new(
            services.speech_supported,
            config.microphone_allowed,
        ));
        let wake_word = WakeWordEngine::new(
            recognizer.clone(),
            WakeWordSettings::from_config(&config),
        );
        let sounds = Arc::new(SoundSubsystem::new(
            services.assets,
            services.audio,
            config.default_volume,
            config.asset_load_timeout(),
            services.chimes,
        ));

        Self {
            config,
            emitter: services.emitter,
            surface,
            visibility,
            scheduler,
            recognizer,
            wake_word,
            sounds,
        }
    }

    pub fn config(&self) -> &CompanionConfig {
        &self.config
    }

    pub fn visibility(&self) -> VisibilityController {
        self.visibility.clone()
    }

    pub fn scheduler(&self) -> PresenceScheduler {
        self.scheduler.clone()
    }

    pub fn wake_word(&self) -> WakeWordEngine {
        self.wake_word.clone()
    }

    pub fn recognizer(&self) -> Arc<ChannelRecognizer> {
        Arc::clone(&self.recognizer)
    }

    pub fn sounds(&self) -> Arc<SoundSubsystem> {
        Arc::clone(&self.sounds)
    }

    pub fn surface(&self) -> Arc<HostSurface> {
        Arc::clone(&self.surface)
    }

    /// Run until a `stop` command arrives or the command channel closes.
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<SurfaceCommand>) {
        self.emit(HostEvent::Starting {});

        let mut vis_rx = self.visibility.subscribe();
        let mut status_rx = self.wake_word.watch_status();
        let (cue_tx, mut cue_rx) = mpsc::unbounded_channel::<String>();

        self.start_wake_word(cue_tx).await;
        self.scheduler
            .start(Duration::from_millis(self.config.first_check_in_delay_ms));

        let initial_show = tokio::time::sleep(Duration::from_millis(
            self.config.initial_show_delay_ms.unwrap_or_default(),
        ));
        tokio::pin!(initial_show);
        let mut initial_pending = self.config.initial_show_delay_ms.is_some();

        self.emit(HostEvent::Ready {
            version: VERSION.to_string(),
        });
        info!("Presence core ready");

        let mut failure_reported = false;
        let mut vis_open = true;
        let mut status_open = true;
        // Reported before the loop if initialization already failed.
        self.report_wake_status(&mut status_rx, &mut failure_reported);

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }
                event = vis_rx.recv(), if vis_open => {
                    match event {
                        Ok(event) => self.on_visibility(event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(missed = n, "Visibility events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => vis_open = false,
                    }
                }
                changed = status_rx.changed(), if status_open => {
                    if changed.is_err() {
                        status_open = false;
                        continue;
                    }
                    self.report_wake_status(&mut status_rx, &mut failure_reported);
                }
                Some(phrase) = cue_rx.recv() => {
                    debug!(phrase = %phrase, "Wake phrase cue");
                    self.play(SoundEffect::WakeWordConfirm);
                }
                _ = &mut initial_show, if initial_pending => {
                    initial_pending = false;
                    self.visibility.show();
                }
            }
        }

        self.shutdown().await;
    }

    async fn start_wake_word(&self, cue_tx: mpsc::UnboundedSender<String>) {
        let visibility = self.visibility.clone();
        let initialized = self
            .wake_word
            .initialize(move |phrase: &str| {
                visibility.show();
                let _ = cue_tx.send(phrase.to_string());
            })
            .await;
        if initialized {
            self.wake_word.start_listening();
        }
    }

    /// Surface a terminal wake-word failure exactly once.
    fn report_wake_status(
        &self,
        status_rx: &mut watch::Receiver<WakeWordStatus>,
        failure_reported: &mut bool,
    ) {
        let status = *status_rx.borrow_and_update();
        debug!(%status, "Wake word status changed");
        if status != WakeWordStatus::Failed || *failure_reported {
            return;
        }
        *failure_reported = true;
        let message = self
            .wake_word
            .session()
            .failure
            .map(|e| e.to_string())
            .unwrap_or_else(|| "wake word detection unavailable".to_string());
        warn!(%message, "Wake word detection unavailable, check-ins continue");
        self.emit(HostEvent::WakeWordStatus {
            status,
            message: Some(message),
        });
    }

    fn on_visibility(&self, event: VisibilityEvent) {
        match event {
            VisibilityEvent::Appear => {
                self.emit(HostEvent::Appear {});
                self.play(SoundEffect::Jingle);
            }
            VisibilityEvent::Hide => self.emit(HostEvent::Hide {}),
            VisibilityEvent::StateChanged(state) => self.emit(HostEvent::Visibility { state }),
        }
    }

    /// Handle a single command from the surface.
    /// Returns `false` if the main loop should exit.
    async fn handle_command(&self, cmd: SurfaceCommand) -> bool {
        match cmd {
            SurfaceCommand::Dismiss {} => {
                self.visibility.hide();
            }

            SurfaceCommand::StateChange { state } => {
                info!(state = %state, "Assistant state changed");
                match SoundEffect::for_assistant_state(&state) {
                    Some(effect) => self.play(effect),
                    None => self.play_random_chime(),
                }
            }

            SurfaceCommand::WakeWordDetected {} => {
                info!("Wake word reported by surface");
                self.visibility.show();
                self.play(SoundEffect::WakeWordConfirm);
            }

            SurfaceCommand::GetVersion { id } => {
                self.emit(HostEvent::Version {
                    id,
                    version: VERSION.to_string(),
                });
            }

            SurfaceCommand::RequestMicrophonePermission { id } => {
                let granted = self.recognizer.request_permission().await.is_ok();
                info!(granted, "Microphone permission requested");
                self.emit(HostEvent::MicrophonePermission { id, granted });
            }

            SurfaceCommand::Toggle {} => {
                self.visibility.toggle();
            }

            SurfaceCommand::Show {} => {
                self.visibility.show();
            }

            SurfaceCommand::TakeBreak { duration_ms } => {
                let duration = duration_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.break_duration());
                self.visibility.hide();
                self.scheduler.pause(duration);
            }

            SurfaceCommand::SetVolume { volume } => {
                let applied = self.sounds.set_volume(volume);
                info!(requested = volume, applied, "Volume changed");
            }

            SurfaceCommand::Transcript { text, is_final } => {
                self.recognizer
                    .feed(RecognitionEvent::Transcript { text, is_final });
            }

            SurfaceCommand::RecognitionError { fault } => {
                self.recognizer
                    .feed(RecognitionEvent::Fault(fault_from_code(&fault)));
            }

            SurfaceCommand::RecognitionEnd {} => {
                self.recognizer.feed(RecognitionEvent::Ended);
            }

            SurfaceCommand::SurfaceClosed {} => {
                info!("Presentation surface closed by host");
                self.surface.mark_destroyed();
            }

            SurfaceCommand::Ping {} => {
                self.emit(HostEvent::Pong {});
            }

            SurfaceCommand::Stop {} => {
                self.emit(HostEvent::Stopping {});
                return false;
            }
        }

        true
    }

    fn play(&self, effect: SoundEffect) {
        let sounds = Arc::clone(&self.sounds);
        tokio::spawn(async move {
            sounds.play_effect(effect).await;
        });
    }

    fn play_random_chime(&self) {
        let sounds = Arc::clone(&self.sounds);
        tokio::spawn(async move {
            sounds.play_random_chime().await;
        });
    }

    fn emit(&self, event: HostEvent) {
        self.emitter.emit(event);
    }

    async fn shutdown(&self) {
        self.scheduler.stop();
        self.wake_word.release().await;
        self.visibility.shutdown();
        info!("Presence core shut down");
    }
}
