//! Audio output backends.
//!
//! `RodioOutput` plays through the default device on a dedicated thread
//! (rodio's `OutputStream` must stay on the thread that opened it). Each
//! cache key owns one sink; replaying a key restarts it from the top.
//! `NullOutput` is used when no device can be opened.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use super::PcmClip;

/// Playback sink for decoded or synthesized clips.
pub trait AudioOutput: Send + Sync {
    /// Start `clip` under `key`, cutting off whatever that key was playing.
    fn play(&self, key: &str, clip: &PcmClip, volume: f32);

    /// Apply a new master volume to every live sink.
    fn set_volume(&self, volume: f32);

    fn name(&self) -> &'static str;
}

/// Discards audio. Tracks how many clips were requested.
#[derive(Debug, Default)]
pub struct NullOutput {
    played: AtomicU32,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> u32 {
        self.played.load(Ordering::Relaxed)
    }
}

impl AudioOutput for NullOutput {
    fn play(&self, key: &str, clip: &PcmClip, volume: f32) {
        self.played.fetch_add(1, Ordering::Relaxed);
        debug!(
            key,
            volume,
            secs = clip.duration().as_secs_f32(),
            "No audio device, clip skipped"
        );
    }

    fn set_volume(&self, _volume: f32) {}

    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(feature = "native-audio")]
pub use native::RodioOutput;

#[cfg(feature = "native-audio")]
mod native {
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::thread;

    use rodio::buffer::SamplesBuffer;
    use rodio::{OutputStream, Sink};
    use tracing::{info, warn};

    use super::{AudioOutput, PcmClip};
    use crate::error::{PresenceError, Result};

    enum Command {
        Play {
            key: String,
            clip: PcmClip,
            volume: f32,
        },
        SetVolume(f32),
    }

    /// Default output device via rodio.
    pub struct RodioOutput {
        tx: Mutex<mpsc::Sender<Command>>,
    }

    impl RodioOutput {
        /// Open the default audio output device.
        pub fn new() -> Result<Self> {
            let (tx, rx) = mpsc::channel::<Command>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

            thread::Builder::new()
                .name("minion-audio".into())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(pair) => pair,
                        Err(e) => {
                            let _ = ready_tx.send(Err(PresenceError::CapabilityUnavailable(
                                format!("audio output: {}", e),
                            )));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    let mut sinks: HashMap<String, Sink> = HashMap::new();
                    while let Ok(cmd) = rx.recv() {
                        match cmd {
                            Command::Play { key, clip, volume } => {
                                // Dropping the previous sink stops it.
                                let sink = match Sink::try_new(&handle) {
                                    Ok(s) => s,
                                    Err(e) => {
                                        warn!("Failed to create audio sink: {}", e);
                                        continue;
                                    }
                                };
                                sink.set_volume(volume);
                                sink.append(SamplesBuffer::new(
                                    1,
                                    clip.sample_rate,
                                    clip.samples.to_vec(),
                                ));
                                sinks.insert(key, sink);
                            }
                            Command::SetVolume(volume) => {
                                for sink in sinks.values() {
                                    sink.set_volume(volume);
                                }
                            }
                        }
                    }
                })
                .map_err(PresenceError::from)?;

            ready_rx
                .recv()
                .map_err(|_| PresenceError::CapabilityUnavailable("audio thread exited".into()))??;
            info!("Audio output opened");

            Ok(Self { tx: Mutex::new(tx) })
        }

        fn send(&self, cmd: Command) {
            let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            if tx.send(cmd).is_err() {
                warn!("Audio thread is gone, command dropped");
            }
        }
    }

    impl AudioOutput for RodioOutput {
        fn play(&self, key: &str, clip: &PcmClip, volume: f32) {
            self.send(Command::Play {
                key: key.to_string(),
                clip: clip.clone(),
                volume,
            });
        }

        fn set_volume(&self, volume: f32) {
            self.send(Command::SetVolume(volume));
        }

        fn name(&self) -> &'static str {
            "rodio"
        }
    }
}

/// Open the best available output: rodio when built with `native-audio`
/// and a device exists, otherwise the null sink.
pub fn open_default_output() -> Box<dyn AudioOutput> {
    #[cfg(feature = "native-audio")]
    {
        match RodioOutput::new() {
            Ok(output) => return Box::new(output),
            Err(e) => warn!("{}, sounds disabled", e),
        }
    }
    #[cfg(not(feature = "native-audio"))]
    warn!("Built without native-audio, sounds disabled");

    Box::new(NullOutput::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_output_counts() {
        let out = NullOutput::new();
        out.play("pop.mp3", &PcmClip::new(vec![0.0; 441], 44_100), 0.5);
        out.set_volume(1.0);
        assert_eq!(out.played(), 1);
        assert_eq!(out.name(), "null");
    }

    #[test]
    fn test_speaker_output_is_a_default_feature() {
        let manifest = include_str!("../../Cargo.toml");
        let defaults = manifest
            .lines()
            .find(|l| l.trim_start().starts_with("default ="))
            .unwrap();
        assert!(defaults.contains("\"native-audio\""), "{defaults}");
    }
}
