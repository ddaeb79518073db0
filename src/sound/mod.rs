//! Tiered sound playback: cached file asset first, synthesized tone second.
//!
//! `play_effect` never fails. A missing, corrupt or slow asset is marked
//! `Failed` and that request plays the tone table. A later request tries
//! the file again, bounded by the same load timeout.

pub mod assets;
mod decode;
pub mod playback;
pub mod tones;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::PresenceError;
use crate::scheduler::interval::{pick_interval, IntervalSource};

pub use assets::{AssetLoader, FileAssetLoader, LoadState, SoundAsset};
pub use playback::{open_default_output, AudioOutput, NullOutput};
pub use tones::{synthesize, tone_table, Tone, ToneTable};

/// Number of chime files picked from by `play_random_chime`.
pub const CHIME_VARIATIONS: u8 = 5;

/// Mono f32 PCM. Cloning shares the sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmClip {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl PcmClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Effect kinds. `Chime(0)` is the plain chime; 1..=5 are variations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundEffect {
    Jingle,
    Chime(u8),
    Pop,
    Giggle,
    WakeUp,
    WakeWordConfirm,
    Sleep,
    Listening,
    Speaking,
    Success,
}

impl SoundEffect {
    /// Backing file name under the sound directory.
    pub fn filename(self) -> String {
        match self {
            Self::Jingle => "jingle.mp3".into(),
            Self::Chime(0) => "chime.mp3".into(),
            Self::Chime(n) => format!("chime{n}.mp3"),
            Self::Pop => "pop.mp3".into(),
            Self::Giggle => "giggle.mp3".into(),
            Self::WakeUp => "wake-up.mp3".into(),
            Self::WakeWordConfirm => "wake-confirm.mp3".into(),
            Self::Sleep => "sleep.mp3".into(),
            Self::Listening => "listening.mp3".into(),
            Self::Speaking => "speaking.mp3".into(),
            Self::Success => "success.mp3".into(),
        }
    }

    /// Sound for an assistant state reported by the surface.
    pub fn for_assistant_state(state: &str) -> Option<Self> {
        match state {
            "waking" => Some(Self::WakeUp),
            "sleeping" => Some(Self::Sleep),
            "listening" => Some(Self::Listening),
            "speaking" => Some(Self::Speaking),
            _ => None,
        }
    }
}

/// Which tier produced the audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Asset,
    Synthesized,
}

enum Lookup {
    Cached(PcmClip),
    Load,
    Fallback,
}

/// Sound cache plus master volume.
pub struct SoundSubsystem {
    loader: Arc<dyn AssetLoader>,
    output: Arc<dyn AudioOutput>,
    cache: Mutex<HashMap<String, SoundAsset>>,
    /// f32 bits.
    volume: AtomicU32,
    load_timeout: Duration,
    variations: Mutex<Box<dyn IntervalSource>>,
}

impl SoundSubsystem {
    pub fn new(
        loader: Arc<dyn AssetLoader>,
        output: Arc<dyn AudioOutput>,
        volume: f32,
        load_timeout: Duration,
        variations: Box<dyn IntervalSource>,
    ) -> Self {
        Self {
            loader,
            output,
            cache: Mutex::new(HashMap::new()),
            volume: AtomicU32::new(clamp_volume(volume).to_bits()),
            load_timeout,
            variations: Mutex::new(variations),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Acquire))
    }

    /// Clamp to `[0, 1]` and apply to every live and future sound.
    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        self.volume.store(volume.to_bits(), Ordering::Release);
        self.output.set_volume(volume);
        debug!(volume, "Master volume set");
        volume
    }

    /// Load state of a cache entry, if one exists.
    pub fn load_state(&self, filename: &str) -> Option<LoadState> {
        self.cache().get(filename).map(|a| a.load_state)
    }

    /// Play an effect, falling back to synthesis when its asset is unusable.
    pub async fn play_effect(&self, effect: SoundEffect) -> PlaybackOutcome {
        let filename = effect.filename();

        let lookup = {
            let mut cache = self.cache();
            let entry = cache
                .entry(filename.clone())
                .or_insert_with(|| SoundAsset::new(&filename));
            match (entry.load_state, &entry.handle) {
                (LoadState::Ready, Some(clip)) => Lookup::Cached(clip.clone()),
                (LoadState::Unloaded | LoadState::Failed, _) => {
                    entry.load_state = LoadState::Loading;
                    Lookup::Load
                }
                _ => Lookup::Fallback,
            }
        };

        let clip = match lookup {
            Lookup::Cached(clip) => Some(clip),
            Lookup::Fallback => None,
            Lookup::Load => self.load(&filename).await,
        };

        let volume = self.volume();
        match clip {
            Some(clip) => {
                self.output.play(&filename, &clip, volume);
                PlaybackOutcome::Asset
            }
            None => {
                let clip = synthesize(tone_table(effect));
                self.output.play(&filename, &clip, volume);
                debug!(?effect, "Played synthesized fallback");
                PlaybackOutcome::Synthesized
            }
        }
    }

    /// Play one of the chime variations at random.
    pub async fn play_random_chime(&self) -> PlaybackOutcome {
        let fraction = self
            .variations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_fraction();
        let variation = pick_interval(1, CHIME_VARIATIONS as u64 + 1, fraction) as u8;
        self.play_effect(SoundEffect::Chime(variation)).await
    }

    async fn load(&self, filename: &str) -> Option<PcmClip> {
        let result = match tokio::time::timeout(self.load_timeout, self.loader.load(filename)).await
        {
            Ok(result) => result,
            Err(_) => Err(PresenceError::asset(
                filename,
                format!("timed out after {:?}", self.load_timeout),
            )),
        };

        let mut cache = self.cache();
        let Some(entry) = cache.get_mut(filename) else {
            return None;
        };
        match result {
            Ok(clip) => {
                debug!(filename, secs = clip.duration().as_secs_f32(), "Sound asset cached");
                entry.load_state = LoadState::Ready;
                entry.handle = Some(clip.clone());
                Some(clip)
            }
            Err(e) => {
                warn!("{}, using synthesized tone", e);
                entry.load_state = LoadState::Failed;
                None
            }
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, SoundAsset>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::scheduler::interval::FixedFraction;
    use std::future::Future;
    use std::pin::Pin;

    #[derive(Default)]
    struct RecordingOutput {
        plays: Mutex<Vec<(String, usize, f32)>>,
        volume: Mutex<Option<f32>>,
    }

    impl RecordingOutput {
        fn plays(&self) -> Vec<(String, usize, f32)> {
            self.plays.lock().unwrap().clone()
        }
    }

    impl AudioOutput for RecordingOutput {
        fn play(&self, key: &str, clip: &PcmClip, volume: f32) {
            self.plays
                .lock()
                .unwrap()
                .push((key.to_string(), clip.samples.len(), volume));
        }

        fn set_volume(&self, volume: f32) {
            *self.volume.lock().unwrap() = Some(volume);
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    /// Serves a fixed clip for one filename, counts loads, optionally stalls.
    struct StubLoader {
        available: Mutex<&'static str>,
        stall: Option<Duration>,
        loads: AtomicU32,
    }

    impl AssetLoader for StubLoader {
        fn load<'a>(
            &'a self,
            filename: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<PcmClip>> + Send + 'a>> {
            Box::pin(async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                if let Some(stall) = self.stall {
                    tokio::time::sleep(stall).await;
                }
                if filename == *self.available.lock().unwrap() {
                    Ok(PcmClip::new(vec![0.25; 100], 8_000))
                } else {
                    Err(PresenceError::asset(filename, "not found"))
                }
            })
        }
    }

    fn subsystem(
        available: &'static str,
        stall: Option<Duration>,
    ) -> (SoundSubsystem, Arc<StubLoader>, Arc<RecordingOutput>) {
        let loader = Arc::new(StubLoader {
            available: Mutex::new(available),
            stall,
            loads: AtomicU32::new(0),
        });
        let output = Arc::new(RecordingOutput::default());
        let sounds = SoundSubsystem::new(
            loader.clone(),
            output.clone(),
            0.3,
            Duration::from_millis(1000),
            Box::new(FixedFraction(0.5)),
        );
        (sounds, loader, output)
    }

    #[tokio::test]
    async fn test_asset_is_loaded_once_then_cached() {
        let (sounds, loader, output) = subsystem("jingle.mp3", None);
        assert_eq!(sounds.play_effect(SoundEffect::Jingle).await, PlaybackOutcome::Asset);
        assert_eq!(sounds.play_effect(SoundEffect::Jingle).await, PlaybackOutcome::Asset);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(sounds.load_state("jingle.mp3"), Some(LoadState::Ready));

        let plays = output.plays();
        assert_eq!(plays.len(), 2);
        assert!(plays.iter().all(|(key, len, _)| key == "jingle.mp3" && *len == 100));
    }

    #[tokio::test]
    async fn test_missing_asset_falls_back_to_synthesis() {
        let (sounds, loader, output) = subsystem("jingle.mp3", None);
        assert_eq!(
            sounds.play_effect(SoundEffect::Chime(3)).await,
            PlaybackOutcome::Synthesized
        );
        assert_eq!(sounds.load_state("chime3.mp3"), Some(LoadState::Failed));

        // Each request retries the file.
        assert_eq!(
            sounds.play_effect(SoundEffect::Chime(3)).await,
            PlaybackOutcome::Synthesized
        );
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(sounds.load_state("chime3.mp3"), Some(LoadState::Failed));

        let synth_len = synthesize(tone_table(SoundEffect::Chime(3))).samples.len();
        assert_eq!(output.plays()[0].1, synth_len);
    }

    #[tokio::test]
    async fn test_failed_asset_recovers_once_installed() {
        let (sounds, loader, _output) = subsystem("jingle.mp3", None);
        assert_eq!(sounds.play_effect(SoundEffect::Pop).await, PlaybackOutcome::Synthesized);
        assert_eq!(sounds.load_state("pop.mp3"), Some(LoadState::Failed));

        *loader.available.lock().unwrap() = "pop.mp3";
        assert_eq!(sounds.play_effect(SoundEffect::Pop).await, PlaybackOutcome::Asset);
        assert_eq!(sounds.load_state("pop.mp3"), Some(LoadState::Ready));
        assert_eq!(sounds.play_effect(SoundEffect::Pop).await, PlaybackOutcome::Asset);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_asset_times_out_to_synthesis() {
        let (sounds, _loader, _output) = subsystem("pop.mp3", Some(Duration::from_secs(5)));
        assert_eq!(sounds.play_effect(SoundEffect::Pop).await, PlaybackOutcome::Synthesized);
        assert_eq!(sounds.load_state("pop.mp3"), Some(LoadState::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_during_load_synthesizes() {
        let (sounds, loader, _output) = subsystem("pop.mp3", Some(Duration::from_millis(200)));
        let (first, second) = tokio::join!(
            sounds.play_effect(SoundEffect::Pop),
            sounds.play_effect(SoundEffect::Pop)
        );
        assert_eq!(first, PlaybackOutcome::Asset);
        assert_eq!(second, PlaybackOutcome::Synthesized);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_volume_is_clamped_and_used() {
        let (sounds, _loader, output) = subsystem("", None);
        assert_eq!(sounds.set_volume(-1.0), 0.0);
        assert_eq!(*output.volume.lock().unwrap(), Some(0.0));
        assert_eq!(sounds.set_volume(2.0), 1.0);
        assert_eq!(sounds.volume(), 1.0);
        assert_eq!(sounds.set_volume(f32::NAN), 0.0);

        sounds.set_volume(0.7);
        sounds.play_effect(SoundEffect::Success).await;
        assert_eq!(output.plays()[0].2, 0.7);
    }

    #[tokio::test]
    async fn test_random_chime_uses_variation_source() {
        let (sounds, _loader, output) = subsystem("", None);
        sounds.play_random_chime().await;
        // 1 + floor(0.5 * 5)
        assert_eq!(output.plays()[0].0, "chime3.mp3");
    }

    #[test]
    fn test_filenames_and_state_sounds() {
        assert_eq!(SoundEffect::Chime(0).filename(), "chime.mp3");
        assert_eq!(SoundEffect::Chime(2).filename(), "chime2.mp3");
        assert_eq!(SoundEffect::WakeWordConfirm.filename(), "wake-confirm.mp3");
        assert_eq!(
            SoundEffect::for_assistant_state("sleeping"),
            Some(SoundEffect::Sleep)
        );
        assert_eq!(SoundEffect::for_assistant_state("thinking"), None);
    }

    #[test]
    fn test_clip_duration() {
        assert_eq!(PcmClip::new(vec![0.0; 44_100], 44_100).duration(), Duration::from_secs(1));
        assert_eq!(PcmClip::new(vec![0.0; 10], 0).duration(), Duration::ZERO);
    }
}
