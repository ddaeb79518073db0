//! Synthesized fallback tones.
//!
//! Every effect has a short fixed tone table. Each tone is a sine with a
//! 10 ms linear attack and an exponential decay to 1% over its duration.

use super::{PcmClip, SoundEffect};

/// Sample rate for synthesized clips.
pub const SYNTH_SAMPLE_RATE: u32 = 44_100;

const ATTACK_SECS: f32 = 0.01;
const DECAY_FLOOR: f32 = 0.01;
const DEFAULT_GAIN: f32 = 0.3;

/// One oscillator note. `end_freq` differs from `freq` for sweeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub freq: f32,
    pub end_freq: f32,
    pub offset: f32,
    pub duration: f32,
}

const fn note(freq: f32, offset: f32, duration: f32) -> Tone {
    Tone {
        freq,
        end_freq: freq,
        offset,
        duration,
    }
}

/// Tone list plus peak gain for one effect kind.
#[derive(Debug, Clone, Copy)]
pub struct ToneTable {
    pub tones: &'static [Tone],
    pub gain: f32,
}

const JINGLE: &[Tone] = &[
    note(523.25, 0.0, 0.15),
    note(659.25, 0.1, 0.15),
    note(783.99, 0.2, 0.15),
    note(1046.5, 0.3, 0.15),
];

const CHIME: &[Tone] = &[note(659.25, 0.0, 0.2), note(783.99, 0.1, 0.2)];

const WAKE_CONFIRM: &[Tone] = &[
    note(659.25, 0.0, 0.3),
    note(783.99, 0.1, 0.3),
    note(987.77, 0.2, 0.3),
    note(1318.51, 0.3, 0.3),
];

const POP: &[Tone] = &[Tone {
    freq: 800.0,
    end_freq: 200.0,
    offset: 0.0,
    duration: 0.05,
}];

const GIGGLE: &[Tone] = &[
    note(523.25, 0.0, 0.08),
    note(659.25, 0.05, 0.08),
    note(523.25, 0.1, 0.08),
];

const WAKE_UP: &[Tone] = &[
    note(392.0, 0.0, 0.2),
    note(493.88, 0.1, 0.2),
    note(587.33, 0.2, 0.2),
];

const SLEEP: &[Tone] = &[
    note(587.33, 0.0, 0.25),
    note(493.88, 0.15, 0.25),
    note(392.0, 0.3, 0.25),
];

const LISTENING: &[Tone] = &[note(800.0, 0.0, 0.1), note(1000.0, 0.1, 0.1)];

const SPEAKING: &[Tone] = &[
    note(659.25, 0.0, 0.1),
    note(783.99, 0.08, 0.1),
    note(987.77, 0.16, 0.1),
];

const SUCCESS: &[Tone] = &[
    note(523.25, 0.0, 0.15),
    note(659.25, 0.1, 0.15),
    note(783.99, 0.2, 0.15),
];

/// Fixed tone table for an effect kind. Chime variations share one table.
pub fn tone_table(effect: SoundEffect) -> ToneTable {
    let (tones, gain) = match effect {
        SoundEffect::Jingle => (JINGLE, DEFAULT_GAIN),
        SoundEffect::Chime(_) => (CHIME, DEFAULT_GAIN),
        SoundEffect::WakeWordConfirm => (WAKE_CONFIRM, 0.8),
        SoundEffect::Pop => (POP, 0.2),
        SoundEffect::Giggle => (GIGGLE, DEFAULT_GAIN),
        SoundEffect::WakeUp => (WAKE_UP, DEFAULT_GAIN),
        SoundEffect::Sleep => (SLEEP, DEFAULT_GAIN),
        SoundEffect::Listening => (LISTENING, DEFAULT_GAIN),
        SoundEffect::Speaking => (SPEAKING, DEFAULT_GAIN),
        SoundEffect::Success => (SUCCESS, DEFAULT_GAIN),
    };
    ToneTable { tones, gain }
}

/// Render a tone table to mono PCM. Master volume is applied at playback.
pub fn synthesize(table: ToneTable) -> PcmClip {
    let rate = SYNTH_SAMPLE_RATE as f32;
    let total = table
        .tones
        .iter()
        .map(|t| t.offset + t.duration)
        .fold(0.0f32, f32::max);
    let mut samples = vec![0.0f32; (total * rate).ceil() as usize];

    for tone in table.tones {
        let start = (tone.offset * rate) as usize;
        let len = (tone.duration * rate) as usize;
        let mut phase = 0.0f32;
        for i in 0..len {
            let Some(slot) = samples.get_mut(start + i) else {
                break;
            };
            let t = i as f32 / rate;
            let progress = t / tone.duration;
            // Exponential glide, matching an oscillator frequency ramp.
            let freq = tone.freq * (tone.end_freq / tone.freq).powf(progress);
            phase += std::f32::consts::TAU * freq / rate;
            *slot += phase.sin() * table.gain * envelope(t, tone.duration);
        }
    }

    PcmClip::new(samples, SYNTH_SAMPLE_RATE)
}

fn envelope(t: f32, duration: f32) -> f32 {
    if t < ATTACK_SECS {
        t / ATTACK_SECS
    } else {
        let span = (duration - ATTACK_SECS).max(f32::EPSILON);
        DECAY_FLOOR.powf((t - ATTACK_SECS) / span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_confirm_is_loudest() {
        let confirm = tone_table(SoundEffect::WakeWordConfirm);
        assert_eq!(confirm.tones.len(), 4);
        assert!(confirm.gain > tone_table(SoundEffect::Jingle).gain);
    }

    #[test]
    fn test_chime_variations_share_table() {
        assert_eq!(
            tone_table(SoundEffect::Chime(0)).tones,
            tone_table(SoundEffect::Chime(4)).tones
        );
    }

    #[test]
    fn test_synth_length_covers_last_tone() {
        // Jingle ends at 0.3 + 0.15 s.
        let clip = synthesize(tone_table(SoundEffect::Jingle));
        let expected = (0.45 * SYNTH_SAMPLE_RATE as f32).ceil() as usize;
        assert!(clip.samples.len().abs_diff(expected) <= 1);
        assert_eq!(clip.sample_rate, SYNTH_SAMPLE_RATE);
    }

    #[test]
    fn test_synth_is_audible_and_bounded() {
        let table = tone_table(SoundEffect::Pop);
        let clip = synthesize(table);
        let peak = clip.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.05);
        assert!(peak <= table.gain + 1e-3);
    }

    #[test]
    fn test_envelope_shape() {
        assert_eq!(envelope(0.0, 0.2), 0.0);
        assert!((envelope(ATTACK_SECS, 0.2) - 1.0).abs() < 1e-6);
        assert!((envelope(0.2, 0.2) - DECAY_FLOOR).abs() < 1e-4);
    }
}
