//! Injectable randomness for check-in interval selection.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform fractions in `[0, 1)`.
pub trait IntervalSource: Send {
    fn next_fraction(&mut self) -> f64;
}

/// `StdRng`-backed source; seed it for reproducible schedules.
pub struct SeededSource {
    rng: StdRng,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl IntervalSource for SeededSource {
    fn next_fraction(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Always returns the same fraction.
#[derive(Debug, Clone, Copy)]
pub struct FixedFraction(pub f64);

impl IntervalSource for FixedFraction {
    fn next_fraction(&mut self) -> f64 {
        self.0
    }
}

/// Map a fraction onto `[min_ms, max_ms)`.
///
/// Out-of-range fractions are clamped so the result never reaches `max_ms`.
/// Degenerate bounds (`max_ms <= min_ms`) yield `min_ms`.
pub fn pick_interval(min_ms: u64, max_ms: u64, fraction: f64) -> u64 {
    if max_ms <= min_ms {
        return min_ms;
    }
    let span = max_ms - min_ms;
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let offset = (fraction * span as f64).floor() as u64;
    min_ms + offset.min(span - 1)
}
