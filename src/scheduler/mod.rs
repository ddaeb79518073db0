//! Randomized check-in scheduler.
//!
//! Holds exactly one pending timer while running: a warm-up timer, a
//! check-in fire timer, or a pause/resume timer. Firing and resuming always
//! re-arm, so the scheduler never silently stops until `stop()`.

pub mod interval;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::PresenceError;
use crate::visibility::{VisibilityController, VisibilityState};

pub use interval::{pick_interval, FixedFraction, IntervalSource, SeededSource};

/// Decides whether an automatic check-in may interrupt the user right now.
pub trait InterruptionPolicy: Send + Sync {
    fn should_interrupt(&self) -> bool;
}

/// Default policy: always allow.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAllow;

impl InterruptionPolicy for AlwaysAllow {
    fn should_interrupt(&self) -> bool {
        true
    }
}

impl<F> InterruptionPolicy for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_interrupt(&self) -> bool {
        self()
    }
}

/// What the scheduler is currently waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Not started, or torn down.
    Stopped,
    /// Waiting out the delay before the first check-in.
    WarmingUp { delay_ms: u64 },
    /// A check-in fires after `interval_ms`.
    Armed { interval_ms: u64 },
    /// Check-ins suppressed for `duration_ms`.
    Paused { duration_ms: u64 },
}

/// Check-in counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckInStats {
    /// Timers that fired.
    pub fired: u64,
    /// Fires that brought the companion on screen.
    pub shown: u64,
    /// Fires blocked by the policy or because the companion was visible.
    pub suppressed: u64,
}

struct Inner {
    phase: SchedulerPhase,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    stats: CheckInStats,
}

struct Shared {
    inner: Mutex<Inner>,
    source: Mutex<Box<dyn IntervalSource>>,
    policy: Arc<dyn InterruptionPolicy>,
    visibility: VisibilityController,
    min_interval_ms: u64,
    max_interval_ms: u64,
}

/// Cheaply cloneable handle to the check-in scheduler.
#[derive(Clone)]
pub struct PresenceScheduler {
    shared: Arc<Shared>,
}

impl PresenceScheduler {
    pub fn new(
        visibility: VisibilityController,
        min_interval_ms: u64,
        max_interval_ms: u64,
        source: Box<dyn IntervalSource>,
        policy: Arc<dyn InterruptionPolicy>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    phase: SchedulerPhase::Stopped,
                    generation: 0,
                    pending: None,
                    stats: CheckInStats::default(),
                }),
                source: Mutex::new(source),
                policy,
                visibility,
                min_interval_ms,
                max_interval_ms,
            }),
        }
    }

    /// Begin scheduling, waiting `first_delay` before arming the first
    /// random interval.
    pub fn start(&self, first_delay: Duration) {
        let mut inner = self.shared.lock();
        if first_delay.is_zero() {
            self.shared.schedule_locked(&mut inner);
            return;
        }
        let delay_ms = first_delay.as_millis() as u64;
        info!(delay_ms, "Check-ins start after warm-up");
        self.shared
            .resume_after(&mut inner, first_delay, SchedulerPhase::WarmingUp { delay_ms });
    }

    /// Draw a fresh interval and arm the check-in timer, replacing whatever
    /// timer was pending. Returns the interval in milliseconds.
    pub fn schedule_next(&self) -> u64 {
        let mut inner = self.shared.lock();
        self.shared.schedule_locked(&mut inner)
    }

    /// Suppress check-ins for `duration`, then resume normal scheduling.
    pub fn pause(&self, duration: Duration) {
        let mut inner = self.shared.lock();
        let duration_ms = duration.as_millis() as u64;
        info!(duration_ms, "Check-ins paused");
        self.shared
            .resume_after(&mut inner, duration, SchedulerPhase::Paused { duration_ms });
    }

    /// Cancel every pending timer.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        Shared::invalidate(&mut inner);
        inner.phase = SchedulerPhase::Stopped;
        debug!("Check-in scheduler stopped");
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.shared.lock().phase
    }

    pub fn stats(&self) -> CheckInStats {
        self.shared.lock().stats
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn invalidate(inner: &mut Inner) -> u64 {
        inner.generation += 1;
        if let Some(handle) = inner.pending.take() {
            handle.abort();
        }
        inner.generation
    }

    fn draw_interval(&self) -> u64 {
        let fraction = self
            .source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_fraction();
        pick_interval(self.min_interval_ms, self.max_interval_ms, fraction)
    }

    fn schedule_locked(self: &Arc<Self>, inner: &mut Inner) -> u64 {
        let generation = Self::invalidate(inner);
        let interval_ms = self.draw_interval();
        inner.phase = SchedulerPhase::Armed { interval_ms };

        let shared = Arc::clone(self);
        inner.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            shared.fire(generation);
        }));

        debug!(interval_ms, "Next check-in armed");
        interval_ms
    }

    fn resume_after(self: &Arc<Self>, inner: &mut Inner, delay: Duration, phase: SchedulerPhase) {
        let generation = Self::invalidate(inner);
        inner.phase = phase;

        let shared = Arc::clone(self);
        inner.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.resume(generation);
        }));
    }

    fn resume(self: &Arc<Self>, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!("{}, resume dropped", PresenceError::StaleCallback(generation));
            return;
        }
        inner.pending = None;
        debug!(phase = ?inner.phase, "Resuming check-ins");
        self.schedule_locked(&mut inner);
    }

    fn fire(self: &Arc<Self>, generation: u64) {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                debug!("{}, check-in dropped", PresenceError::StaleCallback(generation));
                return;
            }
            inner.pending = None;
            inner.stats.fired += 1;
        }

        // Policy and show() run without the scheduler lock held.
        let allowed = self.policy.should_interrupt();
        let already_visible = self.visibility.state() == VisibilityState::Visible;
        let shown = allowed && !already_visible && self.visibility.show();

        let mut inner = self.lock();
        if shown {
            inner.stats.shown += 1;
            info!("Check-in: companion shown");
        } else {
            inner.stats.suppressed += 1;
            debug!(allowed, already_visible, "Check-in suppressed");
        }

        // A pause()/stop() that raced this fire owns the schedule now.
        if inner.generation != generation {
            debug!("Schedule changed during check-in, not re-arming");
            return;
        }
        self.schedule_locked(&mut inner);
    }
}
