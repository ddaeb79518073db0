//! Visibility state machine.
//!
//! Owns the single `VisibilityState` of the companion. Both trigger sources
//! (check-in scheduler and wake-word engine) go through `show()`; the surface
//! and the coordinator go through `hide()`. Timed transitions are armed as
//! tokio tasks tagged with a generation number so that a superseded timer
//! can never move the state.

pub mod surface;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::PresenceError;

pub use surface::{HostSurface, PresentationSurface};

/// Lifecycle event channel capacity.
const EVENT_CAPACITY: usize = 64;

/// Visibility states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    /// Surface concealed, nothing on screen.
    Hidden,
    /// Entrance animation running.
    Appearing,
    /// Settled on screen.
    Visible,
    /// Exit animation running.
    Hiding,
}

impl VisibilityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::Appearing => "appearing",
            Self::Visible => "visible",
            Self::Hiding => "hiding",
        }
    }
}

impl std::fmt::Display for VisibilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events broadcast to consumers (sound, presentation surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityEvent {
    /// Start the entrance animation.
    Appear,
    /// Start the exit animation.
    Hide,
    /// Any state transition, including the timed ones.
    StateChanged(VisibilityState),
}

struct Inner {
    state: VisibilityState,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    events: broadcast::Sender<VisibilityEvent>,
    surface: Arc<dyn PresentationSurface>,
    entrance_delay: Duration,
    exit_delay: Duration,
}

/// Cheaply cloneable handle to the visibility state machine.
#[derive(Clone)]
pub struct VisibilityController {
    shared: Arc<Shared>,
}

impl VisibilityController {
    pub fn new(
        surface: Arc<dyn PresentationSurface>,
        entrance_delay: Duration,
        exit_delay: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: VisibilityState::Hidden,
                    generation: 0,
                    pending: None,
                }),
                events,
                surface,
                entrance_delay,
                exit_delay,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> VisibilityState {
        self.shared.lock().state
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<VisibilityEvent> {
        self.shared.events.subscribe()
    }

    /// Bring the companion on screen.
    ///
    /// Returns `true` when an entrance transition was started, `false` when
    /// the companion was already appearing or visible (flags re-asserted).
    /// A recreated surface always replays the entrance.
    pub fn show(&self) -> bool {
        let mut inner = self.shared.lock();
        let recreated = self.shared.ensure_surface();

        match inner.state {
            VisibilityState::Appearing | VisibilityState::Visible if !recreated => {
                self.shared.surface.present();
                debug!(state = %inner.state, "show() while already on screen");
                false
            }
            _ => {
                let generation = Shared::invalidate(&mut inner);
                self.shared.surface.present();
                self.shared.transition(&mut inner, VisibilityState::Appearing);
                self.shared.emit(VisibilityEvent::Appear);
                inner.pending = Some(self.arm(
                    generation,
                    self.shared.entrance_delay,
                    VisibilityState::Appearing,
                    VisibilityState::Visible,
                ));
                info!("Companion appearing");
                true
            }
        }
    }

    /// Take the companion off screen.
    ///
    /// Returns `true` when an exit transition was started. Calling it while
    /// already hiding or hidden is a no-op.
    pub fn hide(&self) -> bool {
        let mut inner = self.shared.lock();

        match inner.state {
            VisibilityState::Hiding | VisibilityState::Hidden => {
                debug!(state = %inner.state, "hide() while already leaving");
                false
            }
            VisibilityState::Appearing | VisibilityState::Visible => {
                // Cancels a pending Appearing -> Visible settle as well.
                let generation = Shared::invalidate(&mut inner);
                self.shared.transition(&mut inner, VisibilityState::Hiding);
                self.shared.emit(VisibilityEvent::Hide);
                inner.pending = Some(self.arm(
                    generation,
                    self.shared.exit_delay,
                    VisibilityState::Hiding,
                    VisibilityState::Hidden,
                ));
                info!("Companion hiding");
                true
            }
        }
    }

    /// Tray click / global shortcut behaviour.
    pub fn toggle(&self) -> bool {
        match self.state() {
            VisibilityState::Appearing | VisibilityState::Visible => self.hide(),
            VisibilityState::Hidden | VisibilityState::Hiding => self.show(),
        }
    }

    /// Cancel any pending timed transition (process teardown).
    pub fn shutdown(&self) {
        let mut inner = self.shared.lock();
        Shared::invalidate(&mut inner);
    }

    fn arm(
        &self,
        generation: u64,
        delay: Duration,
        from: VisibilityState,
        to: VisibilityState,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.complete(generation, from, to);
        })
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bump the generation and abort the pending timer, returning the new
    /// generation for the next timer to carry.
    fn invalidate(inner: &mut Inner) -> u64 {
        inner.generation += 1;
        if let Some(handle) = inner.pending.take() {
            handle.abort();
        }
        inner.generation
    }

    /// Returns `true` if the surface had to be rebuilt.
    fn ensure_surface(&self) -> bool {
        if !self.surface.is_destroyed() {
            return false;
        }
        info!("Presentation surface was destroyed, recreating");
        if let Err(e) = self.surface.recreate() {
            error!("Failed to recreate presentation surface: {}", e);
        }
        true
    }

    fn transition(&self, inner: &mut Inner, to: VisibilityState) {
        debug!(from = %inner.state, to = %to, "Visibility transition");
        inner.state = to;
        self.emit(VisibilityEvent::StateChanged(to));
    }

    fn emit(&self, event: VisibilityEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn complete(&self, generation: u64, from: VisibilityState, to: VisibilityState) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != from {
            let stale = PresenceError::StaleCallback(generation);
            debug!(current = inner.generation, state = %inner.state, "{stale}, dropped");
            return;
        }
        inner.pending = None;
        if to == VisibilityState::Hidden {
            self.surface.conceal();
        }
        self.transition(&mut inner, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTER: Duration = Duration::from_millis(300);
    const EXIT: Duration = Duration::from_millis(300);

    fn controller() -> (VisibilityController, Arc<HostSurface>) {
        let surface = Arc::new(HostSurface::new());
        let ctl = VisibilityController::new(surface.clone(), ENTER, EXIT);
        (ctl, surface)
    }

    fn drain(rx: &mut broadcast::Receiver<VisibilityEvent>) -> Vec<VisibilityEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn count(events: &[VisibilityEvent], wanted: VisibilityEvent) -> usize {
        events.iter().filter(|e| **e == wanted).count()
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_settles_to_visible() {
        let (ctl, surface) = controller();
        assert_eq!(ctl.state(), VisibilityState::Hidden);

        assert!(ctl.show());
        assert_eq!(ctl.state(), VisibilityState::Appearing);
        assert!(surface.is_shown());

        wait(301).await;
        assert_eq!(ctl.state(), VisibilityState::Visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_show_while_visible_emits_one_appear() {
        let (ctl, surface) = controller();
        let mut rx = ctl.subscribe();

        ctl.show();
        wait(301).await;
        assert!(!ctl.show());
        assert!(!ctl.show());

        let events = drain(&mut rx);
        assert_eq!(count(&events, VisibilityEvent::Appear), 1);
        assert_eq!(ctl.state(), VisibilityState::Visible);
        // Re-assertions still reach the surface.
        assert_eq!(surface.presents(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_completes_after_exit_delay() {
        let (ctl, surface) = controller();
        ctl.show();
        wait(301).await;

        assert!(ctl.hide());
        assert_eq!(ctl.state(), VisibilityState::Hiding);
        wait(299).await;
        assert_eq!(ctl.state(), VisibilityState::Hiding);
        wait(2).await;
        assert_eq!(ctl.state(), VisibilityState::Hidden);
        assert!(!surface.is_shown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_is_idempotent() {
        let (ctl, _surface) = controller();
        let mut rx = ctl.subscribe();
        ctl.show();
        wait(301).await;

        assert!(ctl.hide());
        assert!(!ctl.hide());
        wait(400).await;

        let events = drain(&mut rx);
        assert_eq!(count(&events, VisibilityEvent::Hide), 1);
        assert_eq!(
            count(&events, VisibilityEvent::StateChanged(VisibilityState::Hidden)),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_during_hiding_ends_visible() {
        let (ctl, surface) = controller();
        let mut rx = ctl.subscribe();
        ctl.show();
        wait(301).await;

        ctl.hide();
        wait(100).await;
        assert!(ctl.show());
        wait(1000).await;

        assert_eq!(ctl.state(), VisibilityState::Visible);
        assert!(surface.is_shown());
        let events = drain(&mut rx);
        assert_eq!(count(&events, VisibilityEvent::Hide), 1);
        assert_eq!(
            count(&events, VisibilityEvent::StateChanged(VisibilityState::Hidden)),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_during_appearing_never_reports_visible() {
        let (ctl, _surface) = controller();
        let mut rx = ctl.subscribe();

        ctl.show();
        wait(100).await;
        assert!(ctl.hide());
        wait(1000).await;

        assert_eq!(ctl.state(), VisibilityState::Hidden);
        let events = drain(&mut rx);
        assert_eq!(
            count(&events, VisibilityEvent::StateChanged(VisibilityState::Visible)),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_recreates_destroyed_surface() {
        let (ctl, surface) = controller();
        surface.mark_destroyed();

        assert!(ctl.show());
        assert_eq!(surface.recreations(), 1);
        assert!(!surface.is_destroyed());
        assert!(surface.is_shown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_destroyed_while_visible_replays_entrance() {
        let (ctl, surface) = controller();
        let mut rx = ctl.subscribe();
        assert!(ctl.show());
        wait(301).await;
        assert_eq!(ctl.state(), VisibilityState::Visible);
        drain(&mut rx);

        surface.mark_destroyed();
        assert!(ctl.show());
        assert_eq!(surface.recreations(), 1);
        assert_eq!(ctl.state(), VisibilityState::Appearing);
        assert_eq!(count(&drain(&mut rx), VisibilityEvent::Appear), 1);

        wait(301).await;
        assert_eq!(ctl.state(), VisibilityState::Visible);
        // Healthy surface goes back to re-asserting only.
        assert!(!ctl.show());
        assert_eq!(count(&drain(&mut rx), VisibilityEvent::Appear), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_flips_state() {
        let (ctl, _surface) = controller();
        assert!(ctl.toggle());
        assert_eq!(ctl.state(), VisibilityState::Appearing);
        assert!(ctl.toggle());
        assert_eq!(ctl.state(), VisibilityState::Hiding);
        wait(400).await;
        assert_eq!(ctl.state(), VisibilityState::Hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_settle() {
        let (ctl, _surface) = controller();
        ctl.show();
        ctl.shutdown();
        wait(1000).await;
        assert_eq!(ctl.state(), VisibilityState::Appearing);
    }
}
