//! Presentable surface abstraction.
//!
//! The window itself (chrome, transparency, focus flags) lives in the host
//! process. The controller only needs to know whether it still exists and to
//! ask for it to be recreated, presented or concealed.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::error::Result;

/// Window-like surface the companion is drawn on.
pub trait PresentationSurface: Send + Sync {
    /// Side-channel check: was the surface destroyed externally?
    fn is_destroyed(&self) -> bool;

    /// Build a fresh surface after external destruction.
    fn recreate(&self) -> Result<()>;

    /// Make the surface visible and re-assert its on-top/all-workspaces flags.
    fn present(&self);

    /// Hide the surface once the exit animation has finished.
    fn conceal(&self);
}

/// Surface whose real window is owned by the host process.
///
/// Tracks existence and visibility so the controller can detect that the
/// host closed the window and recreate it on the next `show()`.
#[derive(Debug)]
pub struct HostSurface {
    exists: AtomicBool,
    shown: AtomicBool,
    recreations: AtomicU32,
    presents: AtomicU32,
}

impl HostSurface {
    pub fn new() -> Self {
        Self {
            exists: AtomicBool::new(true),
            shown: AtomicBool::new(false),
            recreations: AtomicU32::new(0),
            presents: AtomicU32::new(0),
        }
    }

    /// Record that the host destroyed the window.
    pub fn mark_destroyed(&self) {
        self.exists.store(false, Ordering::Release);
        self.shown.store(false, Ordering::Release);
    }

    pub fn is_shown(&self) -> bool {
        self.shown.load(Ordering::Acquire)
    }

    /// Number of times the surface had to be rebuilt.
    pub fn recreations(&self) -> u32 {
        self.recreations.load(Ordering::Acquire)
    }

    /// Number of present calls, including flag re-assertions.
    pub fn presents(&self) -> u32 {
        self.presents.load(Ordering::Acquire)
    }
}

impl Default for HostSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationSurface for HostSurface {
    fn is_destroyed(&self) -> bool {
        !self.exists.load(Ordering::Acquire)
    }

    fn recreate(&self) -> Result<()> {
        self.exists.store(true, Ordering::Release);
        self.recreations.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn present(&self) {
        self.shown.store(true, Ordering::Release);
        self.presents.fetch_add(1, Ordering::AcqRel);
    }

    fn conceal(&self) {
        self.shown.store(false, Ordering::Release);
    }
}
