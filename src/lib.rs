//! minion-core: presence and engagement coordinator for the desktop
//! companion.
//!
//! Decides when the companion appears (randomized check-ins and a spoken
//! wake phrase), drives its visibility state machine, and gives audio
//! feedback that degrades to synthesized tones when sound files are missing.
//! The presentation surface talks to it over JSON-line IPC.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod scheduler;
pub mod sound;
pub mod visibility;
pub mod wake_word;

pub use coordinator::{Coordinator, Services};
pub use error::{PresenceError, Result};
