//! Configuration reading and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::{get_data_dir, get_sound_dir};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "MINION_CONFIG";

const MINUTE_MS: u64 = 60 * 1000;

/// How a transcript is compared against the wake phrases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// The phrase appears anywhere in the transcript.
    #[default]
    Contains,
    /// The transcript starts with the phrase.
    Prefix,
}

/// companion_config.json shape (written by the settings panel).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanionConfig {
    /// Lower bound of the random check-in interval.
    pub min_interval_ms: u64,
    /// Upper bound (exclusive) of the random check-in interval.
    pub max_interval_ms: u64,
    /// Delay before the very first check-in is armed.
    pub first_check_in_delay_ms: u64,
    /// Delay before the companion shows itself after launch.
    /// `None` disables the launch greeting.
    pub initial_show_delay_ms: Option<u64>,
    pub entrance_delay_ms: u64,
    pub exit_delay_ms: u64,
    pub wake_phrases: Vec<String>,
    pub match_mode: MatchMode,
    /// Wake-word dedup window after a match.
    pub cooldown_ms: u64,
    /// Base delay before restarting recognition after a transient fault.
    pub error_backoff_ms: u64,
    pub asset_load_timeout_ms: u64,
    pub default_volume: f32,
    pub sound_dir: Option<PathBuf>,
    /// "Take a break" pause length.
    pub break_duration_ms: u64,
    /// Whether the host grants microphone access when asked.
    pub microphone_allowed: bool,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 20 * MINUTE_MS,
            max_interval_ms: 45 * MINUTE_MS,
            first_check_in_delay_ms: 5 * MINUTE_MS,
            initial_show_delay_ms: Some(2000),
            entrance_delay_ms: 300,
            exit_delay_ms: 300,
            wake_phrases: vec!["hey minion".to_string(), "hey minime".to_string()],
            match_mode: MatchMode::Contains,
            cooldown_ms: 1000,
            error_backoff_ms: 1000,
            asset_load_timeout_ms: 1000,
            default_volume: 0.3,
            sound_dir: None,
            break_duration_ms: 60 * MINUTE_MS,
            microphone_allowed: true,
        }
    }
}

impl CompanionConfig {
    /// Fix up values that would break the runtime invariants.
    pub fn normalized(mut self) -> Self {
        if !self.default_volume.is_finite() {
            warn!(volume = self.default_volume, "Non-finite default volume, using 0.3");
            self.default_volume = 0.3;
        }
        self.default_volume = self.default_volume.clamp(0.0, 1.0);

        if self.max_interval_ms <= self.min_interval_ms {
            warn!(
                min = self.min_interval_ms,
                max = self.max_interval_ms,
                "Check-in interval bounds inverted or empty, widening max"
            );
            if self.min_interval_ms == u64::MAX {
                self.min_interval_ms -= 1;
            }
            self.max_interval_ms = self.min_interval_ms + 1;
        }

        self.wake_phrases = self
            .wake_phrases
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        self
    }

    pub fn entrance_delay(&self) -> Duration {
        Duration::from_millis(self.entrance_delay_ms)
    }

    pub fn exit_delay(&self) -> Duration {
        Duration::from_millis(self.exit_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn asset_load_timeout(&self) -> Duration {
        Duration::from_millis(self.asset_load_timeout_ms)
    }

    pub fn break_duration(&self) -> Duration {
        Duration::from_millis(self.break_duration_ms)
    }

    /// Resolved sound directory (config value or the data-dir default).
    pub fn resolved_sound_dir(&self) -> PathBuf {
        self.sound_dir.clone().unwrap_or_else(get_sound_dir)
    }
}

/// Read the companion config, falling back to defaults on any problem.
pub fn read_companion_config() -> CompanionConfig {
    let path = get_config_path();
    read_json_file::<CompanionConfig>(&path)
        .unwrap_or_default()
        .normalized()
}

/// Path to companion_config.json (or the `MINION_CONFIG` override).
pub fn get_config_path() -> PathBuf {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => get_data_dir().join("companion_config.json"),
    }
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: CompanionConfig =
            serde_json::from_str(r#"{"minIntervalMs": 1000, "maxIntervalMs": 2000}"#).unwrap();
        assert_eq!(cfg.min_interval_ms, 1000);
        assert_eq!(cfg.max_interval_ms, 2000);
        assert_eq!(cfg.exit_delay_ms, 300);
        assert_eq!(cfg.cooldown_ms, 1000);
        assert_eq!(cfg.match_mode, MatchMode::Contains);
    }

    #[test]
    fn test_normalized_clamps_and_fixes_bounds() {
        let cfg = CompanionConfig {
            default_volume: 4.0,
            min_interval_ms: 5000,
            max_interval_ms: 5000,
            wake_phrases: vec!["  hey minion ".into(), "   ".into()],
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.default_volume, 1.0);
        assert_eq!(cfg.max_interval_ms, 5001);
        assert_eq!(cfg.wake_phrases, vec!["hey minion".to_string()]);
    }

    #[test]
    fn test_normalized_handles_max_minimum_interval() {
        let cfg = CompanionConfig {
            min_interval_ms: u64::MAX,
            max_interval_ms: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.min_interval_ms, u64::MAX - 1);
        assert_eq!(cfg.max_interval_ms, u64::MAX);
    }

    #[test]
    fn test_match_mode_parses_lowercase() {
        let cfg: CompanionConfig = serde_json::from_str(r#"{"matchMode": "prefix"}"#).unwrap();
        assert_eq!(cfg.match_mode, MatchMode::Prefix);
    }

    #[test]
    fn test_read_json_file_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(read_json_file::<CompanionConfig>(&missing).is_none());
    }

    #[test]
    fn test_read_json_file_invalid_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(read_json_file::<CompanionConfig>(&path).is_none());
    }
}
