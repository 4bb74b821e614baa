//! Configuration for the session media engine
//!
//! Loaded once from the TOML bootstrap file (`config.toml` under the platform
//! config dir, or `--config`). Every section and key is optional; missing
//! values fall back to the built-in defaults below.
//!
//! ```toml
//! root_folder = "/home/me/.local/share/taskerino"
//!
//! [cache]
//! max_entries = 50
//! max_size_bytes = 104857600
//!
//! [timeline]
//! silence_tolerance_ms = 250
//! prefix_window_secs = 30.0
//! prefix_max_segments = 3
//!
//! [playback]
//! drift_threshold_ms = 300
//! tick_interval_ms = 250
//!
//! [logging]
//! level = "info"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tkr_common::config::{load_toml_or_default, LoggingConfig};

/// Attachment cache bounds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached attachments
    pub max_entries: usize,
    /// Maximum total payload bytes held by the cache
    pub max_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_size_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Audio timeline construction and progressive loading
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Gaps between consecutive segments up to this long are closed up;
    /// longer gaps are kept as silence so positions track real session time
    pub silence_tolerance_ms: u64,
    /// Seconds of audio loaded before playback may start
    pub prefix_window_secs: f64,
    /// Upper bound on segments in the startup prefix
    pub prefix_max_segments: usize,
}

impl TimelineConfig {
    pub fn silence_tolerance(&self) -> f64 {
        self.silence_tolerance_ms as f64 / 1000.0
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            silence_tolerance_ms: 250,
            prefix_window_secs: 30.0,
            prefix_max_segments: 3,
        }
    }
}

/// Playback engine clocking and legacy drift correction
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Audio/video drift above this triggers a one-shot correction
    pub drift_threshold_ms: u64,
    /// Period of the time-update tick
    pub tick_interval_ms: u64,
    /// Drift must fall below `threshold * ratio` before the corrector re-arms early
    pub drift_rearm_ratio: f64,
    /// Ticks after a correction before another correction may fire
    pub correction_cooldown_ticks: u32,
    /// Consecutive corrections after which drift is reported unrecoverable
    pub unrecoverable_after_corrections: u32,
    /// Broadcast capacity of the media event bus
    pub event_capacity: usize,
}

impl PlaybackConfig {
    pub fn drift_threshold(&self) -> f64 {
        self.drift_threshold_ms as f64 / 1000.0
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            drift_threshold_ms: 300,
            tick_interval_ms: 250,
            drift_rearm_ratio: 0.5,
            correction_cooldown_ticks: 4,
            unrecoverable_after_corrections: 5,
            event_capacity: 256,
        }
    }
}

/// Complete media engine configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Data root (attachments/ and sessions.json); CLI and env take priority
    pub root_folder: Option<PathBuf>,
    pub cache: CacheConfig,
    pub timeline: TimelineConfig,
    pub playback: PlaybackConfig,
    pub logging: LoggingConfig,
}

impl MediaConfig {
    /// Load from a TOML file, using defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        let config: MediaConfig = load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(Error::Config("cache.max_entries must be at least 1".into()));
        }
        if self.cache.max_size_bytes == 0 {
            return Err(Error::Config("cache.max_size_bytes must be at least 1".into()));
        }
        if !(self.timeline.prefix_window_secs.is_finite() && self.timeline.prefix_window_secs > 0.0) {
            return Err(Error::Config(format!(
                "timeline.prefix_window_secs must be positive, got {}",
                self.timeline.prefix_window_secs
            )));
        }
        if self.timeline.prefix_max_segments == 0 {
            return Err(Error::Config("timeline.prefix_max_segments must be at least 1".into()));
        }
        if self.playback.drift_threshold_ms == 0 {
            return Err(Error::Config("playback.drift_threshold_ms must be positive".into()));
        }
        if self.playback.tick_interval_ms == 0 {
            return Err(Error::Config("playback.tick_interval_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.playback.drift_rearm_ratio) {
            return Err(Error::Config(format!(
                "playback.drift_rearm_ratio must be within [0, 1], got {}",
                self.playback.drift_rearm_ratio
            )));
        }
        if self.playback.event_capacity == 0 {
            return Err(Error::Config("playback.event_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MediaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.max_size_bytes, 104_857_600);
        assert_eq!(config.timeline.silence_tolerance(), 0.25);
        assert_eq!(config.playback.drift_threshold(), 0.3);
        assert_eq!(config.playback.tick_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config: MediaConfig = toml::from_str(
            r#"
            [cache]
            max_entries = 10

            [playback]
            drift_threshold_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.max_size_bytes, CacheConfig::default().max_size_bytes);
        assert_eq!(config.playback.drift_threshold_ms, 500);
        assert_eq!(config.playback.tick_interval_ms, 250);
        assert_eq!(config.timeline, TimelineConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = MediaConfig::default();
        config.cache.max_entries = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = MediaConfig::default();
        config.playback.drift_rearm_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = MediaConfig::default();
        config.timeline.prefix_window_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MediaConfig::load(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, MediaConfig::default());
    }
}
