//! Stream configuration types
//!
//! Minimal configuration for the event store and stream sources. Rendering
//! and UI concerns are handled by the application layer; only the knobs the
//! core itself consults live here.

use serde::{Deserialize, Serialize};

/// Configuration for the event store and stream sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Snapshot commit rate in frames per second (consumer-side flush)
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Seconds without a frame before a message is flagged inactive
    #[serde(default = "default_active_window")]
    pub active_window_sec: f64,

    /// Whether bits covered by DBC-defined signals are excluded from the
    /// change detector (combined with user byte suppression)
    #[serde(default)]
    pub suppress_defined_signals: bool,

    /// Minimum per-id event count before a time index is maintained
    #[serde(default = "default_index_threshold")]
    pub time_index_threshold: usize,

    /// Initial playback speed for replay sources (1.0 = realtime)
    #[serde(default = "default_speed")]
    pub playback_speed: f64,
}

fn default_fps() -> u32 {
    30
}

fn default_active_window() -> f64 {
    2.0
}

fn default_index_threshold() -> usize {
    512
}

fn default_speed() -> f64 {
    1.0
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            active_window_sec: default_active_window(),
            suppress_defined_signals: false,
            time_index_threshold: default_index_threshold(),
            playback_speed: default_speed(),
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the snapshot commit rate
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    /// Builder method: set the inactive threshold in seconds
    pub fn with_active_window(mut self, seconds: f64) -> Self {
        self.active_window_sec = seconds;
        self
    }

    /// Builder method: enable or disable suppression of DBC-defined bits
    pub fn with_suppress_defined_signals(mut self, enabled: bool) -> Self {
        self.suppress_defined_signals = enabled;
        self
    }

    /// Builder method: set the time index maintenance threshold
    pub fn with_time_index_threshold(mut self, threshold: usize) -> Self {
        self.time_index_threshold = threshold;
        self
    }

    /// Builder method: set the initial playback speed
    pub fn with_playback_speed(mut self, speed: f64) -> Self {
        self.playback_speed = speed;
        self
    }

    /// Commit interval derived from the configured FPS
    pub fn commit_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = StreamConfig::new()
            .with_fps(60)
            .with_active_window(1.5)
            .with_suppress_defined_signals(true)
            .with_time_index_threshold(128);

        assert_eq!(config.fps, 60);
        assert_eq!(config.active_window_sec, 1.5);
        assert!(config.suppress_defined_signals);
        assert_eq!(config.time_index_threshold, 128);
    }

    #[test]
    fn test_commit_interval() {
        let config = StreamConfig::new().with_fps(30);
        let interval = config.commit_interval();
        assert!((interval.as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_fps_never_zero() {
        let config = StreamConfig::new().with_fps(0);
        assert_eq!(config.fps, 1);
    }
}
