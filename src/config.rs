//! Configuration for session timing and telemetry
//!
//! Default fade/transition durations and telemetry buffer sizes can be tuned
//! from a JSON file without recompiling. Missing or malformed files fall back
//! to the built-in defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::bands::Band;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Default timings used when a caller does not pass an explicit duration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Band the graph is built for before the first `start`
    pub initial_band: Band,
    /// Master gain fade-in on start, in seconds
    pub fade_in_secs: f32,
    /// Frequency glide between bands, in seconds
    pub transition_secs: f32,
    /// Master gain fade-out on stop, in seconds
    pub fade_out_secs: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_band: Band::Alpha,
            fade_in_secs: 3.0,
            transition_secs: 4.0,
            fade_out_secs: 2.0,
        }
    }
}

impl SessionConfig {
    pub fn fade_in(&self) -> Duration {
        secs_to_duration(self.fade_in_secs)
    }

    pub fn transition(&self) -> Duration {
        secs_to_duration(self.transition_secs)
    }

    pub fn fade_out(&self) -> Duration {
        secs_to_duration(self.fade_out_secs)
    }
}

/// Telemetry channel sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Broadcast channel capacity for live subscribers
    pub channel_capacity: usize,
    /// Number of recent events retained for snapshots
    pub history_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 128,
            history_capacity: 64,
        }
    }
}

/// Convert caller-supplied seconds to a ramp duration.
///
/// Negative, NaN and out-of-range values become an immediate (zero) ramp.
pub fn secs_to_duration(secs: f32) -> Duration {
    Duration::try_from_secs_f32(secs.max(0.0)).unwrap_or(Duration::ZERO)
}

impl EngineConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// Loaded configuration, or the defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/binaural_config.json")
    }
}
