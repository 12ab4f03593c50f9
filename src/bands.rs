// Band registry - brain-wave bands and their carrier/beat frequencies
//
// Each band maps to a fixed carrier (sent to the left ear) and a beat offset
// (added to the right ear). The perceived beat is the difference between the
// two tones, so only the beat value determines which band is entrained.
//
// The table is process-wide and read-only; lookups are total.

use std::fmt;
use std::str::FromStr;

/// Brain-wave band targeted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    /// 0.5-4 Hz: deep sleep and healing
    Delta,
    /// 4-8 Hz: meditation and creativity
    Theta,
    /// 8-13 Hz: relaxed focus
    Alpha,
    /// 13-30 Hz: active thinking
    Beta,
}

impl Band {
    /// Every band, lowest beat frequency first
    pub const ALL: [Band; 4] = [Band::Delta, Band::Theta, Band::Alpha, Band::Beta];

    /// Static configuration for this band
    pub fn config(self) -> &'static BandConfig {
        get_config(self)
    }

    /// Lowercase name used in configs, telemetry and the CLI
    pub fn as_str(self) -> &'static str {
        match self {
            Band::Delta => "delta",
            Band::Theta => "theta",
            Band::Alpha => "alpha",
            Band::Beta => "beta",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Band {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delta" => Ok(Band::Delta),
            "theta" => Ok(Band::Theta),
            "alpha" => Ok(Band::Alpha),
            "beta" => Ok(Band::Beta),
            other => Err(format!(
                "unknown band '{}' (expected delta, theta, alpha or beta)",
                other
            )),
        }
    }
}

/// Carrier/beat frequencies and descriptive metadata for one band
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BandConfig {
    /// Carrier tone in Hz, played in the left ear
    pub base_frequency_hz: f32,
    /// Offset in Hz added to the carrier for the right ear
    pub beat_frequency_hz: f32,
    pub description: &'static str,
    pub benefits: &'static [&'static str],
}

impl BandConfig {
    pub fn left_frequency_hz(&self) -> f32 {
        self.base_frequency_hz
    }

    pub fn right_frequency_hz(&self) -> f32 {
        self.base_frequency_hz + self.beat_frequency_hz
    }
}

static DELTA: BandConfig = BandConfig {
    base_frequency_hz: 200.0,
    beat_frequency_hz: 2.5,
    description: "Deep Sleep & Healing",
    benefits: &[
        "Deep restorative sleep",
        "Physical healing",
        "Pain relief",
        "Immune boost",
    ],
};

static THETA: BandConfig = BandConfig {
    base_frequency_hz: 200.0,
    beat_frequency_hz: 6.0,
    description: "Meditation & Creativity",
    benefits: &[
        "Deep meditation",
        "Creative insights",
        "Emotional healing",
        "Vivid imagery",
    ],
};

static ALPHA: BandConfig = BandConfig {
    base_frequency_hz: 200.0,
    beat_frequency_hz: 10.0,
    description: "Relaxed Focus",
    benefits: &[
        "Calm awareness",
        "Stress reduction",
        "Peak performance",
        "Learning enhancement",
    ],
};

static BETA: BandConfig = BandConfig {
    base_frequency_hz: 220.0,
    beat_frequency_hz: 18.0,
    description: "Active Thinking",
    benefits: &[
        "Mental clarity",
        "Problem solving",
        "Concentration",
        "Energy boost",
    ],
};

/// Look up the static configuration for a band
pub fn get_config(band: Band) -> &'static BandConfig {
    match band {
        Band::Delta => &DELTA,
        Band::Theta => &THETA,
        Band::Alpha => &ALPHA,
        Band::Beta => &BETA,
    }
}

/// Pick a band for a desired arousal level (0 = asleep, 1 = fully alert)
///
/// Thresholds: below 0.2 delta, below 0.4 theta, below 0.7 alpha, beta above.
/// NaN counts as 0.
pub fn recommended_band(arousal_target: f32) -> Band {
    let arousal_target = if arousal_target.is_nan() {
        0.0
    } else {
        arousal_target
    };
    if arousal_target < 0.2 {
        Band::Delta
    } else if arousal_target < 0.4 {
        Band::Theta
    } else if arousal_target < 0.7 {
        Band::Alpha
    } else {
        Band::Beta
    }
}
