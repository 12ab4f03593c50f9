//! Breath-phase to band mapping.
//!
//! A pure policy: the engine feeds it the phase reported by an external
//! breathing pacer plus the session's arousal target and applies the result
//! with `set_state`. It never starts or stops sound.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::bands::Band;

const INHALE_EXHALE_TRANSITION: Duration = Duration::from_secs(2);
const HOLD_TRANSITION: Duration = Duration::from_secs(3);

/// Phase of the breathing cycle reported by the pacer
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreathPhase {
    Inhale,
    Exhale,
    Hold,
}

impl fmt::Display for BreathPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BreathPhase::Inhale => "inhale",
            BreathPhase::Exhale => "exhale",
            BreathPhase::Hold => "hold",
        };
        f.write_str(name)
    }
}

impl FromStr for BreathPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inhale" => Ok(BreathPhase::Inhale),
            "exhale" => Ok(BreathPhase::Exhale),
            "hold" => Ok(BreathPhase::Hold),
            other => Err(format!(
                "unknown breath phase '{}' (expected inhale, exhale or hold)",
                other
            )),
        }
    }
}

/// Band and ramp time derived from a breath phase
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct BreathTarget {
    pub band: Band,
    #[serde(with = "duration_secs")]
    pub transition: Duration,
}

/// Map a breath phase and arousal target (0..=1) to a band transition
pub fn breath_target(phase: BreathPhase, arousal_target: f32) -> BreathTarget {
    match phase {
        BreathPhase::Inhale => BreathTarget {
            band: if arousal_target > 0.5 {
                Band::Alpha
            } else {
                Band::Theta
            },
            transition: INHALE_EXHALE_TRANSITION,
        },
        BreathPhase::Exhale => BreathTarget {
            band: Band::Theta,
            transition: INHALE_EXHALE_TRANSITION,
        },
        BreathPhase::Hold => BreathTarget {
            band: if arousal_target < 0.3 {
                Band::Delta
            } else {
                Band::Theta
            },
            transition: HOLD_TRANSITION,
        },
    }
}

mod duration_secs {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f32(value.as_secs_f32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inhale_follows_arousal() {
        let calm = breath_target(BreathPhase::Inhale, 0.5);
        assert_eq!(calm.band, Band::Theta);
        assert_eq!(calm.transition, Duration::from_secs(2));

        let alert = breath_target(BreathPhase::Inhale, 0.51);
        assert_eq!(alert.band, Band::Alpha);
    }

    #[test]
    fn test_exhale_always_theta() {
        for arousal in [0.0, 0.3, 0.9] {
            let target = breath_target(BreathPhase::Exhale, arousal);
            assert_eq!(target.band, Band::Theta);
            assert_eq!(target.transition, Duration::from_secs(2));
        }
    }

    #[test]
    fn test_hold_drops_to_delta_when_calm() {
        let deep = breath_target(BreathPhase::Hold, 0.1);
        assert_eq!(deep.band, Band::Delta);
        assert_eq!(deep.transition, Duration::from_secs(3));

        assert_eq!(breath_target(BreathPhase::Hold, 0.3).band, Band::Theta);
    }

    #[test]
    fn test_nan_arousal_falls_back_to_theta() {
        assert_eq!(breath_target(BreathPhase::Inhale, f32::NAN).band, Band::Theta);
        assert_eq!(breath_target(BreathPhase::Hold, f32::NAN).band, Band::Theta);
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!("HOLD".parse::<BreathPhase>(), Ok(BreathPhase::Hold));
        assert!("pause".parse::<BreathPhase>().is_err());
    }

    #[test]
    fn test_target_serializes_seconds() {
        let json = serde_json::to_value(breath_target(BreathPhase::Hold, 0.0)).unwrap();
        assert_eq!(json["band"], "delta");
        assert_eq!(json["transition"], 3.0);
    }
}
