// Binaural Engine - brain-wave entrainment core
// Two detuned oscillators, breath-synchronised band transitions, click-free fades

pub mod bands;
pub mod breath;
pub mod config;
pub mod engine;
pub mod error;
pub mod telemetry;

// Re-exports for convenience
pub use bands::{get_config, recommended_band, Band, BandConfig};
pub use breath::{breath_target, BreathPhase, BreathTarget};
pub use config::EngineConfig;
pub use engine::{AudioBackend, BinauralEngine, DesktopStubBackend, EngineStatus};
pub use error::{AudioError, ErrorCode};
