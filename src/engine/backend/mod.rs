//! Backend abstractions for the binaural engine.
//!
//! The engine never synthesises audio itself. It asks a backend for
//! oscillator, gain and merger nodes, wires them together through opaque
//! [`NodeId`]s and drives them with frequency/gain ramps. Backends decide how
//! (or whether) that graph is rendered.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use crate::error::AudioError;

/// Opaque identifier for a node created by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Operations shared by every node handle.
///
/// Every method is a single fire-and-forget action. `dispose` is idempotent
/// and must tolerate stopped or already-disposed nodes.
pub trait AudioNode: Send + Sync {
    fn id(&self) -> NodeId;

    /// Route output channel `output` of this node into input `input` of `target`.
    fn connect(&self, target: NodeId, output: usize, input: usize);

    fn dispose(&self);
}

/// Sine oscillator handle.
pub trait OscillatorNode: AudioNode {
    /// Move to `frequency_hz`, linearly over `ramp` (zero = immediately).
    fn set_frequency(&self, frequency_hz: f32, ramp: Duration);
    fn start(&self);
    fn stop(&self);
}

/// Gain stage handle.
pub trait GainNode: AudioNode {
    /// Move to `value`, linearly over `ramp` (zero = immediately).
    fn set_gain(&self, value: f32, ramp: Duration);
}

/// Two-input stereo merger: input 0 feeds the left channel, input 1 the right.
pub trait MergerNode: AudioNode {}

/// Trait implemented by audio backends.
///
/// The engine holds one backend for its whole lifetime; it is chosen once by
/// whoever constructs the engine.
pub trait AudioBackend: Send + Sync {
    fn create_oscillator(&self, frequency_hz: f32) -> Box<dyn OscillatorNode>;
    fn create_gain(&self, initial_value: f32) -> Box<dyn GainNode>;
    fn create_merger(&self) -> Box<dyn MergerNode>;

    /// Sink node representing the audio output.
    fn destination(&self) -> NodeId;

    /// Activate the backend (open/resume the output). Must complete before
    /// oscillators are started.
    fn start(&self) -> BoxFuture<'_, Result<(), AudioError>>;
}

/// Trait representing a monotonic time source used for telemetry timestamps.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "cpal-backend")] {
        /// Backend used when the caller has no preference: real output through cpal.
        pub fn default_backend() -> Arc<dyn AudioBackend> {
            Arc::new(CpalBackend::new())
        }
    } else {
        /// Backend used when the caller has no preference: the silent stub, since
        /// this build has no `cpal-backend` feature.
        pub fn default_backend() -> Arc<dyn AudioBackend> {
            Arc::new(DesktopStubBackend::new())
        }
    }
}

#[cfg(feature = "cpal-backend")]
mod cpal;
#[cfg(feature = "cpal-backend")]
mod render;
#[cfg(feature = "cpal-backend")]
pub use self::cpal::CpalBackend;

mod desktop_stub;
pub use desktop_stub::{
    BackendCall, Connection, DesktopStubBackend, NodeKind, StubNodeState, StubTimeSource,
};
