//! Stereo binaural signal graph.
//!
//! ```text
//! left osc  -> left gain  -> merger[0] \
//!                                        merger -> master gain -> destination
//! right osc -> right gain -> merger[1] /
//! ```

use std::time::Duration;

use crate::bands::BandConfig;
use crate::engine::backend::{AudioBackend, GainNode, MergerNode, OscillatorNode};

/// Per-channel gain ceiling. Binaural tones must sit below conscious loudness.
pub const CHANNEL_GAIN_CEILING: f32 = 0.08;

/// Left/right oscillators, their channel gains, the merger and the master gain.
///
/// Built all at once by [`SignalGraph::build`] and released all at once by
/// [`SignalGraph::dispose`], so a partially built graph never exists.
pub struct SignalGraph {
    pub(crate) left_oscillator: Box<dyn OscillatorNode>,
    pub(crate) right_oscillator: Box<dyn OscillatorNode>,
    pub(crate) left_gain: Box<dyn GainNode>,
    pub(crate) right_gain: Box<dyn GainNode>,
    pub(crate) merger: Box<dyn MergerNode>,
    pub(crate) master_gain: Box<dyn GainNode>,
}

impl SignalGraph {
    /// Create and wire the six nodes for `config`.
    ///
    /// Master gain starts silent; the caller fades it in.
    pub fn build(backend: &dyn AudioBackend, config: &BandConfig) -> Self {
        let left_oscillator = backend.create_oscillator(config.left_frequency_hz());
        let right_oscillator = backend.create_oscillator(config.right_frequency_hz());
        let left_gain = backend.create_gain(CHANNEL_GAIN_CEILING);
        let right_gain = backend.create_gain(CHANNEL_GAIN_CEILING);
        let master_gain = backend.create_gain(0.0);
        let merger = backend.create_merger();

        // Merger input 0 is the left ear, input 1 the right. Swapping them
        // inverts the beat.
        left_oscillator.connect(left_gain.id(), 0, 0);
        left_gain.connect(merger.id(), 0, 0);
        right_oscillator.connect(right_gain.id(), 0, 0);
        right_gain.connect(merger.id(), 0, 1);
        merger.connect(master_gain.id(), 0, 0);
        master_gain.connect(backend.destination(), 0, 0);

        Self {
            left_oscillator,
            right_oscillator,
            left_gain,
            right_gain,
            merger,
            master_gain,
        }
    }

    /// Retune both oscillators to `config` over `ramp`.
    pub fn tune(&self, config: &BandConfig, ramp: Duration) {
        self.left_oscillator
            .set_frequency(config.left_frequency_hz(), ramp);
        self.right_oscillator
            .set_frequency(config.right_frequency_hz(), ramp);
    }

    pub fn start_oscillators(&self) {
        self.left_oscillator.start();
        self.right_oscillator.start();
    }

    pub fn stop_oscillators(&self) {
        self.left_oscillator.stop();
        self.right_oscillator.stop();
    }

    pub fn set_master(&self, value: f32, ramp: Duration) {
        self.master_gain.set_gain(value, ramp);
    }

    pub fn set_channel_gain(&self, value: f32, ramp: Duration) {
        self.left_gain.set_gain(value, ramp);
        self.right_gain.set_gain(value, ramp);
    }

    /// Release every node. Consumes the graph so no handle outlives disposal.
    pub fn dispose(self) {
        self.left_oscillator.dispose();
        self.right_oscillator.dispose();
        self.left_gain.dispose();
        self.right_gain.dispose();
        self.merger.dispose();
        self.master_gain.dispose();
    }
}
