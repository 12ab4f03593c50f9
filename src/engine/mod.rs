//! Engine module housing the binaural audio core.
//!
//! This module exposes trait-based backends (`backend`), the signal graph
//! they are wired into (`graph`) and the `BinauralEngine` lifecycle layer
//! (`core`).

pub mod backend;
pub mod core;
pub mod graph;
pub mod state;

#[cfg(feature = "cpal-backend")]
pub use backend::CpalBackend;
pub use backend::{
    default_backend, AudioBackend, DesktopStubBackend, NodeId, StubTimeSource, SystemTimeSource,
    TimeSource,
};
pub use self::core::BinauralEngine;
pub use graph::{SignalGraph, CHANNEL_GAIN_CEILING};
pub use state::EngineStatus;
