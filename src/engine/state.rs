//! Engine lifecycle state.

use tokio::task::JoinHandle;

use crate::bands::Band;

/// Observable lifecycle stage of an engine.
///
/// `Uninitialized -> Ready -> Running -> Stopping -> Ready`, and any stage to
/// the terminal `Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// No signal graph yet
    Uninitialized,
    /// Graph built, oscillators stopped
    Ready,
    /// Oscillators running, no fade-out pending
    Running,
    /// Fade-out in progress; oscillators still running
    Stopping,
    Disposed,
}

/// Fade-out continuation that will stop the oscillators once it fires.
pub(crate) struct PendingStop {
    /// Continuation only acts if this still matches the scheduled generation
    pub(crate) generation: u64,
    pub(crate) task: JoinHandle<()>,
}

impl PendingStop {
    pub(crate) fn cancel(self) {
        self.task.abort();
    }
}

/// Mutable session state guarded by the engine lock.
pub(crate) struct EngineState {
    pub(crate) current_band: Band,
    /// True from oscillator start until they are actually stopped
    pub(crate) is_active: bool,
    pub(crate) pending_stop: Option<PendingStop>,
}

impl EngineState {
    pub(crate) fn new(initial_band: Band) -> Self {
        Self {
            current_band: initial_band,
            is_active: false,
            pending_stop: None,
        }
    }

    /// Abort any scheduled fade-out stop. Returns true if one was pending.
    pub(crate) fn cancel_pending_stop(&mut self) -> bool {
        match self.pending_stop.take() {
            Some(pending) => {
                pending.cancel();
                true
            }
            None => false,
        }
    }
}
