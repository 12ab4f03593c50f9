//! BinauralEngine: lifecycle, fade timing and band transitions.
//!
//! The engine owns one signal graph built on an injected [`AudioBackend`] and
//! sequences every change to it so the listener never hears a click:
//! oscillators only start under a silent master gain, band changes glide the
//! frequencies, and oscillators are only stopped once the master fade-out has
//! reached zero. Calls that make no sense in the current state are logged
//! no-ops.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::bands::{get_config, Band, BandConfig};
use crate::breath::{breath_target, BreathPhase, BreathTarget};
use crate::config::{EngineConfig, SessionConfig};
use crate::engine::backend::{AudioBackend, SystemTimeSource, TimeSource};
use crate::engine::graph::{SignalGraph, CHANNEL_GAIN_CEILING};
use crate::engine::state::{EngineState, EngineStatus, PendingStop};
use crate::error::{log_audio_error, AudioError, ErrorCode};
use crate::telemetry::{EngineEvent, EngineEventKind, TelemetryCollector, TelemetrySnapshot};

/// Channel-gain ramp applied by `set_volume`.
const VOLUME_RAMP: Duration = Duration::from_millis(500);

struct EngineInner {
    graph: Option<SignalGraph>,
    state: EngineState,
    /// Public volume knob in [0, 1]
    volume: f32,
    disposed: bool,
    stop_generation: u64,
}

impl EngineInner {
    fn status(&self) -> EngineStatus {
        if self.disposed {
            EngineStatus::Disposed
        } else if self.graph.is_none() {
            EngineStatus::Uninitialized
        } else if !self.state.is_active {
            EngineStatus::Ready
        } else if self.state.pending_stop.is_some() {
            EngineStatus::Stopping
        } else {
            EngineStatus::Running
        }
    }

    /// Stop both oscillators and mark the session inactive.
    fn halt(&mut self) {
        if let Some(graph) = self.graph.as_ref() {
            graph.stop_oscillators();
        }
        self.state.is_active = false;
    }
}

fn lock(inner: &Mutex<EngineInner>) -> MutexGuard<'_, EngineInner> {
    inner.lock().unwrap_or_else(|poisoned| {
        log::warn!("[BinauralEngine] State lock poisoned; recovering");
        poisoned.into_inner()
    })
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Binaural entrainment engine bound to one backend.
pub struct BinauralEngine {
    backend: Arc<dyn AudioBackend>,
    session: SessionConfig,
    inner: Arc<Mutex<EngineInner>>,
    telemetry: Arc<TelemetryCollector>,
}

impl BinauralEngine {
    /// Create an engine with default configuration.
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: Arc<dyn AudioBackend>, config: EngineConfig) -> Self {
        Self::with_time_source(backend, config, Arc::new(SystemTimeSource::default()))
    }

    pub fn with_time_source(
        backend: Arc<dyn AudioBackend>,
        config: EngineConfig,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        let telemetry = Arc::new(TelemetryCollector::new(&config.telemetry, time_source));
        let inner = EngineInner {
            graph: None,
            state: EngineState::new(config.session.initial_band),
            volume: 1.0,
            disposed: false,
            stop_generation: 0,
        };

        Self {
            backend,
            session: config.session,
            inner: Arc::new(Mutex::new(inner)),
            telemetry,
        }
    }

    /// Static band lookup, available without an engine instance.
    pub fn get_config(band: Band) -> &'static BandConfig {
        get_config(band)
    }

    fn lock_inner(&self) -> MutexGuard<'_, EngineInner> {
        lock(&self.inner)
    }

    fn ignored(&self, operation: &str, status: EngineStatus) {
        log::debug!(
            "[BinauralEngine] Ignoring {} while {:?}",
            operation,
            status
        );
        self.telemetry.publish(
            EngineEventKind::Ignored {
                operation: operation.to_string(),
            },
            None,
        );
    }

    /// Build the graph for the current band if it does not exist yet.
    ///
    /// Returns false when the engine is disposed.
    fn ensure_graph(&self, inner: &mut EngineInner) -> bool {
        if inner.disposed {
            self.ignored("initialize", inner.status());
            return false;
        }
        if inner.graph.is_some() {
            return true;
        }

        let band = inner.state.current_band;
        let graph = SignalGraph::build(self.backend.as_ref(), get_config(band));
        if inner.volume < 1.0 {
            graph.set_channel_gain(inner.volume * CHANNEL_GAIN_CEILING, Duration::ZERO);
        }
        inner.graph = Some(graph);

        log::info!("[BinauralEngine] Signal graph built for {}", band);
        self.telemetry
            .publish(EngineEventKind::GraphBuilt { band }, None);
        true
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Build the signal graph. Repeated calls are no-ops.
    pub fn initialize(&self) {
        let mut inner = self.lock_inner();
        self.ensure_graph(&mut inner);
    }

    /// Start (or re-target) the session using the configured fade-in.
    pub async fn start(&self, band: Band) -> Result<(), AudioError> {
        self.start_with_fade(band, self.session.fade_in()).await
    }

    /// Start sound on `band`, fading the master gain in over `fade_in`.
    ///
    /// Waits for backend activation first; if that fails the error is
    /// returned and the engine stays where it was. Calling this while already
    /// running re-applies the band and fade without restarting oscillators,
    /// and cancels any fade-out that was scheduled by `stop`.
    pub async fn start_with_fade(&self, band: Band, fade_in: Duration) -> Result<(), AudioError> {
        {
            let mut inner = self.lock_inner();
            if !self.ensure_graph(&mut inner) {
                return Ok(());
            }
        }

        if let Err(err) = self.backend.start().await {
            log_audio_error(&err, "BinauralEngine::start");
            self.telemetry.publish(
                EngineEventKind::ActivationFailed { code: err.code() },
                Some(err.message()),
            );
            return Err(err);
        }

        let mut inner = self.lock_inner();
        if inner.disposed {
            self.ignored("start", EngineStatus::Disposed);
            return Ok(());
        }

        if inner.state.cancel_pending_stop() {
            log::info!("[BinauralEngine] Pending fade-out superseded by start");
            self.telemetry
                .publish(EngineEventKind::StopSuperseded, None);
        }

        let was_active = inner.state.is_active;
        if let Some(graph) = inner.graph.as_ref() {
            graph.tune(get_config(band), Duration::ZERO);
            if !was_active {
                graph.set_master(0.0, Duration::ZERO);
                graph.start_oscillators();
            }
            graph.set_master(1.0, fade_in);
        }
        inner.state.current_band = band;
        inner.state.is_active = true;

        log::info!(
            "[BinauralEngine] Started {} (fade-in {:?}, restart={})",
            band,
            fade_in,
            was_active
        );
        self.telemetry.publish(
            EngineEventKind::Started {
                band,
                fade_in_ms: millis(fade_in),
            },
            None,
        );
        Ok(())
    }

    /// Glide to `band` using the configured transition time.
    pub fn set_state(&self, band: Band) -> bool {
        self.set_state_with_transition(band, self.session.transition())
    }

    /// Ramp both oscillators to `band` over `transition`.
    ///
    /// Only applies while active; returns whether the transition was issued.
    /// Gain and oscillator run state are left untouched.
    pub fn set_state_with_transition(&self, band: Band, transition: Duration) -> bool {
        let mut inner = self.lock_inner();
        if inner.disposed || !inner.state.is_active {
            self.ignored("set_state", inner.status());
            return false;
        }

        let from = inner.state.current_band;
        if let Some(graph) = inner.graph.as_ref() {
            graph.tune(get_config(band), transition);
        }
        inner.state.current_band = band;

        log::debug!(
            "[BinauralEngine] Transition {} -> {} over {:?}",
            from,
            band,
            transition
        );
        self.telemetry.publish(
            EngineEventKind::Transition {
                from,
                to: band,
                transition_ms: millis(transition),
            },
            None,
        );
        true
    }

    /// Fade out using the configured fade-out time.
    pub fn stop(&self) {
        self.stop_with_fade(self.session.fade_out())
    }

    /// Fade the master gain to zero over `fade_out`, then stop the oscillators.
    ///
    /// The oscillator stop runs as a scheduled task on the current tokio
    /// runtime and is cancelled by a later `start` or `dispose`. A zero fade
    /// stops immediately.
    pub fn stop_with_fade(&self, fade_out: Duration) {
        let mut inner = self.lock_inner();
        if inner.disposed || !inner.state.is_active {
            self.ignored("stop", inner.status());
            return;
        }

        inner.state.cancel_pending_stop();
        if let Some(graph) = inner.graph.as_ref() {
            graph.set_master(0.0, fade_out);
        }

        if fade_out.is_zero() {
            inner.halt();
            log::info!("[BinauralEngine] Stopped immediately");
            self.telemetry.publish(EngineEventKind::Stopped, None);
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                log::warn!(
                    "[BinauralEngine] No tokio runtime to schedule fade-out; stopping immediately"
                );
                // Silence first: oscillators must not stop under a non-zero master.
                if let Some(graph) = inner.graph.as_ref() {
                    graph.set_master(0.0, Duration::ZERO);
                }
                inner.halt();
                self.telemetry.publish(
                    EngineEventKind::Stopped,
                    Some("no runtime for fade-out".to_string()),
                );
                return;
            }
        };

        inner.stop_generation += 1;
        let generation = inner.stop_generation;
        let shared = Arc::clone(&self.inner);
        let telemetry = Arc::clone(&self.telemetry);
        let task = runtime.spawn(async move {
            tokio::time::sleep(fade_out).await;
            complete_stop(&shared, &telemetry, generation);
        });
        inner.state.pending_stop = Some(PendingStop { generation, task });

        log::info!("[BinauralEngine] Fade-out scheduled over {:?}", fade_out);
        self.telemetry.publish(
            EngineEventKind::FadeOutScheduled {
                fade_out_ms: millis(fade_out),
            },
            None,
        );
    }

    /// Stop immediately and release every node. Terminal and idempotent.
    pub fn dispose(&self) {
        let mut inner = self.lock_inner();
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        inner.state.cancel_pending_stop();

        if let Some(graph) = inner.graph.take() {
            graph.set_master(0.0, Duration::ZERO);
            if inner.state.is_active {
                graph.stop_oscillators();
            }
            graph.dispose();
        }
        inner.state.is_active = false;

        log::info!("[BinauralEngine] Disposed");
        self.telemetry.publish(EngineEventKind::Disposed, None);
    }

    // ========================================================================
    // CONTROLS
    // ========================================================================

    /// Set the listening volume in [0, 1] (clamped; NaN counts as 0).
    ///
    /// Scaled by the channel gain ceiling and applied to both channel gains
    /// over a short ramp. Independent of the master fade.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        let gain = volume * CHANNEL_GAIN_CEILING;

        let mut inner = self.lock_inner();
        if inner.disposed {
            self.ignored("set_volume", EngineStatus::Disposed);
            return;
        }
        inner.volume = volume;
        if let Some(graph) = inner.graph.as_ref() {
            graph.set_channel_gain(gain, VOLUME_RAMP);
        }

        self.telemetry
            .publish(EngineEventKind::VolumeChanged { volume, gain }, None);
    }

    /// Apply the breath-phase policy. Ignored unless the engine is active.
    ///
    /// Returns the transition that was issued, if any.
    pub fn on_breath_phase(&self, phase: BreathPhase, arousal_target: f32) -> Option<BreathTarget> {
        let target = breath_target(phase, arousal_target);
        if self.set_state_with_transition(target.band, target.transition) {
            Some(target)
        } else {
            None
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn current_band(&self) -> Band {
        self.lock_inner().state.current_band
    }

    /// True from oscillator start until they are actually stopped.
    pub fn is_running(&self) -> bool {
        let inner = self.lock_inner();
        !inner.disposed && inner.state.is_active
    }

    pub fn status(&self) -> EngineStatus {
        self.lock_inner().status()
    }

    pub fn volume(&self) -> f32 {
        self.lock_inner().volume
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<EngineEvent> {
        self.telemetry.subscribe()
    }

    pub fn telemetry_stream(&self) -> BroadcastStream<EngineEvent> {
        self.telemetry.stream()
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }
}

/// Body of the fade-out continuation.
///
/// Acts only if it is still the pending stop it was scheduled as; a `start`
/// or `dispose` in the meantime clears or replaces that entry.
fn complete_stop(shared: &Mutex<EngineInner>, telemetry: &TelemetryCollector, generation: u64) {
    let mut inner = lock(shared);
    let pending = inner.state.pending_stop.as_ref().map(|p| p.generation);
    if pending != Some(generation) {
        log::debug!(
            "[BinauralEngine] Stale fade-out continuation {} ignored",
            generation
        );
        return;
    }

    inner.state.pending_stop = None;
    inner.halt();
    log::info!("[BinauralEngine] Fade-out complete; oscillators stopped");
    telemetry.publish(EngineEventKind::Stopped, None);
}

impl Drop for BinauralEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests;
