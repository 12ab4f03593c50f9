use super::*;
use crate::engine::backend::{BackendCall, DesktopStubBackend, NodeId, NodeKind};

fn engine_with_stub() -> (BinauralEngine, Arc<DesktopStubBackend>) {
    let backend = Arc::new(DesktopStubBackend::new());
    let engine = BinauralEngine::new(backend.clone());
    (engine, backend)
}

fn oscillator_ids(backend: &DesktopStubBackend) -> (NodeId, NodeId) {
    let oscillators = backend.nodes_of_kind(NodeKind::Oscillator);
    (oscillators[0].0, oscillators[1].0)
}

/// (left gain, right gain, master gain)
fn gain_ids(backend: &DesktopStubBackend) -> (NodeId, NodeId, NodeId) {
    let gains = backend.nodes_of_kind(NodeKind::Gain);
    (gains[0].0, gains[1].0, gains[2].0)
}

fn gain_calls(backend: &DesktopStubBackend, node: NodeId) -> Vec<(f32, Duration)> {
    backend
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            BackendCall::SetGain { id, value, ramp } if id == node => Some((value, ramp)),
            _ => None,
        })
        .collect()
}

#[test]
fn initialize_is_idempotent() {
    let (engine, backend) = engine_with_stub();
    assert_eq!(engine.status(), EngineStatus::Uninitialized);

    engine.initialize();
    engine.initialize();

    assert_eq!(backend.nodes_of_kind(NodeKind::Oscillator).len(), 2);
    assert_eq!(backend.live_node_count(), 6);
    assert_eq!(engine.status(), EngineStatus::Ready);
    assert!(!engine.is_running());
}

#[tokio::test(start_paused = true)]
async fn start_sets_frequencies_and_fades_in() {
    let (engine, backend) = engine_with_stub();
    engine
        .start_with_fade(Band::Theta, Duration::from_secs(3))
        .await
        .unwrap();

    let (left, right) = oscillator_ids(&backend);
    let left_state = backend.node(left).unwrap();
    let right_state = backend.node(right).unwrap();
    assert_eq!(left_state.frequency_hz, Some(200.0));
    assert_eq!(right_state.frequency_hz, Some(206.0));
    assert!(left_state.running && right_state.running);

    let (_, _, master) = gain_ids(&backend);
    let master_calls = gain_calls(&backend, master);
    assert_eq!(
        master_calls,
        vec![(0.0, Duration::ZERO), (1.0, Duration::from_secs(3))]
    );

    assert_eq!(engine.current_band(), Band::Theta);
    assert_eq!(engine.status(), EngineStatus::Running);
    assert_eq!(backend.activation_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn double_start_builds_one_graph_and_starts_once() {
    let (engine, backend) = engine_with_stub();
    engine.start(Band::Theta).await.unwrap();
    engine.start(Band::Alpha).await.unwrap();

    let oscillators = backend.nodes_of_kind(NodeKind::Oscillator);
    assert_eq!(oscillators.len(), 2);
    for (_, state) in &oscillators {
        assert_eq!(state.start_count, 1);
        assert_eq!(state.stop_count, 0);
    }
    assert_eq!(oscillators[1].1.frequency_hz, Some(210.0));
    assert_eq!(engine.current_band(), Band::Alpha);
}

#[tokio::test(start_paused = true)]
async fn set_state_glides_without_stopping() {
    let (engine, backend) = engine_with_stub();
    engine.start(Band::Theta).await.unwrap();

    assert!(engine.set_state_with_transition(Band::Delta, Duration::from_secs(4)));

    let (left, right) = oscillator_ids(&backend);
    let left_state = backend.node(left).unwrap();
    let right_state = backend.node(right).unwrap();
    assert_eq!(left_state.frequency_hz, Some(200.0));
    assert_eq!(left_state.last_ramp, Duration::from_secs(4));
    assert_eq!(right_state.frequency_hz, Some(202.5));
    assert_eq!(right_state.last_ramp, Duration::from_secs(4));
    assert_eq!(right_state.stop_count, 0);
    assert_eq!(engine.current_band(), Band::Delta);
}

#[test]
fn set_state_while_inactive_is_ignored() {
    let (engine, backend) = engine_with_stub();
    engine.initialize();

    assert!(!engine.set_state(Band::Beta));
    assert!(!backend
        .calls()
        .iter()
        .any(|call| matches!(call, BackendCall::SetFrequency { .. })));
    assert_eq!(engine.current_band(), Band::Alpha);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_fade_before_stopping_oscillators() {
    let (engine, backend) = engine_with_stub();
    engine.start(Band::Theta).await.unwrap();

    engine.stop_with_fade(Duration::from_secs(2));
    assert_eq!(engine.status(), EngineStatus::Stopping);
    assert!(engine.is_running());

    tokio::time::sleep(Duration::from_millis(1900)).await;
    let (left, _) = oscillator_ids(&backend);
    assert_eq!(backend.node(left).unwrap().stop_count, 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.node(left).unwrap().stop_count, 1);
    assert_eq!(engine.status(), EngineStatus::Ready);
    assert!(!engine.is_running());

    let (_, _, master) = gain_ids(&backend);
    let calls = backend.calls();
    let fade_index = calls
        .iter()
        .position(|call| {
            matches!(call, BackendCall::SetGain { id, value, .. } if *id == master && *value == 0.0)
                && !matches!(call, BackendCall::SetGain { ramp, .. } if ramp.is_zero())
        })
        .unwrap();
    let stop_index = calls
        .iter()
        .position(|call| matches!(call, BackendCall::Stop { .. }))
        .unwrap();
    assert!(fade_index < stop_index);
}

#[tokio::test(start_paused = true)]
async fn start_during_fade_out_cancels_pending_stop() {
    let (engine, backend) = engine_with_stub();
    engine.start(Band::Theta).await.unwrap();
    engine.stop_with_fade(Duration::from_secs(2));

    tokio::time::sleep(Duration::from_millis(500)).await;
    engine
        .start_with_fade(Band::Alpha, Duration::from_secs(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;

    let (left, right) = oscillator_ids(&backend);
    assert_eq!(backend.node(left).unwrap().stop_count, 0);
    assert_eq!(backend.node(right).unwrap().start_count, 1);
    assert_eq!(engine.status(), EngineStatus::Running);
    assert_eq!(engine.current_band(), Band::Alpha);
}

#[tokio::test(start_paused = true)]
async fn repeated_stop_reschedules_single_continuation() {
    let (engine, backend) = engine_with_stub();
    engine.start(Band::Theta).await.unwrap();

    engine.stop_with_fade(Duration::from_secs(2));
    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.stop_with_fade(Duration::from_secs(3));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(engine.status(), EngineStatus::Stopping);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let (left, _) = oscillator_ids(&backend);
    assert_eq!(backend.node(left).unwrap().stop_count, 1);
    assert_eq!(engine.status(), EngineStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn zero_fade_stops_immediately() {
    let (engine, backend) = engine_with_stub();
    engine.start(Band::Beta).await.unwrap();
    engine.stop_with_fade(Duration::ZERO);

    let (left, right) = oscillator_ids(&backend);
    assert!(!backend.node(left).unwrap().running);
    assert!(!backend.node(right).unwrap().running);
    assert_eq!(engine.status(), EngineStatus::Ready);
}

#[test]
fn stop_without_runtime_silences_then_stops() {
    let (engine, backend) = engine_with_stub();
    futures::executor::block_on(engine.start(Band::Theta)).unwrap();

    engine.stop_with_fade(Duration::from_secs(2));

    let (left, _) = oscillator_ids(&backend);
    assert_eq!(backend.node(left).unwrap().stop_count, 1);
    assert!(!engine.is_running());

    // Master is snapped to zero after the fade ramp and before the oscillators stop.
    let (_, _, master) = gain_ids(&backend);
    let calls = backend.calls();
    let is_master_gain = |call: &BackendCall, target: f32, wanted: Duration| {
        matches!(call, BackendCall::SetGain { id, value, ramp }
            if *id == master && *value == target && *ramp == wanted)
    };
    let fade = calls
        .iter()
        .position(|call| is_master_gain(call, 0.0, Duration::from_secs(2)))
        .unwrap();
    let first_stop = calls
        .iter()
        .position(|call| matches!(call, BackendCall::Stop { .. }))
        .unwrap();
    assert!(fade < first_stop);
    assert!(calls[fade..first_stop]
        .iter()
        .any(|call| is_master_gain(call, 0.0, Duration::ZERO)));
}

#[test]
fn stop_while_inactive_is_ignored() {
    let (engine, backend) = engine_with_stub();
    engine.stop();
    engine.initialize();
    engine.stop();

    assert!(!backend
        .calls()
        .iter()
        .any(|call| matches!(call, BackendCall::Stop { .. } | BackendCall::SetGain { .. })));
}

#[tokio::test(start_paused = true)]
async fn activation_failure_leaves_engine_ready() {
    let (engine, backend) = engine_with_stub();
    backend.fail_next_activations(1);

    let result = engine.start(Band::Theta).await;
    assert!(matches!(result, Err(AudioError::ActivationFailed { .. })));
    assert_eq!(engine.status(), EngineStatus::Ready);
    assert!(!engine.is_running());
    assert!(!backend
        .calls()
        .iter()
        .any(|call| matches!(call, BackendCall::Start { .. })));

    engine.start(Band::Theta).await.unwrap();
    assert_eq!(engine.status(), EngineStatus::Running);
    assert_eq!(backend.nodes_of_kind(NodeKind::Oscillator).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn set_volume_clamps_to_ceiling() {
    let (engine, backend) = engine_with_stub();
    engine.start(Band::Theta).await.unwrap();
    let (left, right, _) = gain_ids(&backend);

    engine.set_volume(1.5);
    assert_eq!(backend.node(left).unwrap().gain, Some(0.08));
    assert_eq!(backend.node(right).unwrap().gain, Some(0.08));
    assert_eq!(backend.node(left).unwrap().last_ramp, Duration::from_millis(500));

    engine.set_volume(-1.0);
    assert_eq!(backend.node(left).unwrap().gain, Some(0.0));
    assert_eq!(backend.node(right).unwrap().gain, Some(0.0));
    assert_eq!(engine.volume(), 0.0);

    engine.set_volume(f32::NAN);
    assert_eq!(engine.volume(), 0.0);
}

#[test]
fn volume_set_before_graph_is_applied_on_build() {
    let (engine, backend) = engine_with_stub();
    engine.set_volume(0.5);
    engine.initialize();

    let (left, right, master) = gain_ids(&backend);
    assert_eq!(backend.node(left).unwrap().gain, Some(0.04));
    assert_eq!(backend.node(right).unwrap().gain, Some(0.04));
    assert_eq!(backend.node(master).unwrap().gain, Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn breath_hold_moves_to_delta_only_while_active() {
    let (engine, backend) = engine_with_stub();
    engine.initialize();
    assert_eq!(engine.on_breath_phase(BreathPhase::Hold, 0.1), None);
    assert_eq!(engine.current_band(), Band::Alpha);

    engine.start(Band::Theta).await.unwrap();
    let target = engine.on_breath_phase(BreathPhase::Hold, 0.1).unwrap();
    assert_eq!(target.band, Band::Delta);
    assert_eq!(target.transition, Duration::from_secs(3));

    let (_, right) = oscillator_ids(&backend);
    let right_state = backend.node(right).unwrap();
    assert_eq!(right_state.frequency_hz, Some(202.5));
    assert_eq!(right_state.last_ramp, Duration::from_secs(3));
    assert_eq!(engine.current_band(), Band::Delta);
}

#[tokio::test(start_paused = true)]
async fn dispose_twice_releases_everything() {
    let (engine, backend) = engine_with_stub();
    engine.start(Band::Theta).await.unwrap();

    engine.dispose();
    assert_eq!(backend.live_node_count(), 0);
    assert_eq!(engine.status(), EngineStatus::Disposed);
    engine.dispose();
    assert_eq!(backend.live_node_count(), 0);

    engine.initialize();
    engine.start(Band::Beta).await.unwrap();
    engine.set_volume(0.3);
    engine.stop();
    assert_eq!(backend.nodes_of_kind(NodeKind::Oscillator).len(), 2);
    assert!(!engine.is_running());
}

#[test]
fn dispose_on_fresh_engine_is_safe() {
    let (engine, backend) = engine_with_stub();
    engine.dispose();
    engine.dispose();
    assert_eq!(backend.live_node_count(), 0);
    assert!(backend.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dispose_cancels_pending_fade_out() {
    let (engine, backend) = engine_with_stub();
    engine.start(Band::Theta).await.unwrap();
    engine.stop_with_fade(Duration::from_secs(2));
    engine.dispose();

    tokio::time::sleep(Duration::from_secs(3)).await;
    let (left, _) = oscillator_ids(&backend);
    let state = backend.node(left).unwrap();
    assert_eq!(state.stop_count, 1);
    assert!(state.disposed);
}

#[tokio::test(start_paused = true)]
async fn dispose_during_activation_leaves_no_sound() {
    let backend = Arc::new(DesktopStubBackend::new());
    backend.set_activation_delay(Duration::from_millis(100));
    let engine = Arc::new(BinauralEngine::new(backend.clone()));

    let starter = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.start(Band::Alpha).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.dispose();

    assert!(starter.await.unwrap().is_ok());
    assert!(!backend
        .calls()
        .iter()
        .any(|call| matches!(call, BackendCall::Start { .. })));
    assert_eq!(engine.status(), EngineStatus::Disposed);
}

#[tokio::test(start_paused = true)]
async fn telemetry_records_lifecycle() {
    let (engine, _backend) = engine_with_stub();
    engine.start(Band::Theta).await.unwrap();
    engine.set_state(Band::Alpha);
    engine.stop_with_fade(Duration::ZERO);
    engine.dispose();

    let kinds: Vec<EngineEventKind> = engine
        .telemetry_snapshot()
        .recent
        .into_iter()
        .map(|event| event.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EngineEventKind::GraphBuilt { band: Band::Alpha },
            EngineEventKind::Started {
                band: Band::Theta,
                fade_in_ms: 3000
            },
            EngineEventKind::Transition {
                from: Band::Theta,
                to: Band::Alpha,
                transition_ms: 4000
            },
            EngineEventKind::Stopped,
            EngineEventKind::Disposed,
        ]
    );
}
