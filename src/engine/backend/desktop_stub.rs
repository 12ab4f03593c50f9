use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;

use crate::error::AudioError;

use super::{AudioBackend, AudioNode, GainNode, MergerNode, NodeId, OscillatorNode, TimeSource};

/// Kind of node tracked by the stub backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Destination,
    Oscillator,
    Gain,
    Merger,
}

/// Edge recorded by `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub target: NodeId,
    pub output: usize,
    pub input: usize,
}

/// Every call the stub receives, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Activate,
    CreateOscillator { id: NodeId, frequency_hz: f32 },
    CreateGain { id: NodeId, initial_value: f32 },
    CreateMerger { id: NodeId },
    Connect { source: NodeId, connection: Connection },
    SetFrequency { id: NodeId, frequency_hz: f32, ramp: Duration },
    SetGain { id: NodeId, value: f32, ramp: Duration },
    Start { id: NodeId },
    Stop { id: NodeId },
    Dispose { id: NodeId },
}

/// Last known state of a stub node.
///
/// Ramps are not simulated: `frequency_hz`/`gain` hold the ramp target and
/// `last_ramp` the duration it was requested over.
#[derive(Debug, Clone, PartialEq)]
pub struct StubNodeState {
    pub kind: NodeKind,
    pub frequency_hz: Option<f32>,
    pub gain: Option<f32>,
    pub last_ramp: Duration,
    pub running: bool,
    pub start_count: u32,
    pub stop_count: u32,
    pub disposed: bool,
    pub connections: Vec<Connection>,
}

impl StubNodeState {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            frequency_hz: None,
            gain: None,
            last_ramp: Duration::ZERO,
            running: false,
            start_count: 0,
            stop_count: 0,
            disposed: false,
            connections: Vec::new(),
        }
    }
}

#[derive(Default)]
struct StubGraph {
    next_id: u64,
    nodes: BTreeMap<NodeId, StubNodeState>,
    calls: Vec<BackendCall>,
}

impl StubGraph {
    fn allocate(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, StubNodeState::new(kind));
        id
    }
}

type SharedGraph = Arc<Mutex<StubGraph>>;

fn lock(graph: &SharedGraph) -> MutexGuard<'_, StubGraph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Desktop stub backend used for deterministic testing and CLI tooling.
///
/// Produces no sound. Every call returns immediately and is recorded so tests
/// can assert on node counts, frequencies, gains and call ordering.
pub struct DesktopStubBackend {
    graph: SharedGraph,
    destination: NodeId,
    activations: AtomicU32,
    failures_remaining: AtomicU32,
    activation_delay: Mutex<Duration>,
}

impl DesktopStubBackend {
    pub fn new() -> Self {
        let mut graph = StubGraph::default();
        let destination = graph.allocate(NodeKind::Destination);
        Self {
            graph: Arc::new(Mutex::new(graph)),
            destination,
            activations: AtomicU32::new(0),
            failures_remaining: AtomicU32::new(0),
            activation_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Reject the next `count` activations with `AudioError::ActivationFailed`.
    pub fn fail_next_activations(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make activation suspend for `delay` (uses the tokio clock).
    pub fn set_activation_delay(&self, delay: Duration) {
        *self
            .activation_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of successful activations.
    pub fn activation_count(&self) -> u32 {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.graph).calls.clone()
    }

    pub fn node(&self, id: NodeId) -> Option<StubNodeState> {
        lock(&self.graph).nodes.get(&id).cloned()
    }

    /// All nodes of `kind` in creation order.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<(NodeId, StubNodeState)> {
        lock(&self.graph)
            .nodes
            .iter()
            .filter(|(_, node)| node.kind == kind)
            .map(|(id, node)| (*id, node.clone()))
            .collect()
    }

    /// Nodes (excluding the destination) that have not been disposed.
    pub fn live_node_count(&self) -> usize {
        lock(&self.graph)
            .nodes
            .values()
            .filter(|node| node.kind != NodeKind::Destination && !node.disposed)
            .count()
    }

    fn handle(&self, id: NodeId) -> StubNode {
        StubNode {
            id,
            graph: Arc::clone(&self.graph),
        }
    }
}

impl Default for DesktopStubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for DesktopStubBackend {
    fn create_oscillator(&self, frequency_hz: f32) -> Box<dyn OscillatorNode> {
        let id = {
            let mut graph = lock(&self.graph);
            let id = graph.allocate(NodeKind::Oscillator);
            if let Some(node) = graph.nodes.get_mut(&id) {
                node.frequency_hz = Some(frequency_hz);
            }
            graph
                .calls
                .push(BackendCall::CreateOscillator { id, frequency_hz });
            id
        };
        Box::new(self.handle(id))
    }

    fn create_gain(&self, initial_value: f32) -> Box<dyn GainNode> {
        let id = {
            let mut graph = lock(&self.graph);
            let id = graph.allocate(NodeKind::Gain);
            if let Some(node) = graph.nodes.get_mut(&id) {
                node.gain = Some(initial_value);
            }
            graph.calls.push(BackendCall::CreateGain { id, initial_value });
            id
        };
        Box::new(self.handle(id))
    }

    fn create_merger(&self) -> Box<dyn MergerNode> {
        let id = {
            let mut graph = lock(&self.graph);
            let id = graph.allocate(NodeKind::Merger);
            graph.calls.push(BackendCall::CreateMerger { id });
            id
        };
        Box::new(self.handle(id))
    }

    fn destination(&self) -> NodeId {
        self.destination
    }

    fn start(&self) -> BoxFuture<'_, Result<(), AudioError>> {
        Box::pin(async move {
            let delay = *self
                .activation_delay
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let rejected = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(AudioError::ActivationFailed {
                    reason: "stub backend configured to reject activation".to_string(),
                });
            }

            self.activations.fetch_add(1, Ordering::SeqCst);
            lock(&self.graph).calls.push(BackendCall::Activate);
            Ok(())
        })
    }
}

/// Handle returned for every stub node kind.
struct StubNode {
    id: NodeId,
    graph: SharedGraph,
}

impl StubNode {
    fn update(&self, call: BackendCall, apply: impl FnOnce(&mut StubNodeState)) {
        let mut graph = lock(&self.graph);
        if let Some(node) = graph.nodes.get_mut(&self.id) {
            apply(node);
        }
        graph.calls.push(call);
    }
}

impl AudioNode for StubNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn connect(&self, target: NodeId, output: usize, input: usize) {
        let connection = Connection {
            target,
            output,
            input,
        };
        self.update(
            BackendCall::Connect {
                source: self.id,
                connection,
            },
            |node| node.connections.push(connection),
        );
    }

    fn dispose(&self) {
        self.update(BackendCall::Dispose { id: self.id }, |node| {
            node.running = false;
            node.disposed = true;
            node.connections.clear();
        });
    }
}

impl OscillatorNode for StubNode {
    fn set_frequency(&self, frequency_hz: f32, ramp: Duration) {
        self.update(
            BackendCall::SetFrequency {
                id: self.id,
                frequency_hz,
                ramp,
            },
            |node| {
                node.frequency_hz = Some(frequency_hz);
                node.last_ramp = ramp;
            },
        );
    }

    fn start(&self) {
        self.update(BackendCall::Start { id: self.id }, |node| {
            node.running = true;
            node.start_count += 1;
        });
    }

    fn stop(&self) {
        self.update(BackendCall::Stop { id: self.id }, |node| {
            node.running = false;
            node.stop_count += 1;
        });
    }
}

impl GainNode for StubNode {
    fn set_gain(&self, value: f32, ramp: Duration) {
        self.update(
            BackendCall::SetGain {
                id: self.id,
                value,
                ramp,
            },
            |node| {
                node.gain = Some(value);
                node.last_ramp = ramp;
            },
        );
    }
}

impl MergerNode for StubNode {}

/// Deterministic time source for desktop runs.
///
/// Each call to `now()` advances by a fixed 10ms to guarantee monotonic
/// timestamps even when no real audio stream is active.
pub struct StubTimeSource {
    start: Instant,
    offset_ms: AtomicU64,
}

impl StubTimeSource {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }
}

impl Default for StubTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for StubTimeSource {
    fn now(&self) -> Instant {
        let ms = self.offset_ms.fetch_add(10, Ordering::SeqCst);
        self.start + Duration::from_millis(ms)
    }
}
