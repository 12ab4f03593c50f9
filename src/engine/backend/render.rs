//! Audio-thread side of the cpal backend.
//!
//! Control-thread node handles push [`GraphCommand`]s into an SPSC ring; the
//! [`Renderer`] drains them at the top of every output buffer and evaluates
//! the node graph one frame at a time. Slot index == `NodeId`, slot 0 is the
//! destination.
//!
//! Slots and their input lists are allocated up front on the control thread;
//! the control side recycles disposed ids, so `apply` only allocates if a
//! graph outgrows [`NODE_CAPACITY`] or a node exceeds [`INPUT_CAPACITY`] inputs.

use std::f32::consts::TAU;
use std::time::Duration;

use rtrb::Consumer;

use super::NodeId;

/// Node slots preallocated by [`Renderer::new`], destination included.
pub(crate) const NODE_CAPACITY: usize = 64;

/// Input edges preallocated per slot.
pub(crate) const INPUT_CAPACITY: usize = 8;

/// Command sent from a node handle to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GraphCommand {
    CreateOscillator { id: NodeId, frequency_hz: f32 },
    CreateGain { id: NodeId, initial_value: f32 },
    CreateMerger { id: NodeId },
    Connect { source: NodeId, target: NodeId, output: usize, input: usize },
    SetFrequency { id: NodeId, frequency_hz: f32, ramp: Duration },
    SetGain { id: NodeId, value: f32, ramp: Duration },
    Start { id: NodeId },
    Stop { id: NodeId },
    Dispose { id: NodeId },
}

/// Linear parameter ramp advanced once per frame.
#[derive(Debug, Clone, Copy)]
struct Ramp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
}

impl Ramp {
    fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    fn set(&mut self, target: f32, ramp: Duration, sample_rate: f32) {
        let frames = (ramp.as_secs_f32() * sample_rate).round();
        if frames < 1.0 {
            self.current = target;
            self.target = target;
            self.remaining = 0;
            return;
        }
        self.target = target;
        self.remaining = frames.min(u32::MAX as f32) as u32;
        self.step = (target - self.current) / self.remaining as f32;
    }

    fn advance(&mut self) -> f32 {
        let value = self.current;
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        value
    }
}

#[derive(Debug)]
enum RenderKind {
    Destination,
    Oscillator {
        phase: f32,
        frequency: Ramp,
        running: bool,
    },
    Gain {
        gain: Ramp,
    },
    Merger,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    source: usize,
    output: usize,
    input: usize,
}

#[derive(Debug)]
struct RenderNode {
    kind: RenderKind,
    inputs: Vec<Edge>,
    disposed: bool,
}

impl RenderNode {
    fn vacant() -> Self {
        Self {
            kind: RenderKind::Merger,
            inputs: Vec::with_capacity(INPUT_CAPACITY),
            disposed: true,
        }
    }

    fn occupy(&mut self, kind: RenderKind) {
        self.kind = kind;
        self.inputs.clear();
        self.disposed = false;
    }
}

type Frame = [f32; 2];

/// Evaluates the node graph into interleaved output buffers.
pub(crate) struct Renderer {
    commands: Consumer<GraphCommand>,
    nodes: Vec<RenderNode>,
    frame_cache: Vec<Option<Frame>>,
    visiting: Vec<bool>,
    /// One past the highest slot ever occupied
    active_len: usize,
    sample_rate: f32,
}

impl Renderer {
    pub(crate) fn new(commands: Consumer<GraphCommand>) -> Self {
        let mut nodes: Vec<RenderNode> =
            (0..NODE_CAPACITY).map(|_| RenderNode::vacant()).collect();
        nodes[0].occupy(RenderKind::Destination);
        Self {
            commands,
            nodes,
            frame_cache: vec![None; NODE_CAPACITY],
            visiting: vec![false; NODE_CAPACITY],
            active_len: 1,
            sample_rate: 48_000.0,
        }
    }

    pub(crate) fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1) as f32;
    }

    fn slot(&mut self, id: NodeId) -> Option<&mut RenderNode> {
        self.nodes.get_mut(id.0 as usize)
    }

    fn insert(&mut self, id: NodeId, kind: RenderKind) {
        let index = id.0 as usize;
        if index == 0 {
            return;
        }
        if index >= self.nodes.len() {
            log::warn!(
                "[Renderer] Node {} exceeds {} preallocated slots; growing on the audio thread",
                id,
                NODE_CAPACITY
            );
            self.nodes.resize_with(index + 1, RenderNode::vacant);
            self.frame_cache.resize(index + 1, None);
            self.visiting.resize(index + 1, false);
        }
        self.nodes[index].occupy(kind);
        self.active_len = self.active_len.max(index + 1);
    }

    fn apply(&mut self, command: GraphCommand) {
        let sample_rate = self.sample_rate;
        match command {
            GraphCommand::CreateOscillator { id, frequency_hz } => self.insert(
                id,
                RenderKind::Oscillator {
                    phase: 0.0,
                    frequency: Ramp::new(frequency_hz),
                    running: false,
                },
            ),
            GraphCommand::CreateGain { id, initial_value } => self.insert(
                id,
                RenderKind::Gain {
                    gain: Ramp::new(initial_value),
                },
            ),
            GraphCommand::CreateMerger { id } => self.insert(id, RenderKind::Merger),
            GraphCommand::Connect {
                source,
                target,
                output,
                input,
            } => {
                let source = source.0 as usize;
                let source_live = self.nodes.get(source).is_some_and(|n| !n.disposed);
                if let Some(node) = self.slot(target) {
                    if source_live && !node.disposed {
                        node.inputs.push(Edge {
                            source,
                            output,
                            input,
                        });
                    }
                }
            }
            GraphCommand::SetFrequency {
                id,
                frequency_hz,
                ramp,
            } => {
                if let Some(RenderNode {
                    kind: RenderKind::Oscillator { frequency, .. },
                    ..
                }) = self.slot(id)
                {
                    frequency.set(frequency_hz, ramp, sample_rate);
                }
            }
            GraphCommand::SetGain { id, value, ramp } => {
                if let Some(RenderNode {
                    kind: RenderKind::Gain { gain },
                    ..
                }) = self.slot(id)
                {
                    gain.set(value, ramp, sample_rate);
                }
            }
            GraphCommand::Start { id } | GraphCommand::Stop { id } => {
                let start = matches!(command, GraphCommand::Start { .. });
                if let Some(RenderNode {
                    kind: RenderKind::Oscillator { running, .. },
                    disposed: false,
                    ..
                }) = self.slot(id)
                {
                    *running = start;
                }
            }
            GraphCommand::Dispose { id } => {
                let index = id.0 as usize;
                if index == 0 {
                    return;
                }
                if let Some(node) = self.nodes.get_mut(index) {
                    node.disposed = true;
                    node.inputs.clear();
                    if let RenderKind::Oscillator { running, .. } = &mut node.kind {
                        *running = false;
                    }
                }
                for node in &mut self.nodes[..self.active_len] {
                    node.inputs.retain(|edge| edge.source != index);
                }
            }
        }
    }

    /// Apply every queued command.
    pub(crate) fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
    }

    fn eval(&mut self, index: usize) -> Frame {
        if let Some(frame) = self.frame_cache[index] {
            return frame;
        }
        if self.visiting[index] || self.nodes[index].disposed {
            return [0.0; 2];
        }
        self.visiting[index] = true;

        let edges = std::mem::take(&mut self.nodes[index].inputs);
        let mut mixed = [0.0f32; 2];
        let mut merged = [0.0f32; 2];
        for edge in &edges {
            let out = self.eval(edge.source);
            mixed[0] += out[0];
            mixed[1] += out[1];
            if edge.input < 2 {
                merged[edge.input] += out[edge.output.min(1)];
            }
        }
        self.nodes[index].inputs = edges;

        let sample_rate = self.sample_rate;
        let frame = match &mut self.nodes[index].kind {
            RenderKind::Destination => mixed,
            RenderKind::Merger => merged,
            RenderKind::Gain { gain } => {
                let g = gain.advance();
                [mixed[0] * g, mixed[1] * g]
            }
            RenderKind::Oscillator {
                phase,
                frequency,
                running,
            } => {
                let hz = frequency.advance();
                if *running {
                    let sample = (*phase * TAU).sin();
                    *phase = (*phase + hz / sample_rate).fract();
                    [sample, sample]
                } else {
                    [0.0; 2]
                }
            }
        };

        self.visiting[index] = false;
        self.frame_cache[index] = Some(frame);
        frame
    }

    /// Compute the next stereo frame at the destination.
    pub(crate) fn next_frame(&mut self) -> Frame {
        self.frame_cache[..self.active_len]
            .iter_mut()
            .for_each(|slot| *slot = None);
        self.eval(0)
    }

    /// Fill an interleaved buffer. Extra channels are silent; mono gets the mix.
    pub(crate) fn render(&mut self, data: &mut [f32], channels: usize) {
        self.drain_commands();
        let channels = channels.max(1);
        for frame in data.chunks_mut(channels) {
            let [left, right] = self.next_frame();
            if channels == 1 {
                frame[0] = 0.5 * (left + right);
                continue;
            }
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = match ch {
                    0 => left,
                    1 => right,
                    _ => 0.0,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> (rtrb::Producer<GraphCommand>, Renderer) {
        let (producer, consumer) = rtrb::RingBuffer::new(64);
        let mut renderer = Renderer::new(consumer);
        renderer.set_sample_rate(1000);
        (producer, renderer)
    }

    fn push_all(producer: &mut rtrb::Producer<GraphCommand>, commands: Vec<GraphCommand>) {
        for command in commands {
            producer.push(command).unwrap();
        }
    }

    /// osc(1) -> gain(2) -> merger(3) input `input` -> master(4) -> destination
    fn single_channel_graph(input: usize) -> Vec<GraphCommand> {
        vec![
            GraphCommand::CreateOscillator {
                id: NodeId(1),
                frequency_hz: 250.0,
            },
            GraphCommand::CreateGain {
                id: NodeId(2),
                initial_value: 1.0,
            },
            GraphCommand::CreateMerger { id: NodeId(3) },
            GraphCommand::CreateGain {
                id: NodeId(4),
                initial_value: 1.0,
            },
            GraphCommand::Connect {
                source: NodeId(1),
                target: NodeId(2),
                output: 0,
                input: 0,
            },
            GraphCommand::Connect {
                source: NodeId(2),
                target: NodeId(3),
                output: 0,
                input,
            },
            GraphCommand::Connect {
                source: NodeId(3),
                target: NodeId(4),
                output: 0,
                input: 0,
            },
            GraphCommand::Connect {
                source: NodeId(4),
                target: NodeId(0),
                output: 0,
                input: 0,
            },
            GraphCommand::Start { id: NodeId(1) },
        ]
    }

    fn peak(renderer: &mut Renderer, frames: usize) -> [f32; 2] {
        let mut data = vec![0.0f32; frames * 2];
        renderer.render(&mut data, 2);
        let mut peak = [0.0f32; 2];
        for frame in data.chunks(2) {
            peak[0] = peak[0].max(frame[0].abs());
            peak[1] = peak[1].max(frame[1].abs());
        }
        peak
    }

    #[test]
    fn merger_input_zero_is_left_channel() {
        let (mut producer, mut renderer) = renderer();
        push_all(&mut producer, single_channel_graph(0));

        let [left, right] = peak(&mut renderer, 16);
        assert!(left > 0.5);
        assert_eq!(right, 0.0);
    }

    #[test]
    fn merger_input_one_is_right_channel() {
        let (mut producer, mut renderer) = renderer();
        push_all(&mut producer, single_channel_graph(1));

        let [left, right] = peak(&mut renderer, 16);
        assert_eq!(left, 0.0);
        assert!(right > 0.5);
    }

    #[test]
    fn stopped_and_disposed_oscillators_are_silent() {
        let (mut producer, mut renderer) = renderer();
        push_all(&mut producer, single_channel_graph(0));
        producer.push(GraphCommand::Stop { id: NodeId(1) }).unwrap();
        assert_eq!(peak(&mut renderer, 16), [0.0, 0.0]);

        producer.push(GraphCommand::Start { id: NodeId(1) }).unwrap();
        producer.push(GraphCommand::Dispose { id: NodeId(2) }).unwrap();
        assert_eq!(peak(&mut renderer, 16), [0.0, 0.0]);
    }

    #[test]
    fn rebuilt_graph_reuses_preallocated_slots() {
        let (mut producer, mut renderer) = renderer();
        push_all(&mut producer, single_channel_graph(0));
        let _ = peak(&mut renderer, 4);

        for id in 1..=4 {
            producer.push(GraphCommand::Dispose { id: NodeId(id) }).unwrap();
        }
        assert_eq!(peak(&mut renderer, 4), [0.0, 0.0]);

        push_all(&mut producer, single_channel_graph(1));
        let [left, right] = peak(&mut renderer, 16);
        assert_eq!(left, 0.0);
        assert!(right > 0.5);

        assert_eq!(renderer.nodes.len(), NODE_CAPACITY);
        assert_eq!(renderer.active_len, 5);
        assert!(renderer
            .nodes
            .iter()
            .all(|node| node.inputs.capacity() >= INPUT_CAPACITY));
    }

    #[test]
    fn gain_ramps_linearly() {
        let mut ramp = Ramp::new(0.0);
        ramp.set(1.0, Duration::from_millis(4), 1000.0);
        let values: Vec<f32> = (0..6).map(|_| ramp.advance()).collect();
        assert_eq!(values, vec![0.0, 0.25, 0.5, 0.75, 1.0, 1.0]);

        ramp.set(0.2, Duration::ZERO, 1000.0);
        assert_eq!(ramp.advance(), 0.2);
    }

    #[test]
    fn master_fade_to_zero_silences_output() {
        let (mut producer, mut renderer) = renderer();
        push_all(&mut producer, single_channel_graph(0));
        producer
            .push(GraphCommand::SetGain {
                id: NodeId(4),
                value: 0.0,
                ramp: Duration::from_millis(10),
            })
            .unwrap();

        let _ = peak(&mut renderer, 10);
        assert_eq!(peak(&mut renderer, 16), [0.0, 0.0]);
    }
}
