//! CPAL-based audio backend for desktop platforms (Linux, macOS, Windows)
//!
//! Node handles never touch the audio thread directly: every call becomes a
//! [`GraphCommand`] pushed into a lock-free ring that the output callback
//! drains before rendering. `cpal::Stream` is not `Send` on every host, so the
//! stream lives on a dedicated `binaural-output` thread for as long as the
//! backend does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use futures::future::BoxFuture;
use log::{error, info, warn};
use tokio::sync::oneshot;

use crate::error::{log_audio_error, AudioError};

use super::render::{GraphCommand, Renderer};
use super::{AudioBackend, AudioNode, GainNode, MergerNode, NodeId, OscillatorNode};

/// Commands that may be queued before the output stream starts draining.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

const DESTINATION: NodeId = NodeId(0);

struct CommandQueue {
    producer: rtrb::Producer<GraphCommand>,
    next_id: u64,
    /// Ids of disposed nodes; the renderer sees their `Dispose` before any reuse
    free_ids: Vec<u64>,
}

impl CommandQueue {
    fn push(&mut self, command: GraphCommand) {
        if let Err(rtrb::PushError::Full(command)) = self.producer.push(command) {
            warn!("[CpalBackend] Command queue full, dropping {:?}", command);
        }
    }

    fn allocate(&mut self) -> NodeId {
        if let Some(id) = self.free_ids.pop() {
            return NodeId(id);
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn release(&mut self, id: NodeId) {
        self.push(GraphCommand::Dispose { id });
        self.free_ids.push(id.0);
    }
}

type SharedQueue = Arc<Mutex<CommandQueue>>;

fn lock_queue(queue: &SharedQueue) -> MutexGuard<'_, CommandQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for any node kind; the renderer ignores commands that do not apply.
///
/// After `dispose` the id may be handed to a new node, so a disposed handle
/// sends nothing further.
struct CpalNode {
    id: NodeId,
    queue: SharedQueue,
    disposed: AtomicBool,
}

impl CpalNode {
    fn send(&self, command: GraphCommand) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        lock_queue(&self.queue).push(command);
    }
}

impl AudioNode for CpalNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn connect(&self, target: NodeId, output: usize, input: usize) {
        self.send(GraphCommand::Connect {
            source: self.id,
            target,
            output,
            input,
        });
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            lock_queue(&self.queue).release(self.id);
        }
    }
}

impl OscillatorNode for CpalNode {
    fn set_frequency(&self, frequency_hz: f32, ramp: Duration) {
        self.send(GraphCommand::SetFrequency {
            id: self.id,
            frequency_hz,
            ramp,
        });
    }

    fn start(&self) {
        self.send(GraphCommand::Start { id: self.id });
    }

    fn stop(&self) {
        self.send(GraphCommand::Stop { id: self.id });
    }
}

impl GainNode for CpalNode {
    fn set_gain(&self, value: f32, ramp: Duration) {
        self.send(GraphCommand::SetGain {
            id: self.id,
            value,
            ramp,
        });
    }
}

impl MergerNode for CpalNode {}

struct OutputWorker {
    shutdown: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Real audio output through the default cpal host and device.
pub struct CpalBackend {
    queue: SharedQueue,
    renderer: Arc<Mutex<Renderer>>,
    worker: tokio::sync::Mutex<Option<OutputWorker>>,
}

impl CpalBackend {
    pub fn new() -> Self {
        let (producer, consumer) = rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        Self {
            queue: Arc::new(Mutex::new(CommandQueue {
                producer,
                next_id: DESTINATION.0 + 1,
                free_ids: Vec::new(),
            })),
            renderer: Arc::new(Mutex::new(Renderer::new(consumer))),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    fn create_node(&self, command: impl FnOnce(NodeId) -> GraphCommand) -> CpalNode {
        let id = {
            let mut queue = lock_queue(&self.queue);
            let id = queue.allocate();
            queue.push(command(id));
            id
        };
        CpalNode {
            id,
            queue: Arc::clone(&self.queue),
            disposed: AtomicBool::new(false),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn create_oscillator(&self, frequency_hz: f32) -> Box<dyn OscillatorNode> {
        Box::new(self.create_node(|id| GraphCommand::CreateOscillator { id, frequency_hz }))
    }

    fn create_gain(&self, initial_value: f32) -> Box<dyn GainNode> {
        Box::new(self.create_node(|id| GraphCommand::CreateGain { id, initial_value }))
    }

    fn create_merger(&self) -> Box<dyn MergerNode> {
        Box::new(self.create_node(|id| GraphCommand::CreateMerger { id }))
    }

    fn destination(&self) -> NodeId {
        DESTINATION
    }

    fn start(&self) -> BoxFuture<'_, Result<(), AudioError>> {
        Box::pin(async move {
            let mut worker = self.worker.lock().await;
            if worker.as_ref().is_some_and(|w| !w.thread.is_finished()) {
                return Ok(());
            }

            let (ready_tx, ready_rx) = oneshot::channel();
            let (shutdown_tx, shutdown_rx) = mpsc::channel();
            let renderer = Arc::clone(&self.renderer);
            let thread = thread::Builder::new()
                .name("binaural-output".to_string())
                .spawn(move || run_output(renderer, ready_tx, shutdown_rx))?;

            let result = match ready_rx.await {
                Ok(result) => result,
                Err(_) => Err(AudioError::StreamFailure {
                    reason: "Output thread exited before reporting".to_string(),
                }),
            };

            match result {
                Ok(()) => {
                    *worker = Some(OutputWorker {
                        shutdown: shutdown_tx,
                        thread,
                    });
                    Ok(())
                }
                Err(err) => {
                    log_audio_error(&err, "CpalBackend::start");
                    drop(shutdown_tx);
                    let _ = thread.join();
                    Err(err)
                }
            }
        })
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.shutdown.send(());
            let _ = worker.thread.join();
        }
    }
}

/// Body of the output thread: open and play the stream, report, then park
/// until shutdown.
fn run_output(
    renderer: Arc<Mutex<Renderer>>,
    ready: oneshot::Sender<Result<(), AudioError>>,
    shutdown: mpsc::Receiver<()>,
) {
    let stream = match create_output_stream(renderer) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(AudioError::HardwareError {
            details: format!("Output start failed: {}", e),
        }));
        return;
    }

    if ready.send(Ok(())).is_err() {
        return;
    }
    info!("[CpalBackend] Output stream running");

    // Returns on explicit shutdown or when the backend is dropped.
    let _ = shutdown.recv();
    drop(stream);
    info!("[CpalBackend] Output stream closed");
}

/// A poisoned renderer means a previous callback panicked mid-render; refuse
/// to play from it.
fn lock_renderer(renderer: &Mutex<Renderer>) -> Result<MutexGuard<'_, Renderer>, AudioError> {
    renderer.lock().map_err(|_| AudioError::LockPoisoned {
        component: "CpalBackend::renderer".to_string(),
    })
}

fn create_output_stream(renderer: Arc<Mutex<Renderer>>) -> Result<::cpal::Stream, AudioError> {
    let host = ::cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::BackendUnavailable {
            details: "No default output device found".to_string(),
        })?;

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;

    let stream_config: ::cpal::StreamConfig = config.clone().into();
    let channels_count = stream_config.channels as usize;

    lock_renderer(&renderer)?.set_sample_rate(stream_config.sample_rate.0);

    let err_fn = |err| error!("[CpalBackend] Output stream error: {}", err);

    let stream = match config.sample_format() {
        ::cpal::SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &::cpal::OutputCallbackInfo| {
                // Never block the audio thread; a contended buffer is silence.
                match renderer.try_lock() {
                    Ok(mut renderer) => renderer.render(data, channels_count),
                    Err(_) => data.fill(0.0),
                }
            },
            err_fn,
            None,
        ),
        _ => {
            return Err(AudioError::StreamOpenFailed {
                reason: "Only F32 sample format is currently supported for output".to_string(),
            })
        }
    }
    .map_err(|e| AudioError::StreamOpenFailed {
        reason: format!("{:?}", e),
    })?;

    Ok(stream)
}
