//! Engine telemetry collector.
//!
//! Each engine owns one collector. Events fan out to live subscribers over a
//! broadcast channel and are also kept in a bounded history for snapshots.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::TelemetryConfig;
use crate::engine::backend::TimeSource;

pub mod events;

pub use events::{EngineEvent, EngineEventKind};

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<EngineEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of engine events.
pub struct TelemetryCollector {
    tx: broadcast::Sender<EngineEvent>,
    history: Mutex<VecDeque<EngineEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
    time_source: Arc<dyn TimeSource>,
    start_instant: Instant,
}

impl TelemetryCollector {
    pub fn new(config: &TelemetryConfig, time_source: Arc<dyn TimeSource>) -> Self {
        let (tx, _) = broadcast::channel(config.channel_capacity.max(1));
        let start_instant = time_source.now();
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            history_capacity: config.history_capacity,
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
            time_source,
            start_instant,
        }
    }

    /// Stamp and publish an event. Never blocks on slow subscribers.
    pub fn publish(&self, kind: EngineEventKind, detail: Option<String>) {
        let timestamp_ms = self
            .time_source
            .now()
            .saturating_duration_since(self.start_instant)
            .as_millis() as u64;
        let event = EngineEvent {
            timestamp_ms,
            kind,
            detail,
        };

        self.total_events.fetch_add(1, Ordering::Relaxed);
        if self.history_capacity > 0 {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`; lagged receivers yield an error item and continue.
    pub fn stream(&self) -> BroadcastStream<EngineEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}
