//! Batch lifecycle events.
//!
//! The executor and determiner push [`BatchEvent`]s into an [`EventSink`],
//! an ordered list of listeners. A listener that errors or panics is logged
//! and skipped; it never changes how the turn proceeds.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parley_types::Result;
use serde::{Deserialize, Serialize};

use crate::batch::StoppedReason;

/// Wall-clock duration of each phase of a turn, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub determine_ms: u64,
    pub prepare_ms: u64,
    pub generate_ms: u64,
    pub collect_ms: u64,
    pub finalize_ms: u64,
    pub total_ms: u64,
}

/// Events emitted while a batch is determined and executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStart {
        step_id: Option<String>,
        reason: String,
        batch_size: usize,
    },
    StepIncluded {
        step_id: String,
        reason: String,
        batch_size: usize,
    },
    StepSkipped {
        step_id: String,
        reason: String,
        batch_size: usize,
    },
    BatchStop {
        step_id: Option<String>,
        reason: String,
        batch_size: usize,
    },
    BatchComplete {
        step_id: Option<String>,
        reason: String,
        batch_size: usize,
        stopped_reason: StoppedReason,
        timings: PhaseTimings,
    },
}

impl BatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::BatchStart { .. } => "batch_start",
            BatchEvent::StepIncluded { .. } => "step_included",
            BatchEvent::StepSkipped { .. } => "step_skipped",
            BatchEvent::BatchStop { .. } => "batch_stop",
            BatchEvent::BatchComplete { .. } => "batch_complete",
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        match self {
            BatchEvent::StepIncluded { step_id, .. } | BatchEvent::StepSkipped { step_id, .. } => {
                Some(step_id)
            }
            BatchEvent::BatchStart { step_id, .. }
            | BatchEvent::BatchStop { step_id, .. }
            | BatchEvent::BatchComplete { step_id, .. } => step_id.as_deref(),
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            BatchEvent::BatchStart { batch_size, .. }
            | BatchEvent::StepIncluded { batch_size, .. }
            | BatchEvent::StepSkipped { batch_size, .. }
            | BatchEvent::BatchStop { batch_size, .. }
            | BatchEvent::BatchComplete { batch_size, .. } => *batch_size,
        }
    }
}

/// Receives batch events. Returning an error only produces a log line.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &BatchEvent) -> Result<()>;
}

/// Ordered observer list.
#[derive(Clone, Default)]
pub struct EventSink {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: impl EventListener + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    pub fn add_shared(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver `event` to every listener in registration order.
    pub fn emit(&self, event: BatchEvent) {
        for (i, listener) in self.listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(listener = i, event = event.name(), error = %e, "Event listener failed");
                }
                Err(_) => {
                    tracing::warn!(listener = i, event = event.name(), "Event listener panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Fans events out over a [`tokio::sync::broadcast`] channel.
#[derive(Clone)]
pub struct BroadcastListener {
    sender: tokio::sync::broadcast::Sender<BatchEvent>,
}

impl BroadcastListener {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastListener {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventListener for BroadcastListener {
    fn on_event(&self, event: &BatchEvent) -> Result<()> {
        // No receivers is not an error.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Adapts a closure into a listener.
pub struct FnListener<F>(pub F);

impl<F> EventListener for FnListener<F>
where
    F: Fn(&BatchEvent) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: &BatchEvent) -> Result<()> {
        (self.0)(event)
    }
}
