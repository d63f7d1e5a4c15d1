//! Event Bus - pub/sub for generation progress
//!
//! The EventBus uses a tokio broadcast channel so the CLI, tests and any other
//! observer see the same stream of events without blocking producers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{CourseEvent, PipelineState, StopReason};
use crate::domain::{ChapterStatus, ChapterStub, CourseId};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus for generation runs
pub struct EventBus {
    tx: broadcast::Sender<CourseEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Subscribe to receive events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<CourseEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter handle bound to one run
    pub fn emitter_for(&self, run_id: impl Into<String>) -> EventEmitter {
        let run_id = run_id.into();
        debug!(%run_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            run_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events without owning the bus
///
/// Cheap to clone; every event carries the bound run ID.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<CourseEvent>,
    run_id: String,
}

impl EventEmitter {
    /// An emitter nobody listens to
    pub fn detached(run_id: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emit a raw event; no subscribers is fine
    pub fn emit(&self, event: CourseEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    // === Convenience methods ===

    pub fn state_changed(&self, state: PipelineState) {
        self.emit(CourseEvent::StateChanged {
            run_id: self.run_id.clone(),
            state,
        });
    }

    pub fn outline_ready(&self, course_name: &str, chapters: &[ChapterStub]) {
        self.emit(CourseEvent::OutlineReady {
            run_id: self.run_id.clone(),
            course_name: course_name.to_string(),
            chapters: chapters.to_vec(),
        });
    }

    pub fn chapter_status(&self, index: u32, status: ChapterStatus) {
        self.emit(CourseEvent::ChapterStatusChanged {
            run_id: self.run_id.clone(),
            index,
            status,
        });
    }

    /// Streamed text for one chapter; skips the per-event debug line
    pub fn chapter_delta(&self, index: u32, delta: &str, content_len: usize) {
        let _ = self.tx.send(CourseEvent::ChapterDelta {
            run_id: self.run_id.clone(),
            index,
            delta: delta.to_string(),
            content_len,
        });
    }

    pub fn course_saved(&self, course_id: &CourseId, chapter_count: usize) {
        self.emit(CourseEvent::CourseSaved {
            run_id: self.run_id.clone(),
            course_id: course_id.clone(),
            chapter_count,
        });
    }

    pub fn generation_stopped(&self, reason: StopReason) {
        self.emit(CourseEvent::GenerationStopped {
            run_id: self.run_id.clone(),
            reason,
        });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
