//! Event types for course generation progress
//!
//! These events are everything a caller can observe about a run:
//! - Pipeline state changes
//! - The validated outline
//! - Per-chapter status changes and streamed text
//! - The terminal outcome (saved or stopped)

use serde::{Deserialize, Serialize};

use crate::domain::{ChapterStatus, ChapterStub, CourseId};

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Planning,
    Dispatching,
    Draining,
    Finalized,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Draining => write!(f, "draining"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

/// Why a run ended without saving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    Failed { kind: String, message: String },
}

/// Core event enum - the vocabulary of a generation run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CourseEvent {
    /// The pipeline moved to a new state
    StateChanged { run_id: String, state: PipelineState },

    /// The outline was validated; every chapter starts Pending
    OutlineReady {
        run_id: String,
        course_name: String,
        chapters: Vec<ChapterStub>,
    },

    /// A chapter changed status
    ChapterStatusChanged {
        run_id: String,
        index: u32,
        status: ChapterStatus,
    },

    /// A chapter received streamed text
    ChapterDelta {
        run_id: String,
        index: u32,
        delta: String,
        /// Total content length so far; never decreases for a chapter
        content_len: usize,
    },

    /// The course was persisted
    CourseSaved {
        run_id: String,
        course_id: CourseId,
        chapter_count: usize,
    },

    /// The run ended without saving
    GenerationStopped { run_id: String, reason: StopReason },
}

impl CourseEvent {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "StateChanged",
            Self::OutlineReady { .. } => "OutlineReady",
            Self::ChapterStatusChanged { .. } => "ChapterStatusChanged",
            Self::ChapterDelta { .. } => "ChapterDelta",
            Self::CourseSaved { .. } => "CourseSaved",
            Self::GenerationStopped { .. } => "GenerationStopped",
        }
    }

    /// Get the run ID this event belongs to
    pub fn run_id(&self) -> &str {
        match self {
            Self::StateChanged { run_id, .. }
            | Self::OutlineReady { run_id, .. }
            | Self::ChapterStatusChanged { run_id, .. }
            | Self::ChapterDelta { run_id, .. }
            | Self::CourseSaved { run_id, .. }
            | Self::GenerationStopped { run_id, .. } => run_id,
        }
    }

    /// Is this the last event of a run?
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CourseSaved { .. } | Self::GenerationStopped { .. })
    }
}
