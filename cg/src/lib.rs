//! coursegen - AI course generation pipeline
//!
//! Turns a topic into a multi-chapter course: an LLM plans the outline, the
//! chapters are generated concurrently where they do not depend on each
//! other, and the finished course is saved exactly once.
//!
//! # Core Concepts
//!
//! - **Outline first**: nothing streams until the outline parses and validates
//! - **Dependency-aware scheduling**: lessons run in parallel, exercises and
//!   exams wait for the chapters before them
//! - **One cancellation signal**: a single cancel stops every stream and
//!   guarantees nothing is saved
//! - **Observable progress**: every state change is an event on a broadcast bus
//!
//! # Modules
//!
//! - [`llm`] - Completion provider trait and the OpenAI-compatible client
//! - [`session`] - Conversation history over a stateless provider
//! - [`planning`] - Outline request and validation
//! - [`scheduler`] - Chapter dependency scheduling and streaming
//! - [`pipeline`] - End-to-end course generation
//! - [`store`] - Course persistence
//! - [`assist`] - Scoring, chapter chat and flashcards
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod assist;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod llm;
pub mod pipeline;
pub mod planning;
pub mod prompts;
pub mod repl;
pub mod scheduler;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use cancel::{CancellationController, CancellationToken};
pub use config::{Config, ResolvedModel};
pub use domain::{
    ChapterKind, ChapterStatus, ChapterStub, CourseDraft, CourseId, CourseMeta, CourseRequest, Difficulty,
    DraftChapter, ModelSelector, Outline,
};
pub use error::CourseError;
pub use events::{CourseEvent, EventBus, PipelineState, StopReason};
pub use llm::{CompletionProvider, ProviderError, create_provider};
pub use pipeline::{CourseGenerator, GeneratedCourse, GenerationSettings};
pub use store::{CourseStore, MemoryCourseStore, SqliteCourseStore, StoredCourse};
