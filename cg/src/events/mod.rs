//! Progress events for course generation
//!
//! Every observable step of a run is emitted to a broadcast bus; the CLI
//! renders them and tests assert on them.
//!
//! ```text
//!   CourseGenerator ──┐
//!   ChapterScheduler ─┼──▶ EventBus (broadcast) ──▶ CLI progress / tests
//!   chapter tasks ────┘
//! ```

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use types::{CourseEvent, PipelineState, StopReason};
