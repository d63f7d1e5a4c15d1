//! Chapter scheduling
//!
//! Partitions an outline by dependency and drives one generation task per
//! chapter, publishing progress into a shared [`DraftView`].

mod config;
mod core;
mod draft;
mod task;

pub use config::SchedulerConfig;
pub use core::ChapterScheduler;
pub use draft::DraftView;
pub use task::{GenerationTask, partition};
