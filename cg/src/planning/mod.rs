//! Course outline planning

mod outline;

pub use outline::{OutlinePlanner, PlannerConfig, decode_outline, strip_code_fences};
