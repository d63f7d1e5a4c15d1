//! Scheduler configuration

use crate::llm::GenerationParams;
use crate::session::DEFAULT_MAX_HISTORY;

/// Chapter scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// max_tokens for every chapter request
    pub chapter_max_tokens: u32,

    /// History cap for each chapter session
    pub max_history: usize,

    /// Session defaults for chapter requests
    pub params: GenerationParams,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chapter_max_tokens: 8000,
            max_history: DEFAULT_MAX_HISTORY,
            params: GenerationParams::session_defaults(),
        }
    }
}

impl SchedulerConfig {
    /// Parameters applied to each chapter session
    pub fn session_params(&self) -> GenerationParams {
        self.params.clone().with_max_tokens(self.chapter_max_tokens)
    }
}
