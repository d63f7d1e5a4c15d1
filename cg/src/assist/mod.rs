//! Study helpers built on a conversation session
//!
//! Answer scoring, a per-chapter assistant and flashcards. Each call uses
//! a fresh session and is never retried.

mod assistant;
mod flashcards;
mod scorer;

pub use assistant::CourseAssistant;
pub use flashcards::{Flashcard, FlashcardGenerator, split_snippets};
pub use scorer::{AnswerScorer, ScoreResult, extract_score};

use crate::config::Config;
use crate::llm::GenerationParams;
use crate::session::{DEFAULT_MAX_HISTORY, SessionConfig};

/// Settings shared by the study helpers
#[derive(Debug, Clone)]
pub struct AssistConfig {
    pub max_history: usize,
    pub params: GenerationParams,
    /// max_tokens for scoring replies
    pub score_max_tokens: u32,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            params: GenerationParams::session_defaults(),
            score_max_tokens: 1000,
        }
    }
}

impl AssistConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_history: config.llm.max_history,
            params: config.llm.generation_params(),
            score_max_tokens: config.generation.score_max_tokens,
        }
    }

    fn session_config(&self, system_prompt: String) -> SessionConfig {
        SessionConfig {
            system_prompt: Some(system_prompt),
            max_history: self.max_history,
            params: self.params.clone(),
        }
    }
}
