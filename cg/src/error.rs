//! Course generation error types

use thiserror::Error;

use crate::domain::CourseDraft;
use crate::llm::ProviderError;

/// Errors surfaced by the generation pipeline and its helpers
#[derive(Debug, Error)]
pub enum CourseError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Outline parse error: {0}")]
    OutlineParse(String),

    #[error("Chapter {index} ('{title}') failed: {source}")]
    Generation {
        index: u32,
        title: String,
        #[source]
        source: ProviderError,
    },

    #[error("Generation cancelled")]
    Cancelled,

    /// The draft is returned so the caller can retry the save
    #[error("Failed to save course: {message}")]
    Persistence { message: String, draft: Box<CourseDraft> },

    #[error("Prompt template error: {0}")]
    Prompt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CourseError {
    /// Check if this error is a user-initiated stop rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CourseError::Cancelled)
    }

    /// Short machine-readable kind, used in events and logs
    pub fn kind(&self) -> &'static str {
        match self {
            CourseError::Validation(_) => "validation",
            CourseError::Provider(_) => "provider",
            CourseError::OutlineParse(_) => "outline_parse",
            CourseError::Generation { .. } => "generation",
            CourseError::Cancelled => "cancelled",
            CourseError::Persistence { .. } => "persistence",
            CourseError::Prompt(_) => "prompt",
            CourseError::Internal(_) => "internal",
        }
    }
}

impl From<ProviderError> for CourseError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => CourseError::Cancelled,
            other => CourseError::Provider(other),
        }
    }
}
