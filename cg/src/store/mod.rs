//! Course persistence
//!
//! The pipeline hands a finished course to a [`CourseStore`] exactly once.
//! `save` is all-or-nothing: either the course and every chapter land, or
//! nothing does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ChapterKind, CourseId, CourseMeta, DraftChapter};

mod memory;
mod sqlite;

pub use memory::MemoryCourseStore;
pub use sqlite::SqliteCourseStore;

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Course not found: {0}")]
    NotFound(String),

    #[error("Invalid course data: {0}")]
    Invalid(String),

    #[error("Storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A persisted chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChapter {
    pub index: u32,
    pub title: String,
    pub summary: String,
    pub kind: ChapterKind,
    pub content: String,
    /// Last recorded answer score, if any
    pub score: Option<u8>,
}

/// A persisted course with its chapters ascending by index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCourse {
    pub id: CourseId,
    pub meta: CourseMeta,
    pub created_at: DateTime<Utc>,
    pub chapters: Vec<StoredChapter>,
}

impl StoredCourse {
    pub fn chapter(&self, index: u32) -> Option<&StoredChapter> {
        self.chapters.iter().find(|c| c.index == index)
    }
}

/// One line of a course listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub id: CourseId,
    pub name: String,
    pub tags: Vec<String>,
    pub chapter_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Storage boundary for generated courses
#[async_trait]
pub trait CourseStore: Send + Sync {
    /// Persist a course atomically and return its new id
    async fn save(&self, meta: &CourseMeta, chapters: &[DraftChapter]) -> Result<CourseId, StoreError>;

    /// Load a course by full id or unique id prefix
    async fn get(&self, id: &str) -> Result<StoredCourse, StoreError>;

    /// All courses, newest first
    async fn list(&self) -> Result<Vec<CourseSummary>, StoreError>;

    /// Record the score of an answer to one chapter
    async fn record_score(&self, id: &CourseId, index: u32, score: u8) -> Result<(), StoreError>;
}

/// Reject a save the storage layer must never accept
pub(crate) fn validate_for_save(meta: &CourseMeta, chapters: &[DraftChapter]) -> Result<(), StoreError> {
    if meta.name.trim().is_empty() {
        return Err(StoreError::Invalid("course name is empty".to_string()));
    }
    if chapters.is_empty() {
        return Err(StoreError::Invalid("course has no chapters".to_string()));
    }
    for chapter in chapters {
        if chapter.title.trim().is_empty() {
            return Err(StoreError::Invalid(format!("chapter {} has no title", chapter.index)));
        }
        if chapter.content.trim().is_empty() {
            return Err(StoreError::Invalid(format!("chapter {} has no content", chapter.index)));
        }
    }
    Ok(())
}

/// Pick the single id matching `query`
pub(crate) fn resolve_id<'a>(query: &str, ids: impl IntoIterator<Item = &'a CourseId>) -> Result<CourseId, StoreError> {
    let mut matches: Vec<&CourseId> = ids.into_iter().filter(|id| id.matches(query)).collect();
    if let Some(exact) = matches.iter().find(|id| id.as_str() == query) {
        return Ok((*exact).clone());
    }
    match matches.len() {
        0 => Err(StoreError::NotFound(query.to_string())),
        1 => Ok(matches.remove(0).clone()),
        n => Err(StoreError::Invalid(format!("id prefix '{}' is ambiguous ({} courses)", query, n))),
    }
}
