//! In-process course store for dry runs and tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{CourseStore, CourseSummary, StoreError, StoredChapter, StoredCourse, resolve_id, validate_for_save};
use crate::domain::{CourseId, CourseMeta, DraftChapter, generate_course_id};

/// Course store that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryCourseStore {
    courses: Mutex<Vec<StoredCourse>>,
    saves: AtomicUsize,
}

impl MemoryCourseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls, successful or not
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn courses(&self) -> std::sync::MutexGuard<'_, Vec<StoredCourse>> {
        self.courses.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CourseStore for MemoryCourseStore {
    async fn save(&self, meta: &CourseMeta, chapters: &[DraftChapter]) -> Result<CourseId, StoreError> {
        debug!(name = %meta.name, chapters = chapters.len(), "MemoryCourseStore::save: called");
        self.saves.fetch_add(1, Ordering::SeqCst);
        validate_for_save(meta, chapters)?;

        let mut stored: Vec<StoredChapter> = chapters
            .iter()
            .map(|c| StoredChapter {
                index: c.index,
                title: c.title.clone(),
                summary: c.summary.clone(),
                kind: c.kind,
                content: c.content.clone(),
                score: None,
            })
            .collect();
        stored.sort_by_key(|c| c.index);

        let id = generate_course_id(&meta.name);
        self.courses().push(StoredCourse {
            id: id.clone(),
            meta: meta.clone(),
            created_at: Utc::now(),
            chapters: stored,
        });
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<StoredCourse, StoreError> {
        let courses = self.courses();
        let resolved = resolve_id(id, courses.iter().map(|c| &c.id))?;
        courses
            .iter()
            .find(|c| c.id == resolved)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<CourseSummary>, StoreError> {
        Ok(self
            .courses()
            .iter()
            .rev()
            .map(|c| CourseSummary {
                id: c.id.clone(),
                name: c.meta.name.clone(),
                tags: c.meta.tags.clone(),
                chapter_count: c.chapters.len(),
                created_at: c.created_at,
            })
            .collect())
    }

    async fn record_score(&self, id: &CourseId, index: u32, score: u8) -> Result<(), StoreError> {
        let mut courses = self.courses();
        let chapter = courses
            .iter_mut()
            .find(|c| &c.id == id)
            .and_then(|c| c.chapters.iter_mut().find(|ch| ch.index == index))
            .ok_or_else(|| StoreError::NotFound(format!("{} chapter {}", id, index)))?;
        chapter.score = Some(score);
        Ok(())
    }
}
