//! Caller-visible draft of a course being generated
//!
//! One slot per chapter. Every write is a read-modify-write of exactly one
//! slot under the lock, so concurrent chapter tasks never interleave within a
//! slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::{ChapterStatus, DraftChapter, Outline};

struct DraftSlots {
    chapters: Vec<DraftChapter>,
    positions: HashMap<u32, usize>,
}

/// Shared, cloneable view of the in-progress course
#[derive(Clone)]
pub struct DraftView {
    inner: Arc<Mutex<DraftSlots>>,
}

impl DraftSlots {
    fn from_outline(outline: &Outline) -> Self {
        let chapters: Vec<DraftChapter> = outline.chapters.iter().map(DraftChapter::from_stub).collect();
        let positions = chapters.iter().enumerate().map(|(pos, c)| (c.index, pos)).collect();
        Self { chapters, positions }
    }
}

impl DraftView {
    /// A view with no chapters until an outline is loaded
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DraftSlots {
                chapters: Vec::new(),
                positions: HashMap::new(),
            })),
        }
    }

    /// One Pending slot per outline chapter
    pub fn from_outline(outline: &Outline) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DraftSlots::from_outline(outline))),
        }
    }

    /// Replace every slot with the Pending chapters of `outline`
    pub fn load_outline(&self, outline: &Outline) {
        *self.lock() = DraftSlots::from_outline(outline);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().chapters.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, DraftSlots> {
        // Slot writes are a single push or assign; a poisoned lock still holds whole slots
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to one slot; `None` if the index is unknown
    pub fn update<R>(&self, index: u32, f: impl FnOnce(&mut DraftChapter) -> R) -> Option<R> {
        let mut slots = self.lock();
        let pos = *slots.positions.get(&index)?;
        slots.chapters.get_mut(pos).map(f)
    }

    /// Append streamed text; returns the new content length
    pub fn append_content(&self, index: u32, delta: &str) -> usize {
        self.update(index, |c| {
            c.content.push_str(delta);
            c.content.len()
        })
        .unwrap_or(0)
    }

    pub fn set_status(&self, index: u32, status: ChapterStatus) {
        self.update(index, |c| c.status = status);
    }

    /// Mark every listed chapter that is not yet terminal as Aborted
    ///
    /// Returns the indices that changed.
    pub fn abort_unfinished(&self, indices: impl IntoIterator<Item = u32>) -> Vec<u32> {
        let mut slots = self.lock();
        let mut changed = Vec::new();
        for index in indices {
            let Some(&pos) = slots.positions.get(&index) else {
                continue;
            };
            if let Some(chapter) = slots.chapters.get_mut(pos)
                && !chapter.status.is_terminal()
            {
                chapter.status = ChapterStatus::Aborted;
                changed.push(index);
            }
        }
        changed
    }

    pub fn chapter(&self, index: u32) -> Option<DraftChapter> {
        self.update(index, |c| c.clone())
    }

    /// Copy of every slot, in outline order
    pub fn snapshot(&self) -> Vec<DraftChapter> {
        self.lock().chapters.clone()
    }
}

impl Default for DraftView {
    fn default() -> Self {
        Self::empty()
    }
}
