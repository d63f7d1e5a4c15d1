//! Chapter generation tasks and dependency partitioning

use tracing::{debug, warn};

use crate::domain::{ChapterDependency, ChapterStatus, ChapterStub, ContextChapter, DraftChapter};
use crate::error::CourseError;
use crate::llm::ProviderError;

/// One chapter's generation unit
///
/// Owned by exactly one running future; `accumulated_content` is only ever
/// written by that future's stream reader.
#[derive(Debug)]
pub struct GenerationTask {
    pub stub: ChapterStub,
    pub status: ChapterStatus,
    pub accumulated_content: String,
    /// Completed chapters visible to this task, ascending by index
    pub context_snapshot: Vec<ContextChapter>,
    pub failure: Option<ProviderError>,
}

impl GenerationTask {
    pub fn new(stub: ChapterStub, context_snapshot: Vec<ContextChapter>) -> Self {
        debug!(index = stub.index, context = context_snapshot.len(), "GenerationTask::new: called");
        Self {
            stub,
            status: ChapterStatus::Pending,
            accumulated_content: String::new(),
            context_snapshot,
            failure: None,
        }
    }

    pub fn index(&self) -> u32 {
        self.stub.index
    }

    fn transition(&mut self, next: ChapterStatus) -> bool {
        if self.status.can_transition_to(next) {
            debug!(index = self.stub.index, from = %self.status, to = %next, "GenerationTask::transition");
            self.status = next;
            true
        } else {
            warn!(index = self.stub.index, from = %self.status, to = %next, "ignoring invalid task transition");
            false
        }
    }

    pub fn start(&mut self) -> bool {
        self.transition(ChapterStatus::Generating)
    }

    pub fn complete(&mut self) -> bool {
        self.transition(ChapterStatus::Completed)
    }

    pub fn abort(&mut self) -> bool {
        self.transition(ChapterStatus::Aborted)
    }

    pub fn fail(&mut self, err: ProviderError) -> bool {
        let changed = self.transition(ChapterStatus::Failed);
        if changed {
            self.failure = Some(err);
        }
        changed
    }

    /// Convert a failed task into the error naming its chapter
    pub fn into_error(self) -> CourseError {
        match self.failure {
            Some(source) => CourseError::Generation {
                index: self.stub.index,
                title: self.stub.title,
                source,
            },
            None if self.status == ChapterStatus::Aborted => CourseError::Cancelled,
            None => CourseError::Internal(format!("chapter {} ended as {}", self.stub.index, self.status)),
        }
    }

    /// The chapter as it will be persisted
    pub fn to_draft(&self) -> DraftChapter {
        DraftChapter {
            index: self.stub.index,
            title: self.stub.title.clone(),
            summary: self.stub.summary.clone(),
            kind: self.stub.kind,
            content: self.accumulated_content.clone(),
            status: self.status,
        }
    }
}

/// Split chapters into independent and dependent groups
///
/// Relative order inside each group follows the input order.
pub fn partition(chapters: &[ChapterStub]) -> (Vec<ChapterStub>, Vec<ChapterStub>) {
    chapters
        .iter()
        .cloned()
        .partition(|c| c.kind.dependency() == ChapterDependency::Independent)
}
