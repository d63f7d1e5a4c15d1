//! Domain types for course generation

mod course;
mod id;

pub use course::{
    ChapterDependency, ChapterKind, ChapterStatus, ChapterStub, ContextChapter, CourseDraft, CourseMeta, CourseRequest,
    Difficulty, DraftChapter, ModelSelector, Outline,
};
pub use id::{CourseId, generate_course_id, slugify};
