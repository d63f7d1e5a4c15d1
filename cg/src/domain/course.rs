//! Course domain types
//!
//! A course is planned as an [`Outline`] of chapter stubs, generated into
//! [`DraftChapter`]s, and persisted as a [`CourseDraft`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chapter kind
///
/// Accepts `"lesson" | "exercise" | "exam"` or the numeric codes `0 | 1 | 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "RawKind")]
pub enum ChapterKind {
    Lesson,
    Exercise,
    Exam,
}

/// Scheduling class of a chapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterDependency {
    /// Needs no other chapter's content
    Independent,
    /// Needs the content of every previously completed chapter
    Dependent,
}

impl ChapterKind {
    /// Lessons stand alone; exercises and exams build on earlier chapters
    pub fn dependency(self) -> ChapterDependency {
        match self {
            ChapterKind::Lesson => ChapterDependency::Independent,
            ChapterKind::Exercise | ChapterKind::Exam => ChapterDependency::Dependent,
        }
    }

    pub fn is_assessment(self) -> bool {
        matches!(self, ChapterKind::Exercise | ChapterKind::Exam)
    }

    pub fn code(self) -> u8 {
        match self {
            ChapterKind::Lesson => 0,
            ChapterKind::Exercise => 1,
            ChapterKind::Exam => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChapterKind::Lesson => "lesson",
            ChapterKind::Exercise => "exercise",
            ChapterKind::Exam => "exam",
        }
    }
}

impl fmt::Display for ChapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChapterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lesson" | "0" => Ok(ChapterKind::Lesson),
            "exercise" | "1" => Ok(ChapterKind::Exercise),
            "exam" | "2" => Ok(ChapterKind::Exam),
            other => Err(format!("unknown chapter kind '{}'", other)),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKind {
    Code(u64),
    Name(String),
}

impl TryFrom<RawKind> for ChapterKind {
    type Error = String;

    fn try_from(raw: RawKind) -> Result<Self, Self::Error> {
        match raw {
            RawKind::Code(0) => Ok(ChapterKind::Lesson),
            RawKind::Code(1) => Ok(ChapterKind::Exercise),
            RawKind::Code(2) => Ok(ChapterKind::Exam),
            RawKind::Code(n) => Err(format!("unknown chapter kind code {}", n)),
            RawKind::Name(name) => name.parse(),
        }
    }
}

/// Requested course difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginner => write!(f, "beginner"),
            Self::Intermediate => write!(f, "intermediate"),
            Self::Advanced => write!(f, "advanced"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginner" | "easy" => Ok(Self::Beginner),
            "intermediate" | "medium" => Ok(Self::Intermediate),
            "advanced" | "hard" => Ok(Self::Advanced),
            _ => Err(format!(
                "Invalid difficulty: {}. Valid: beginner, intermediate, advanced",
                s
            )),
        }
    }
}

/// Which model serves a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSelector {
    /// Shared free-trial credential
    FreeTrial,
    /// The configured default model
    Auto,
    /// A configured model entry by id
    Named(String),
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeTrial => write!(f, "free-trial"),
            Self::Auto => write!(f, "auto"),
            Self::Named(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for ModelSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("missing model selection".to_string()),
            "free-trial" | "deepseek-chat-free-trial" => Ok(Self::FreeTrial),
            "auto" => Ok(Self::Auto),
            id => Ok(Self::Named(id.to_string())),
        }
    }
}

/// A request to generate one course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRequest {
    pub topic: String,
    pub chapter_count: u32,
    pub difficulty: Difficulty,
    pub model: ModelSelector,
}

/// One planned chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterStub {
    /// 1-based position in the course
    pub index: u32,
    pub title: String,
    pub summary: String,
    pub kind: ChapterKind,
}

/// Validated course outline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub course_name: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Ascending by index, exactly `1..=N`
    pub chapters: Vec<ChapterStub>,
}

/// Chapter generation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Aborted,
    Failed,
}

impl ChapterStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }

    /// Allowed transitions: Pending→Generating→{Completed, Failed}, any live state→Aborted
    pub fn can_transition_to(&self, next: ChapterStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Generating)
                | (Self::Generating, Self::Completed)
                | (Self::Generating, Self::Failed)
                | (Self::Pending, Self::Aborted)
                | (Self::Generating, Self::Aborted)
        )
    }
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Generating => write!(f, "generating"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A chapter as seen by callers while and after it is generated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftChapter {
    pub index: u32,
    pub title: String,
    pub summary: String,
    pub kind: ChapterKind,
    pub content: String,
    pub status: ChapterStatus,
}

impl DraftChapter {
    pub fn from_stub(stub: &ChapterStub) -> Self {
        Self {
            index: stub.index,
            title: stub.title.clone(),
            summary: stub.summary.clone(),
            kind: stub.kind,
            content: String::new(),
            status: ChapterStatus::Pending,
        }
    }
}

/// Earlier chapter handed to a dependent chapter as context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextChapter {
    pub index: u32,
    pub title: String,
    pub content: String,
}

impl From<&DraftChapter> for ContextChapter {
    fn from(chapter: &DraftChapter) -> Self {
        Self {
            index: chapter.index,
            title: chapter.title.clone(),
            content: chapter.content.clone(),
        }
    }
}

/// Course-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseMeta {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl CourseMeta {
    pub fn from_outline(outline: &Outline) -> Self {
        Self {
            name: outline.course_name.clone(),
            description: outline.description.clone(),
            tags: outline.tags.clone(),
        }
    }

    /// Append a tag unless already present
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !tag.is_empty() && !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }
}

/// A fully generated course ready to persist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseDraft {
    pub meta: CourseMeta,
    /// Ascending by index
    pub chapters: Vec<DraftChapter>,
}

impl CourseDraft {
    /// Assemble a draft, ordering chapters by index regardless of completion order
    pub fn assemble(meta: CourseMeta, mut chapters: Vec<DraftChapter>) -> Self {
        chapters.sort_by_key(|c| c.index);
        Self { meta, chapters }
    }
}
