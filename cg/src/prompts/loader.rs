//! Prompt Loader
//!
//! Loads prompt templates from an override directory or falls back to
//! embedded defaults.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;
use crate::domain::{ChapterKind, ChapterStub, ContextChapter, CourseMeta, Difficulty};

/// Context for the outline system prompt
#[derive(Debug, Clone, Serialize)]
pub struct OutlineContext {
    pub chapter_count: u32,
    pub difficulty: String,
    pub require_assessments: bool,
}

impl OutlineContext {
    pub fn new(chapter_count: u32, difficulty: Difficulty, require_assessments: bool) -> Self {
        Self {
            chapter_count,
            difficulty: difficulty.to_string(),
            require_assessments,
        }
    }
}

/// Context for the chapter system prompt
#[derive(Debug, Clone, Serialize)]
pub struct ChapterContext<'a> {
    pub course_name: &'a str,
    pub course_description: &'a str,
    pub course_tags: String,
    pub previous_chapters: &'a [ContextChapter],
}

impl<'a> ChapterContext<'a> {
    pub fn new(meta: &'a CourseMeta, previous_chapters: &'a [ContextChapter]) -> Self {
        Self {
            course_name: &meta.name,
            course_description: &meta.description,
            course_tags: meta.tags.join(", "),
            previous_chapters,
        }
    }
}

/// Context for the per-kind chapter request
#[derive(Debug, Clone, Serialize)]
pub struct ChapterRequestContext {
    pub chapter_json: String,
    pub is_lesson: bool,
    pub is_exercise: bool,
    pub is_exam: bool,
}

impl ChapterRequestContext {
    pub fn new(stub: &ChapterStub) -> Result<Self> {
        Ok(Self {
            chapter_json: serde_json::to_string(stub)?,
            is_lesson: stub.kind == ChapterKind::Lesson,
            is_exercise: stub.kind == ChapterKind::Exercise,
            is_exam: stub.kind == ChapterKind::Exam,
        })
    }
}

/// Context for the chapter assistant prompt
#[derive(Debug, Clone, Serialize)]
pub struct ChatContext<'a> {
    pub chapter_index: u32,
    pub chapter_title: &'a str,
    pub chapter_content: &'a str,
}

/// Context for a flashcard request
#[derive(Debug, Clone, Serialize)]
pub struct FlashcardContext<'a> {
    pub snippet: &'a str,
}

/// Loads and renders prompt templates
pub struct PromptLoader {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
    /// User override directory
    override_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a loader that consults `override_dir` before the embedded set
    pub fn new(override_dir: Option<&Path>) -> Self {
        let override_dir = override_dir.map(Path::to_path_buf).filter(|d| {
            let exists = d.is_dir();
            debug!(dir = ?d, %exists, "PromptLoader::new: checking override directory");
            exists
        });
        Self {
            hbs: Self::engine(),
            override_dir,
        }
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Self {
        debug!("PromptLoader::embedded_only: called");
        Self {
            hbs: Self::engine(),
            override_dir: None,
        }
    }

    /// Prompts are plain text, so HTML escaping is off
    fn engine() -> Handlebars<'static> {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        hbs
    }

    /// Load a template by name
    ///
    /// Checks `{override_dir}/{name}.pmt` first, then the embedded set.
    fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(ref dir) = self.override_dir {
            let path = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: found override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
        }

        embedded::get_embedded(name)
            .map(String::from)
            .ok_or_else(|| eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> Result<String> {
        debug!(%template_name, "PromptLoader::render: called");
        let template = self.load_template(template_name)?;
        let rendered = self
            .hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))?;
        Ok(rendered.trim().to_string())
    }
}

impl Default for PromptLoader {
    fn default() -> Self {
        Self::embedded_only()
    }
}
