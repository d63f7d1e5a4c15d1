//! Outline planning
//!
//! One blocking provider call turns a topic into a validated [`Outline`].
//! Decoding is strict: unknown fields, missing fields, bad kinds, empty titles
//! and non-contiguous indices all fail with an outline parse error.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::{ChapterKind, ChapterStub, CourseRequest, Outline};
use crate::error::CourseError;
use crate::llm::{CompletionProvider, GenerationParams};
use crate::prompts::{OutlineContext, PromptLoader};
use crate::session::{ConversationSession, SessionConfig};

/// Planner settings
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub max_tokens: u32,
    pub max_history: usize,
    pub params: GenerationParams,
    /// Reject outlines without at least one Exercise and one Exam
    pub require_assessments: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8000,
            max_history: crate::session::DEFAULT_MAX_HISTORY,
            params: GenerationParams::session_defaults(),
            require_assessments: true,
        }
    }
}

/// Produces a course outline from a request
pub struct OutlinePlanner {
    provider: Arc<dyn CompletionProvider>,
    prompts: Arc<PromptLoader>,
    config: PlannerConfig,
}

impl OutlinePlanner {
    pub fn new(provider: Arc<dyn CompletionProvider>, prompts: Arc<PromptLoader>, config: PlannerConfig) -> Self {
        Self {
            provider,
            prompts,
            config,
        }
    }

    /// Ask the provider for an outline and decode it
    pub async fn plan(&self, request: &CourseRequest) -> Result<Outline, CourseError> {
        debug!(topic = %request.topic, chapters = request.chapter_count, "OutlinePlanner::plan: called");
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(CourseError::Validation("topic must not be empty".to_string()));
        }

        let context = OutlineContext::new(request.chapter_count, request.difficulty, self.config.require_assessments);
        let system_prompt = self
            .prompts
            .render("outline", &context)
            .map_err(|e| CourseError::Prompt(e.to_string()))?;

        let mut session = ConversationSession::new(
            Arc::clone(&self.provider),
            SessionConfig {
                system_prompt: Some(system_prompt),
                max_history: self.config.max_history,
                params: self.config.params.clone().with_max_tokens(self.config.max_tokens),
            },
        );

        let reply = session.send(topic, None).await?;
        let outline = decode_outline(&reply.message.content, topic, self.config.require_assessments)?;
        info!(
            course = %outline.course_name,
            chapters = outline.chapters.len(),
            "outline planned"
        );
        Ok(outline)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct OutlineWire {
    #[serde(default)]
    course_name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    chapters: Vec<ChapterWire>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChapterWire {
    index: u32,
    title: String,
    #[serde(default)]
    summary: String,
    kind: ChapterKind,
}

/// Remove Markdown code fences around a JSON reply
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag (```json, ```JSON, ...)
    let body = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Decode and validate a provider reply into an outline
///
/// `topic` names the course when the reply omits `courseName`.
pub fn decode_outline(raw: &str, topic: &str, require_assessments: bool) -> Result<Outline, CourseError> {
    let text = strip_code_fences(raw);
    let parse_err = |msg: String| {
        warn!(%msg, "decode_outline: rejecting outline");
        CourseError::OutlineParse(msg)
    };

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| parse_err(format!("reply is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(parse_err("reply is not a JSON object".to_string()));
    }
    match value.get("chapters") {
        None => return Err(parse_err("missing field `chapters`".to_string())),
        Some(c) if !c.is_array() => return Err(parse_err("`chapters` is not an array".to_string())),
        _ => {}
    }
    let wire: OutlineWire =
        serde_json::from_value(value).map_err(|e| parse_err(format!("unexpected outline shape: {}", e)))?;

    if wire.chapters.is_empty() {
        return Err(parse_err("outline has no chapters".to_string()));
    }

    let mut chapters = Vec::with_capacity(wire.chapters.len());
    for (position, chapter) in wire.chapters.into_iter().enumerate() {
        let expected = position as u32 + 1;
        if chapter.index != expected {
            return Err(parse_err(format!(
                "chapter indices must be 1..=N in order: expected {}, found {}",
                expected, chapter.index
            )));
        }
        let title = chapter.title.trim();
        if title.is_empty() {
            return Err(parse_err(format!("chapter {} has an empty title", chapter.index)));
        }
        chapters.push(ChapterStub {
            index: chapter.index,
            title: title.to_string(),
            summary: chapter.summary.trim().to_string(),
            kind: chapter.kind,
        });
    }

    if require_assessments {
        for kind in [ChapterKind::Exercise, ChapterKind::Exam] {
            if !chapters.iter().any(|c| c.kind == kind) {
                return Err(parse_err(format!("outline has no {} chapter", kind)));
            }
        }
    }

    let course_name = wire
        .course_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| topic.trim().to_string());

    Ok(Outline {
        course_name,
        description: wire.description.trim().to_string(),
        tags: wire.tags.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
        chapters,
    })
}
