//! Answer scoring for exercise and exam chapters

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use super::AssistConfig;
use crate::domain::ChapterKind;
use crate::error::CourseError;
use crate::llm::CompletionProvider;
use crate::prompts::PromptLoader;
use crate::session::ConversationSession;

static SCORE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)score:\s*(\d{1,3})\s*/\s*100").ok());

/// Grader feedback for one answer
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    /// `None` when the feedback carries no `Score: NN/100` line
    pub score: Option<u8>,
    pub feedback: String,
}

/// Pull the first `Score: NN/100` out of grader feedback, clamped to 0..=100
pub fn extract_score(feedback: &str) -> Option<u8> {
    let value: u32 = SCORE_RE.as_ref()?.captures(feedback)?.get(1)?.as_str().parse().ok()?;
    Some(value.min(100) as u8)
}

/// Grades a student's answer against the chapter it answers
pub struct AnswerScorer {
    provider: Arc<dyn CompletionProvider>,
    prompts: Arc<PromptLoader>,
    config: AssistConfig,
}

impl AnswerScorer {
    pub fn new(provider: Arc<dyn CompletionProvider>, prompts: Arc<PromptLoader>, config: AssistConfig) -> Self {
        Self {
            provider,
            prompts,
            config,
        }
    }

    pub async fn score(&self, chapter_content: &str, answer: &str, kind: ChapterKind) -> Result<ScoreResult, CourseError> {
        debug!(%kind, answer_len = answer.len(), "AnswerScorer::score: called");
        if !kind.is_assessment() {
            return Err(CourseError::Validation(
                "only exercise and exam chapters can be scored".to_string(),
            ));
        }
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(CourseError::Validation("answer must not be empty".to_string()));
        }

        let system = self
            .prompts
            .render("score", &serde_json::json!({}))
            .map_err(|e| CourseError::Prompt(e.to_string()))?;
        let mut config = self.config.session_config(system);
        config.params = config.params.with_max_tokens(self.config.score_max_tokens);
        let mut session = ConversationSession::new(Arc::clone(&self.provider), config);

        let request = format!(
            "Chapter kind: {}\n\nChapter content:\n{}\n\nStudent answer:\n{}",
            kind, chapter_content, answer
        );
        let reply = session.send(&request, None).await?;
        let feedback = reply.message.content;
        let score = extract_score(&feedback);
        match score {
            Some(score) => info!(score, "answer scored"),
            None => warn!("grader feedback has no score line"),
        }
        Ok(ScoreResult { score, feedback })
    }
}
