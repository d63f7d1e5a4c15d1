//! Review flashcards from chapter text

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::AssistConfig;
use crate::cancel::{CancellationToken, ensure_active, run_until_cancelled};
use crate::error::CourseError;
use crate::llm::{CompletionProvider, ResponseFormat};
use crate::planning::strip_code_fences;
use crate::prompts::{FlashcardContext, PromptLoader};
use crate::session::ConversationSession;

/// Shortest paragraph worth a card
const MIN_SNIPPET_CHARS: usize = 40;

/// One question/answer pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
}

/// Split chapter text into paragraph snippets, at most `max` of them
///
/// Headings and paragraphs too short to carry an idea are skipped.
pub fn split_snippets(content: &str, max: usize) -> Vec<String> {
    content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.starts_with('#'))
        .filter(|p| p.chars().count() >= MIN_SNIPPET_CHARS)
        .take(max)
        .map(String::from)
        .collect()
}

/// Asks the provider for one flashcard per snippet
pub struct FlashcardGenerator {
    provider: Arc<dyn CompletionProvider>,
    prompts: Arc<PromptLoader>,
    config: AssistConfig,
}

impl FlashcardGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>, prompts: Arc<PromptLoader>, config: AssistConfig) -> Self {
        Self {
            provider,
            prompts,
            config,
        }
    }

    /// One card per snippet whose reply decodes; bad replies are skipped
    pub async fn generate(&self, snippets: &[String], cancel: &CancellationToken) -> Result<Vec<Flashcard>, CourseError> {
        debug!(count = snippets.len(), "FlashcardGenerator::generate: called");
        let mut cards = Vec::with_capacity(snippets.len());

        for (i, snippet) in snippets.iter().enumerate() {
            ensure_active(cancel)?;
            let system = self
                .prompts
                .render("flashcard", &FlashcardContext { snippet })
                .map_err(|e| CourseError::Prompt(e.to_string()))?;
            let mut config = self.config.session_config(system);
            config.params = config.params.with_response_format(ResponseFormat::JsonObject);
            let mut session = ConversationSession::new(Arc::clone(&self.provider), config);

            let reply = run_until_cancelled(cancel, session.send("Create the flashcard.", None))
                .await
                .ok_or(CourseError::Cancelled)??;
            match decode_flashcard(&reply.message.content) {
                Some(card) => cards.push(card),
                None => warn!(snippet = i, "skipping flashcard with unusable reply"),
            }
        }

        info!(cards = cards.len(), snippets = snippets.len(), "flashcards generated");
        Ok(cards)
    }
}

fn decode_flashcard(raw: &str) -> Option<Flashcard> {
    let card: Flashcard = serde_json::from_str(strip_code_fences(raw)).ok()?;
    let question = card.question.trim();
    let answer = card.answer.trim();
    if question.is_empty() || answer.is_empty() {
        return None;
    }
    Some(Flashcard {
        question: question.to_string(),
        answer: answer.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockProvider;

    const LONG: &str = "Ownership means every value has exactly one owner at a time.";

    #[test]
    fn test_split_snippets() {
        let content = format!("# Title\n\n{LONG}\n\nshort\n\n{LONG} Again.\n\n{LONG} Third.");
        let snippets = split_snippets(&content, 2);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0], LONG);
        assert!(snippets[1].ends_with("Again."));
    }

    #[test]
    fn test_decode_flashcard() {
        assert_eq!(
            decode_flashcard(r#"{"question": " Q? ", "answer": "A"}"#),
            Some(Flashcard {
                question: "Q?".to_string(),
                answer: "A".to_string()
            })
        );
        assert!(decode_flashcard("```json\n{\"question\":\"Q\",\"answer\":\"A\"}\n```").is_some());
        assert!(decode_flashcard(r#"{"question": "Q"}"#).is_none());
        assert!(decode_flashcard(r#"{"question": "Q", "answer": ""}"#).is_none());
        assert!(decode_flashcard("nope").is_none());
    }

    #[tokio::test]
    async fn test_generate_skips_bad_replies() {
        let provider = Arc::new(
            MockProvider::new()
                .with_completion(r#"{"question": "Who owns a value?", "answer": "Exactly one owner"}"#)
                .with_completion("sorry, no JSON today")
                .with_completion(r#"{"question": "When is it dropped?", "answer": "When the owner goes out of scope"}"#),
        );
        let generator = FlashcardGenerator::new(
            provider.clone(),
            Arc::new(PromptLoader::embedded_only()),
            AssistConfig::default(),
        );
        let snippets = vec![LONG.to_string(); 3];

        let cards = generator.generate(&snippets, &CancellationToken::new()).await.unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1].question, "When is it dropped?");

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].params.response_format, Some(ResponseFormat::JsonObject));
        assert!(requests[0].messages[0].content.contains(LONG));
    }

    #[tokio::test]
    async fn test_provider_error_is_fatal() {
        let provider = Arc::new(MockProvider::new().with_failed_completion("quota exceeded"));
        let generator = FlashcardGenerator::new(provider, Arc::new(PromptLoader::embedded_only()), AssistConfig::default());
        let result = generator.generate(&[LONG.to_string()], &CancellationToken::new()).await;
        assert!(matches!(result, Err(CourseError::Provider(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let provider = Arc::new(MockProvider::new());
        let generator = FlashcardGenerator::new(
            provider.clone(),
            Arc::new(PromptLoader::embedded_only()),
            AssistConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = generator.generate(&[LONG.to_string()], &cancel).await;
        assert!(matches!(result, Err(CourseError::Cancelled)));
        assert_eq!(provider.call_count(), 0);
    }
}
