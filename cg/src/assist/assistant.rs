//! Chat about one chapter

use std::sync::Arc;

use tracing::debug;

use super::AssistConfig;
use crate::cancel::CancellationToken;
use crate::error::CourseError;
use crate::llm::{CompletionProvider, Message};
use crate::prompts::{ChatContext, PromptLoader};
use crate::session::ConversationSession;

/// Teaching assistant grounded in a single chapter
pub struct CourseAssistant {
    session: ConversationSession,
}

impl CourseAssistant {
    /// Build an assistant whose system prompt embeds the chapter
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        prompts: &PromptLoader,
        chapter: &ChatContext<'_>,
        config: &AssistConfig,
    ) -> Result<Self, CourseError> {
        debug!(index = chapter.chapter_index, "CourseAssistant::new: called");
        let system = prompts
            .render("chat", chapter)
            .map_err(|e| CourseError::Prompt(e.to_string()))?;
        Ok(Self {
            session: ConversationSession::new(provider, config.session_config(system)),
        })
    }

    /// Ask a question and wait for the whole answer
    pub async fn ask(&mut self, question: &str) -> Result<String, CourseError> {
        let question = validate_question(question)?;
        let reply = self.session.send(question, None).await?;
        Ok(reply.message.content)
    }

    /// Ask a question, streaming the answer through `on_chunk`
    ///
    /// A cancelled answer is not added to the history.
    pub async fn ask_streaming<F>(
        &mut self,
        question: &str,
        cancel: &CancellationToken,
        on_chunk: F,
    ) -> Result<String, CourseError>
    where
        F: FnMut(&str) + Send,
    {
        let question = validate_question(question)?;
        let reply = self
            .session
            .send_streaming(question, None, Some(cancel), on_chunk, |_| {})
            .await?;
        Ok(reply.message.content)
    }

    /// Forget the conversation but keep the chapter
    pub fn clear(&mut self) {
        self.session.clear_history(true);
    }

    pub fn history(&self) -> &[Message] {
        self.session.history()
    }

    pub fn export_history(&self) -> Result<String, CourseError> {
        self.session
            .export_history()
            .map_err(|e| CourseError::Internal(format!("failed to export history: {}", e)))
    }

    pub fn import_history(&mut self, json: &str) -> Result<(), CourseError> {
        self.session
            .import_history(json)
            .map_err(|e| CourseError::Validation(format!("invalid history: {}", e)))
    }
}

fn validate_question(question: &str) -> Result<&str, CourseError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(CourseError::Validation("question must not be empty".to_string()));
    }
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::llm::client::mock::{MockProvider, ScriptedStream};
    use std::time::Duration;

    fn assistant(provider: Arc<MockProvider>) -> CourseAssistant {
        CourseAssistant::new(
            provider,
            &PromptLoader::embedded_only(),
            &ChatContext {
                chapter_index: 2,
                chapter_title: "Traits",
                chapter_content: "Traits define shared behaviour.",
            },
            &AssistConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ask_keeps_conversation() {
        let provider = Arc::new(
            MockProvider::new()
                .with_completion("A trait is an interface.")
                .with_completion("Yes."),
        );
        let mut assistant = assistant(provider.clone());

        assert_eq!(assistant.ask("What is a trait?").await.unwrap(), "A trait is an interface.");
        assistant.ask("Like an interface?").await.unwrap();

        let requests = provider.requests();
        let system = &requests[1].messages[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("Chapter 2: Traits"));
        assert!(system.content.contains("Traits define shared behaviour."));
        // system + first exchange + second question
        assert_eq!(requests[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let provider = Arc::new(MockProvider::new());
        let mut assistant = assistant(provider.clone());
        assert!(matches!(assistant.ask("   ").await, Err(CourseError::Validation(_))));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ask_streaming_and_clear() {
        let provider = Arc::new(MockProvider::new().with_stream("why", ScriptedStream::new(&["Because ", "traits."])));
        let mut assistant = assistant(provider);

        let mut seen = String::new();
        let answer = assistant
            .ask_streaming("why traits?", &CancellationToken::new(), |d| seen.push_str(d))
            .await
            .unwrap();
        assert_eq!(answer, "Because traits.");
        assert_eq!(seen, answer);
        assert_eq!(assistant.history().len(), 3);

        assistant.clear();
        assert_eq!(assistant.history().len(), 1);
        assert_eq!(assistant.history()[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_cancelled_answer_not_kept() {
        let provider = Arc::new(MockProvider::new().with_stream(
            "slow",
            ScriptedStream::new(&["a", "b", "c"]).with_delay(Duration::from_millis(100)),
        ));
        let mut assistant = assistant(provider);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let result = assistant.ask_streaming("slow question", &cancel, |_| {}).await;
        assert!(matches!(result, Err(CourseError::Cancelled)));
        assert!(assistant.history().iter().all(|m| m.role != Role::Assistant));
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let provider = Arc::new(MockProvider::new().with_completion("ok"));
        let mut first = assistant(provider.clone());
        first.ask("hello").await.unwrap();
        let exported = first.export_history().unwrap();

        let mut other = assistant(provider);
        other.import_history(&exported).unwrap();
        assert_eq!(other.history().len(), 3);
        assert!(other.import_history("[{\"bogus\": 1}]").is_err());
        assert_eq!(other.history().len(), 3);
    }
}
