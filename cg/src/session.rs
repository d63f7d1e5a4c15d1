//! Stateful conversation over a stateless completion provider
//!
//! A session owns its message history, keeps at most `max_history` messages
//! (system messages always survive trimming), and sends the full history on
//! every call. One session per chapter, chat, or scoring request.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::llm::{CompletionProvider, CompletionRequest, GenerationParams, Message, ProviderError, Role, StreamChunk, TokenUsage};

/// Default cap on retained messages
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Session construction options
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub system_prompt: Option<String>,
    pub max_history: usize,
    pub params: GenerationParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_history: DEFAULT_MAX_HISTORY,
            params: GenerationParams::session_defaults(),
        }
    }
}

/// Assistant reply with usage
#[derive(Debug, Clone)]
pub struct SessionReply {
    pub message: Message,
    pub usage: TokenUsage,
}

/// Conversation with a completion provider
pub struct ConversationSession {
    provider: Arc<dyn CompletionProvider>,
    history: Vec<Message>,
    max_history: usize,
    params: GenerationParams,
}

impl ConversationSession {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: SessionConfig) -> Self {
        debug!(max_history = config.max_history, "ConversationSession::new: called");
        let mut session = Self {
            provider,
            history: Vec::new(),
            max_history: config.max_history,
            params: config.params,
        };
        if let Some(prompt) = config.system_prompt {
            session.set_system_prompt(prompt);
        }
        session
    }

    /// Replace the system message, or insert one at the front
    ///
    /// If several system messages exist, the first one is replaced.
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        let text = text.into();
        match self.history.iter_mut().find(|m| m.role == Role::System) {
            Some(existing) => {
                debug!("set_system_prompt: replacing existing system message");
                *existing = Message::system(text);
            }
            None => {
                debug!("set_system_prompt: inserting system message");
                self.history.insert(0, Message::system(text));
                self.trim_history();
            }
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.history
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Merge `overrides` into the session's default parameters
    pub fn set_generation_params(&mut self, overrides: &GenerationParams) {
        self.params = self.params.merged(overrides);
    }

    pub fn generation_params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn set_max_history(&mut self, max_history: usize) {
        self.max_history = max_history;
        self.trim_history();
    }

    /// Drop history, optionally keeping system messages
    pub fn clear_history(&mut self, keep_system: bool) {
        debug!(keep_system, "clear_history: called");
        if keep_system {
            self.history.retain(|m| m.role == Role::System);
        } else {
            self.history.clear();
        }
    }

    /// Serialize the history as a JSON array
    pub fn export_history(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.history)
    }

    /// Replace the history from JSON; on error the history is untouched
    pub fn import_history(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let messages: Vec<Message> = serde_json::from_str(json)?;
        debug!(count = messages.len(), "import_history: replacing history");
        self.history = messages;
        self.trim_history();
        Ok(())
    }

    /// Send a user message and wait for the full reply
    ///
    /// On failure the user message stays in history and no assistant message
    /// is appended.
    pub async fn send(
        &mut self,
        text: &str,
        overrides: Option<&GenerationParams>,
    ) -> Result<SessionReply, ProviderError> {
        debug!(len = text.len(), "send: called");
        let request = self.prepare(text, overrides);

        let response = self.provider.complete(request).await?;
        let message = Message::assistant(response.content);
        self.push(message.clone());
        Ok(SessionReply {
            message,
            usage: response.usage,
        })
    }

    /// Send a user message and stream the reply
    ///
    /// `on_chunk` sees every delta in arrival order; `on_complete` runs once
    /// with the appended assistant message. Cancellation returns
    /// [`ProviderError::Cancelled`] without appending anything.
    pub async fn send_streaming<F, G>(
        &mut self,
        text: &str,
        overrides: Option<&GenerationParams>,
        cancel: Option<&CancellationToken>,
        mut on_chunk: F,
        on_complete: G,
    ) -> Result<SessionReply, ProviderError>
    where
        F: FnMut(&str) + Send,
        G: FnOnce(&Message) + Send,
    {
        debug!(len = text.len(), "send_streaming: called");
        let request = self.prepare(text, overrides);
        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<StreamChunk>(64);
        let provider = Arc::clone(&self.provider);
        let stream = provider.stream(request, chunk_tx, cancel);
        let drain = async {
            while let Some(chunk) = chunk_rx.recv().await {
                if let StreamChunk::TextDelta(delta) = chunk {
                    on_chunk(&delta);
                }
            }
        };

        let (result, ()) = tokio::join!(stream, drain);
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if e.is_cancelled() {
                    debug!("send_streaming: cancelled");
                } else {
                    warn!(error = %e, "send_streaming: stream failed");
                }
                return Err(e);
            }
        };

        let message = Message::assistant(response.content);
        self.push(message.clone());
        on_complete(&message);
        Ok(SessionReply {
            message,
            usage: response.usage,
        })
    }

    fn prepare(&mut self, text: &str, overrides: Option<&GenerationParams>) -> CompletionRequest {
        self.push(Message::user(text));
        let params = match overrides {
            Some(o) => self.params.merged(o),
            None => self.params.clone(),
        };
        CompletionRequest {
            messages: self.history.clone(),
            params,
        }
    }

    fn push(&mut self, message: Message) {
        self.history.push(message);
        self.trim_history();
    }

    /// Keep every system message plus the most recent others
    fn trim_history(&mut self) {
        if self.history.len() <= self.max_history {
            return;
        }
        let system_count = self.history.iter().filter(|m| m.role == Role::System).count();
        let keep = self.max_history.saturating_sub(system_count);
        let mut to_drop = (self.history.len() - system_count).saturating_sub(keep);
        debug!(to_drop, "trim_history: trimming");

        self.history.retain(|m| {
            if m.role == Role::System || to_drop == 0 {
                true
            } else {
                to_drop -= 1;
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::{MockProvider, ScriptedStream};
    use std::time::Duration;

    fn session(provider: MockProvider, max_history: usize) -> ConversationSession {
        ConversationSession::new(
            Arc::new(provider),
            SessionConfig {
                system_prompt: Some("You are a tutor".to_string()),
                max_history,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_send_appends_user_and_assistant() {
        let mut s = session(MockProvider::new().with_completion("Hi!"), 10);

        let reply = s.send("Hello", None).await.unwrap();
        assert_eq!(reply.message.content, "Hi!");

        let roles: Vec<Role> = s.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_user_message_only() {
        let mut s = session(MockProvider::new().with_failed_completion("boom"), 10);

        let err = s.send("Hello", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { ref message, .. } if message == "boom"));
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.history()[1].role, Role::User);
    }

    #[tokio::test]
    async fn test_history_trim_keeps_system_and_most_recent() {
        let mut provider = MockProvider::new();
        for i in 0..5 {
            provider = provider.with_completion(&format!("answer {i}"));
        }
        let mut s = session(provider, 3);

        for i in 0..5 {
            s.send(&format!("question {i}"), None).await.unwrap();
        }

        let history = s.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1].content, "question 4");
        assert_eq!(history[2].content, "answer 4");
    }

    #[tokio::test]
    async fn test_request_carries_full_history_and_merged_params() {
        let provider = Arc::new(MockProvider::new().with_completion("one").with_completion("two"));
        let mut s = ConversationSession::new(
            provider.clone(),
            SessionConfig {
                system_prompt: Some("sys".to_string()),
                ..Default::default()
            },
        );

        s.send("first", None).await.unwrap();
        let overrides = GenerationParams {
            max_tokens: Some(1000),
            ..Default::default()
        };
        s.send("second", Some(&overrides)).await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].params.max_tokens, Some(1000));
        assert_eq!(requests[1].params.temperature, Some(0.7));
        assert_eq!(requests[0].params.max_tokens, None);
    }

    #[test]
    fn test_set_system_prompt_replaces() {
        let mut s = session(MockProvider::new(), 10);
        s.set_system_prompt("new prompt");
        assert_eq!(s.system_prompt(), Some("new prompt"));
        assert_eq!(s.history().iter().filter(|m| m.role == Role::System).count(), 1);
    }

    #[tokio::test]
    async fn test_send_streaming_delivers_chunks_in_order() {
        let provider = MockProvider::new().with_stream("story", ScriptedStream::new(&["Once ", "upon ", "a time"]));
        let mut s = session(provider, 10);

        let mut seen = Vec::new();
        let mut completed = None;
        let reply = s
            .send_streaming(
                "tell a story",
                None,
                None,
                |delta| seen.push(delta.to_string()),
                |msg| completed = Some(msg.content.clone()),
            )
            .await
            .unwrap();

        assert_eq!(seen, vec!["Once ", "upon ", "a time"]);
        assert_eq!(reply.message.content, "Once upon a time");
        assert_eq!(completed.as_deref(), Some("Once upon a time"));
        assert_eq!(s.history().last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_send_streaming_cancelled_appends_no_reply() {
        let provider = MockProvider::new().with_stream(
            "slow",
            ScriptedStream::new(&["a", "b", "c"]).with_delay(Duration::from_millis(50)),
        );
        let mut s = session(provider, 10);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();

        let mut completed = false;
        let result = s
            .send_streaming(
                "slow please",
                None,
                Some(&cancel),
                |_| canceller.cancel(),
                |_| completed = true,
            )
            .await;

        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert!(!completed);
        assert_eq!(s.history().last().unwrap().role, Role::User);
    }

    #[test]
    fn test_import_history_rejects_bad_role_without_changes() {
        let mut s = session(MockProvider::new(), 10);
        let before = s.history().to_vec();

        let bad = r#"[{"id":"1","role":"robot","content":"hi","timestamp":"2024-01-01T00:00:00Z"}]"#;
        assert!(s.import_history(bad).is_err());
        assert_eq!(s.history(), before.as_slice());
    }

    #[test]
    fn test_export_import_history() {
        let mut s = session(MockProvider::new(), 10);
        let exported = s.export_history().unwrap();

        let mut other = session(MockProvider::new(), 10);
        other.clear_history(false);
        other.import_history(&exported).unwrap();
        assert_eq!(other.history(), s.history());

        s.clear_history(true);
        assert_eq!(s.history().len(), 1);
    }
}
