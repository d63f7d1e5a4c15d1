//! Chat-completion request/response types
//!
//! These model the OpenAI-style Chat Completions shape, which every provider
//! behind [`super::Provider`] speaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with a fresh id and the current timestamp
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        debug!("Message::system: called");
        Self::new(Role::System, text)
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        debug!("Message::user: called");
        Self::new(Role::User, text)
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        debug!("Message::assistant: called");
        Self::new(Role::Assistant, text)
    }
}

/// Requested response format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Text => "text",
            ResponseFormat::JsonObject => "json_object",
        }
    }
}

/// Sampling and shaping parameters for one completion call
///
/// Unset fields are omitted from the request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    pub n: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub user: Option<String>,
    pub response_format: Option<ResponseFormat>,
}

impl GenerationParams {
    /// Defaults applied to every session unless overridden
    pub fn session_defaults() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(1.0),
            presence_penalty: Some(0.0),
            frequency_penalty: Some(0.0),
            n: Some(1),
            ..Default::default()
        }
    }

    /// Return a copy where every field set in `overrides` replaces ours
    pub fn merged(&self, overrides: &GenerationParams) -> Self {
        Self {
            temperature: overrides.temperature.or(self.temperature),
            top_p: overrides.top_p.or(self.top_p),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            n: overrides.n.or(self.n),
            stop: overrides.stop.clone().or_else(|| self.stop.clone()),
            user: overrides.user.clone().or_else(|| self.user.clone()),
            response_format: overrides.response_format.or(self.response_format),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// A completion request - the full message list plus parameters
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub params: GenerationParams,
}

impl CompletionRequest {
    /// Text of the most recent user message, if any
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// Incremental output of a streaming completion
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text fragment in arrival order
    TextDelta(String),

    /// Stream ended normally
    Done { usage: Option<TokenUsage> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(!msg.id.is_empty());

        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn test_merged_prefers_overrides() {
        let defaults = GenerationParams::session_defaults().with_max_tokens(8000);
        let overrides = GenerationParams {
            temperature: Some(0.2),
            response_format: Some(ResponseFormat::JsonObject),
            ..Default::default()
        };

        let merged = defaults.merged(&overrides);
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.top_p, Some(1.0));
        assert_eq!(merged.max_tokens, Some(8000));
        assert_eq!(merged.response_format, Some(ResponseFormat::JsonObject));
    }

    #[test]
    fn test_last_user_text() {
        let request = CompletionRequest {
            messages: vec![Message::system("sys"), Message::user("first"), Message::assistant("reply"), Message::user("second")],
            params: GenerationParams::default(),
        };
        assert_eq!(request.last_user_text(), Some("second"));
    }
}
