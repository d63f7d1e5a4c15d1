//! Completion provider error types

use thiserror::Error;

/// Errors that can occur while talking to a completion provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Build an API error from a non-success response
    ///
    /// Surfaces `error.message` from a JSON body verbatim when present,
    /// otherwise the raw body, otherwise the status reason phrase.
    pub fn from_response_body(status: u16, reason: Option<&str>, body: &str) -> Self {
        let from_json = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from));

        let message = match from_json {
            Some(message) => message,
            None if !body.trim().is_empty() => body.trim().to_string(),
            None => reason.unwrap_or("request failed").to_string(),
        };

        ProviderError::Api { status, message }
    }

    /// Check if this error represents a cancelled request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}
