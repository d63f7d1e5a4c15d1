//! Completion provider module
//!
//! Provides the stateless chat-completion boundary and the OpenAI-compatible
//! client used for every supported vendor.

use std::sync::Arc;

use tracing::debug;

pub mod client;
mod error;
mod openai;
mod provider;
mod types;

pub use client::CompletionProvider;
pub use error::ProviderError;
pub use openai::OpenAIClient;
pub use provider::Provider;
pub use types::{
    CompletionRequest, CompletionResponse, GenerationParams, Message, ResponseFormat, Role, StreamChunk, TokenUsage,
};

use crate::config::ResolvedModel;

/// Create a provider from a resolved model selection
///
/// Every vendor in [`Provider`] speaks the Chat Completions protocol, so they
/// all share one client; only the endpoint differs.
pub fn create_provider(resolved: &ResolvedModel) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
    debug!(provider = %resolved.provider, model = %resolved.model, "create_provider: called");
    Ok(Arc::new(OpenAIClient::from_resolved(resolved)?))
}
