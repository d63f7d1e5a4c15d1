//! CompletionProvider trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{CompletionRequest, CompletionResponse, ProviderError, StreamChunk};

/// Stateless chat-completion backend
///
/// Conversation state lives in [`crate::session::ConversationSession`]; every
/// call here carries the full message list. Implementations must never retry
/// on their own.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send a single completion request and wait for the full reply
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Streaming completion
    ///
    /// Sends text deltas to `chunk_tx` in arrival order and returns the
    /// concatenated reply. Checks `cancel` before consuming each chunk and
    /// returns [`ProviderError::Cancelled`] once it fires.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError>;
}
