//! OpenAI-compatible Chat Completions client
//!
//! Implements the CompletionProvider trait for any endpoint speaking the
//! Chat Completions protocol, with blocking and cancellable streaming calls.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError, StreamChunk, TokenUsage};
use crate::config::ResolvedModel;

/// Chat Completions client bound to one model and credential
pub struct OpenAIClient {
    model: String,
    api_key: String,
    endpoint: String,
    timeout: Duration,
    http: Client,
}

impl OpenAIClient {
    /// Create a new client from a resolved model selection
    pub fn from_resolved(resolved: &ResolvedModel) -> Result<Self, ProviderError> {
        debug!(id = %resolved.id, provider = %resolved.provider, "from_resolved: called");
        Self::new(
            &resolved.endpoint,
            &resolved.model,
            &resolved.api_key,
            Duration::from_millis(resolved.timeout_ms),
        )
    }

    /// `timeout` bounds connecting and each idle gap between reads; only
    /// blocking completions also get it as a whole-request deadline
    pub fn new(endpoint: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let http = http_builder(timeout).build().map_err(ProviderError::Network)?;
        Ok(Self {
            model: model.to_string(),
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
            timeout,
            http,
        })
    }

    /// Build the request body; unset parameters are omitted
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, message_count = request.messages.len(), "build_request_body: called");

        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        let params = &request.params;
        if let Some(v) = params.temperature {
            body["temperature"] = json!(v);
        }
        if let Some(v) = params.top_p {
            body["top_p"] = json!(v);
        }
        if let Some(v) = params.presence_penalty {
            body["presence_penalty"] = json!(v);
        }
        if let Some(v) = params.frequency_penalty {
            body["frequency_penalty"] = json!(v);
        }
        if let Some(v) = params.max_tokens {
            body["max_tokens"] = json!(v);
        }
        if let Some(v) = params.n {
            body["n"] = json!(v);
        }
        if let Some(v) = &params.stop {
            body["stop"] = json!(v);
        }
        if let Some(v) = &params.user {
            body["user"] = json!(v);
        }
        if let Some(format) = params.response_format {
            body["response_format"] = json!({ "type": format.as_str() });
        }

        body
    }

    async fn post(&self, body: &serde_json::Value, deadline: Option<Duration>) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self.http.post(&self.endpoint).bearer_auth(&self.api_key).json(body);
        if let Some(deadline) = deadline {
            builder = builder.timeout(deadline);
        }
        let response = builder.send().await.map_err(ProviderError::Network)?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "post: API error");
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_response_body(
                status.as_u16(),
                status.canonical_reason(),
                &text,
            ));
        }
        Ok(response)
    }

    /// Parse a blocking Chat Completions reply
    fn parse_response(&self, text: &str) -> Result<CompletionResponse, ProviderError> {
        let api_response: ChatResponse = serde_json::from_str(text)?;
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("response contained no choices".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: api_response.usage.map(UsageBody::into_usage).unwrap_or_default(),
        })
    }
}

fn http_builder(timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder().connect_timeout(timeout).read_timeout(timeout)
}

/// One classified line of an SSE body
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    Delta {
        content: Option<String>,
        usage: Option<TokenUsage>,
    },
    Done,
    Skip,
}

/// Classify one line of a streaming body
///
/// Malformed payloads are skipped, not fatal.
pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        return SseLine::Skip;
    }
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamBody>(data) {
        Ok(chunk) => SseLine::Delta {
            content: chunk.choices.into_iter().next().and_then(|c| c.delta.content),
            usage: chunk.usage.map(UsageBody::into_usage),
        },
        Err(e) => {
            warn!(error = %e, "parse_sse_line: skipping malformed stream line");
            SseLine::Skip
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        debug!(%self.model, "complete: called");
        let body = self.build_request_body(&request);
        let response = self.post(&body, Some(self.timeout)).await?;
        let text = response.text().await.map_err(ProviderError::Network)?;
        debug!(bytes = text.len(), "complete: success");
        self.parse_response(&text)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        debug!(%self.model, "stream: called");
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let mut body = self.build_request_body(&request);
        body["stream"] = json!(true);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            // Streams run as long as deltas keep arriving
            response = self.post(&body, None) => response?,
        };

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut full_content = String::new();
        let mut usage = None;
        let mut done = false;

        while !done {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(received = full_content.len(), "stream: cancelled, closing connection");
                    return Err(ProviderError::Cancelled);
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                debug!("stream: body ended");
                break;
            };
            buffer.extend_from_slice(&chunk.map_err(ProviderError::Network)?);

            // Split on raw bytes so multi-byte characters never straddle a decode
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                if cancel.is_cancelled() {
                    debug!(received = full_content.len(), "stream: cancelled between lines");
                    return Err(ProviderError::Cancelled);
                }
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match parse_sse_line(&String::from_utf8_lossy(&line)) {
                    SseLine::Delta { content, usage: u } => {
                        if let Some(text) = content.filter(|t| !t.is_empty()) {
                            full_content.push_str(&text);
                            let _ = chunk_tx.send(StreamChunk::TextDelta(text)).await;
                        }
                        if u.is_some() {
                            usage = u;
                        }
                    }
                    SseLine::Done => {
                        done = true;
                        break;
                    }
                    SseLine::Skip => {}
                }
            }
        }

        if !done && let SseLine::Delta { content: Some(text), .. } = parse_sse_line(&String::from_utf8_lossy(&buffer)) {
            full_content.push_str(&text);
            let _ = chunk_tx.send(StreamChunk::TextDelta(text)).await;
        }

        let _ = chunk_tx.send(StreamChunk::Done { usage }).await;
        Ok(CompletionResponse {
            content: full_content,
            usage: usage.unwrap_or_default(),
        })
    }
}

// Chat Completions wire types

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl UsageBody {
    fn into_usage(self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamBody {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
