//! Model client abstraction.
//!
//! The orchestration engine treats the remote model as an opaque single-shot
//! call. Implementations own the HTTP wire format, authentication and
//! retries-at-transport-level (if any); the engine never retries.

use crate::provider::types::generate::{Completion, CompletionOptions, FinishReason, TokenUsage};
use crate::provider::types::internal::ChatMessage;
use anyhow::Result;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;

/// One event of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Incremental text
    Delta(String),
    /// End of stream with final metadata
    Done {
        /// Finish reason if reported
        finish_reason: Option<FinishReason>,
        /// Usage if reported
        usage: Option<TokenUsage>,
    },
}

/// Type alias for streaming response
pub type StreamingResponse = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Remote language model
///
/// # Example
///
/// ```ignore
/// use craftloop::provider::{ChatMessage, CompletionOptions, ModelClient};
///
/// async fn ask(client: &dyn ModelClient) -> anyhow::Result<String> {
///     let messages = vec![ChatMessage::system("Be brief"), ChatMessage::user("Hi")];
///     let completion = client.complete(messages, &CompletionOptions::new()).await?;
///     Ok(completion.content)
/// }
/// ```
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Run one completion over the ordered messages.
    ///
    /// Implementations should abort the in-flight request when
    /// `options.cancellation` fires so the provider stops generating.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: &CompletionOptions,
    ) -> Result<Completion>;

    /// Streaming variant of [`ModelClient::complete`].
    ///
    /// The default adapts `complete` into a single delta followed by `Done`.
    async fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: &CompletionOptions,
    ) -> Result<StreamingResponse> {
        let completion = self.complete(messages, options).await?;
        let chunks = vec![
            Ok(StreamChunk::Delta(completion.content)),
            Ok(StreamChunk::Done {
                finish_reason: completion.finish_reason,
                usage: completion.usage,
            }),
        ];
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    /// Get the client name for logging
    fn name(&self) -> &str {
        "model"
    }
}

/// Fold a streamed completion back into a [`Completion`].
///
/// A stream that ends without a `Done` chunk yields a completion with no
/// finish reason and no usage.
pub async fn collect_stream(mut stream: StreamingResponse) -> Result<Completion> {
    let mut completion = Completion::default();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::Delta(text) => completion.content.push_str(&text),
            StreamChunk::Done {
                finish_reason,
                usage,
            } => {
                completion.finish_reason = finish_reason;
                completion.usage = usage;
                break;
            }
        }
    }

    Ok(completion)
}
