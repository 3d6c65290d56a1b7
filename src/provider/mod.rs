//! Model client abstraction module
//!
//! This module provides the model client trait and the message, option and
//! usage types shared with the orchestration engine.

pub mod traits;
pub mod types;

// Re-export main types
pub use traits::{collect_stream, ModelClient, StreamChunk, StreamingResponse};
pub use types::{ChatMessage, Completion, CompletionOptions, FinishReason, MessageRole, TokenUsage};
