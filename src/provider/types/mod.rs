//! Provider module types

pub mod internal;
pub mod generate;

pub use internal::{ChatMessage, MessageRole};
pub use generate::{Completion, CompletionOptions, FinishReason, TokenUsage};
