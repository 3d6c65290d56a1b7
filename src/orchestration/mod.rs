//! Resource-request orchestration - runtime core for writing-analysis calls
//!
//! This module drives multi-step conversations in which the model may ask for
//! auxiliary material before answering:
//! - Termination control (caller cancellation merged with a timeout)
//! - Directive parsing for guide and context requests
//! - Word-budget trimming of fulfillment turns
//! - Usage accumulation across every call
//! - Session storage with a background reaper
//!
//! The [`ExecutionEngine`] ties these together and exposes three protocols:
//! guide fulfillment, context resource fulfillment (with a recovery turn) and
//! a plain single turn.

pub mod directives;
pub mod engine;
pub mod error;
pub mod fulfillment;
pub mod resources;
pub mod session;
pub mod termination;
pub mod trim;
pub mod usage;

// Re-export main types
pub use directives::{DirectiveParser, ResourceRequest, TagDirectiveParser};
pub use engine::{EngineConfig, ExecutionEngine, ExecutionRequest, ExecutionResult};
pub use error::{OrchestrationError, OrchestrationResult, SessionError};
pub use resources::{
    CatalogEntry, ContextResourceProvider, GuideLoader, LoadedResource, StatusCallback,
    UsageCallback,
};
pub use session::{ReaperHandle, SessionGuard, SessionId, SessionInfo, SessionStore};
pub use termination::{compose, AbortSignal, TerminationContext};
pub use trim::{count_words, trim_to_words, TrimResult};
pub use usage::accumulate;
