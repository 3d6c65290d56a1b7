//! Craftloop - turn-bounded resource orchestration for writing-analysis tools
//!
//! Craftloop provides a set of feature-gated modules for driving a language
//! model that may ask for craft guides or project context before answering:
//!
//! - **`config`** - TOML configuration and `.env` overrides
//! - **`observability`** - Markdown transcript logging
//! - **`provider`** - Model client abstraction and message types
//! - **`orchestration`** - Termination, directive parsing, sessions and the engine
//!
//! # Features
//!
//! Enable the features you need in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! craftloop = { version = "0.3", features = ["provider"] }
//! # Or enable everything:
//! craftloop = { version = "0.3", features = ["all"] }
//! ```
//!
//! # Example: Loading configuration
//!
//! ```ignore
//! use craftloop::config::{ConfigurationLoader, EnvironmentLoader};
//! use craftloop::orchestration::EngineConfig;
//! use std::path::Path;
//!
//! let env = EnvironmentLoader::new(Some(Path::new(".env")));
//! let loader = ConfigurationLoader::new(Some(Path::new("config/craftloop.toml"))).unwrap();
//!
//! let mut engine_config = EngineConfig::from(&loader.config);
//! engine_config.apply_overrides(&env);
//! println!("Max turns: {}", engine_config.max_turns);
//! ```
//!
//! # Example: Running the guide protocol
//!
//! ```ignore
//! use craftloop::orchestration::{ExecutionEngine, ExecutionRequest, EngineConfig};
//! use std::sync::Arc;
//!
//! async fn analyze(client: Arc<dyn craftloop::provider::ModelClient>,
//!                  guides: Arc<dyn craftloop::orchestration::GuideLoader>) {
//!     let engine = ExecutionEngine::new(client, EngineConfig::default())
//!         .unwrap()
//!         .with_guide_loader(guides);
//!
//!     let request = ExecutionRequest::new("analysis", "Review the pacing of this scene: ...")
//!         .with_system_prompt("You are a developmental editor.");
//!
//!     match engine.run_with_guides(request).await {
//!         Ok(result) => println!("{} (guides: {:?})", result.content, result.used_ids),
//!         Err(e) if e.is_cancelled() => println!("cancelled"),
//!         Err(e) => eprintln!("failed: {}", e),
//!     }
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management (enabled with the `config` feature)
#[cfg(feature = "config")]
pub mod config;

/// Observability utilities (enabled with the `observability` feature)
#[cfg(feature = "observability")]
pub mod observability;

/// Model client abstraction (enabled with the `provider` feature)
#[cfg(feature = "provider")]
pub mod provider;

/// Resource orchestration (enabled with the `orchestration` feature)
#[cfg(feature = "orchestration")]
pub mod orchestration;

/// Prelude module for convenient imports
pub mod prelude {
    #[cfg(feature = "config")]
    pub use crate::config::{Configuration, ConfigurationLoader, EnvironmentLoader};

    #[cfg(feature = "observability")]
    pub use crate::observability::Logger;

    #[cfg(feature = "provider")]
    pub use crate::provider::{
        ChatMessage, Completion, CompletionOptions, FinishReason, MessageRole, ModelClient,
        TokenUsage,
    };

    #[cfg(feature = "orchestration")]
    pub use crate::orchestration::{
        AbortSignal, ContextResourceProvider, EngineConfig, ExecutionEngine, ExecutionRequest,
        ExecutionResult, GuideLoader, LoadedResource, OrchestrationError, SessionStore,
    };
}
