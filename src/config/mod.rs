//! Configuration management for the orchestration engine.
//!
//! This module provides configuration loading through TOML files and
//! environment variable overrides via `.env` files.
//!
//! # Example
//!
//! ```no_run
//! use craftloop::config::{ConfigurationLoader, EnvironmentLoader};
//! use std::path::Path;
//!
//! let env = EnvironmentLoader::new(None);
//! let loader = ConfigurationLoader::new(Some(Path::new("config/craftloop.toml"))).unwrap();
//!
//! println!("Max turns: {}", loader.config.orchestration.max_turns);
//! println!("Override: {:?}", env.max_turns());
//! ```

pub mod config;
pub mod environment;

// Re-export main types for convenience
pub use self::config::{
    Configuration, ConfigurationLoader, LlmConfig, LoggingConfig, OrchestrationConfig,
    SessionsConfig,
};
pub use self::environment::EnvironmentLoader;
