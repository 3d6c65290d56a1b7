//! Observability utilities for orchestrated model calls.
//!
//! Structured events go through `tracing`; the [`Logger`] additionally keeps
//! a markdown transcript of each orchestrated call.
//!
//! # Example
//!
//! ```no_run
//! use craftloop::observability::Logger;
//! use std::collections::HashMap;
//!
//! let logger = Logger::new(None, Some("DEBUG")).unwrap();
//! logger.log_session_start("prose-analysis", &HashMap::new()).unwrap();
//! logger.log_completion("done").unwrap();
//! ```

pub mod logger;

// Re-export main types for convenience
pub use logger::Logger;
