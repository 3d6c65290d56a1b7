//! Environment variable loading and management.
//!
//! Only turn-loop knobs are read from the environment. Model credentials are
//! the model client's concern.

use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Environment variable overriding `orchestration.max_turns`
pub const MAX_TURNS_VAR: &str = "CRAFTLOOP_MAX_TURNS";
/// Environment variable overriding `orchestration.timeout_ms`
pub const TIMEOUT_MS_VAR: &str = "CRAFTLOOP_TIMEOUT_MS";

/// Loads environment variables from .env file and system environment.
#[derive(Debug, Clone)]
pub struct EnvironmentLoader {
    env_file: Option<String>,
    /// Fixed variable set; the process environment is read when `None`
    vars: Option<HashMap<String, String>>,
}

impl EnvironmentLoader {
    /// Initialize the environment loader.
    ///
    /// # Arguments
    /// * `env_file` - Path to .env file. Only loaded when given explicitly.
    pub fn new(env_file: Option<&Path>) -> Self {
        if let Some(path) = env_file {
            if path.exists() {
                if let Err(e) = dotenv::from_path(path) {
                    eprintln!("Warning: Failed to load .env file: {}", e);
                }
            }
        }

        Self {
            env_file: env_file.map(|p| p.to_string_lossy().to_string()),
            vars: None,
        }
    }

    /// Loader reading only the given variables, never the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            env_file: None,
            vars: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        match &self.vars {
            Some(vars) => vars.get(name).cloned(),
            None => env::var(name).ok(),
        }
    }

    /// Path of the loaded .env file, if one was given
    pub fn env_file(&self) -> Option<&str> {
        self.env_file.as_deref()
    }

    /// Turn ceiling override. Unparseable or zero values are ignored.
    pub fn max_turns(&self) -> Option<u32> {
        self.var(MAX_TURNS_VAR)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| *v > 0)
    }

    /// Timeout override in milliseconds. Unparseable values are ignored.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.var(TIMEOUT_MS_VAR)
            .and_then(|v| v.trim().parse::<u64>().ok())
    }
}

impl Default for EnvironmentLoader {
    fn default() -> Self {
        Self::new(None)
    }
}
