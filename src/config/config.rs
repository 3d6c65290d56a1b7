//! TOML configuration parsing and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Turn loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Hard ceiling on model calls per orchestrated call (recovery turn excluded)
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Word ceiling for an assembled guide turn
    #[serde(default = "default_word_budget")]
    pub guide_word_budget: usize,
    /// Word ceiling for an assembled context-resource turn
    #[serde(default = "default_word_budget")]
    pub context_word_budget: usize,
    /// Wall-clock limit for a whole orchestrated call
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Offer the guide catalog to the model
    #[serde(default = "default_true")]
    pub enable_guides: bool,
}

fn default_max_turns() -> u32 {
    3
}

fn default_word_budget() -> usize {
    50_000
}

fn default_true() -> bool {
    true
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            guide_word_budget: default_word_budget(),
            context_word_budget: default_word_budget(),
            timeout_ms: None,
            enable_guides: true,
        }
    }
}

/// Model call configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub enable_streaming: bool,
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,
    #[serde(default = "default_max_session_age")]
    pub max_session_age_seconds: u64,
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_max_session_age() -> u64 {
    600
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            reaper_interval_seconds: default_reaper_interval(),
            max_session_age_seconds: default_max_session_age(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            log_level: default_log_level(),
        }
    }
}

/// Loads and manages TOML configuration.
#[derive(Debug)]
pub struct ConfigurationLoader {
    pub config_path: PathBuf,
    pub config: Configuration,
}

impl ConfigurationLoader {
    /// Initialize configuration loader.
    ///
    /// # Arguments
    /// * `config_path` - Path to TOML config file. If None or missing, uses default config.
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config_path = config_path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("config/craftloop.toml"));

        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            Configuration::default()
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Create a configuration loader from a pre-parsed Configuration.
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config_path: PathBuf::from("config/craftloop.toml"),
            config,
        }
    }

    /// Load configuration from TOML file.
    fn load_config(path: &Path) -> Result<Configuration> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    /// Get numeric configuration value by dot-notation key.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match key {
            "orchestration.max_turns" => Some(self.config.orchestration.max_turns as u64),
            "orchestration.guide_word_budget" => {
                Some(self.config.orchestration.guide_word_budget as u64)
            }
            "orchestration.context_word_budget" => {
                Some(self.config.orchestration.context_word_budget as u64)
            }
            "orchestration.timeout_ms" => self.config.orchestration.timeout_ms,
            "llm.max_tokens" => self.config.llm.max_tokens.map(u64::from),
            "sessions.reaper_interval_seconds" => Some(self.config.sessions.reaper_interval_seconds),
            "sessions.max_session_age_seconds" => Some(self.config.sessions.max_session_age_seconds),
            _ => None,
        }
    }

    /// Get boolean configuration value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match key {
            "orchestration.enable_guides" => Some(self.config.orchestration.enable_guides),
            "llm.enable_streaming" => Some(self.config.llm.enable_streaming),
            _ => None,
        }
    }

    /// Get string configuration value.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match key {
            "logging.log_file" => self.config.logging.log_file.clone(),
            "logging.log_level" => Some(self.config.logging.log_level.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Configuration::default();
        assert_eq!(config.orchestration.max_turns, 3);
        assert_eq!(config.orchestration.guide_word_budget, 50_000);
        assert_eq!(config.orchestration.context_word_budget, 50_000);
        assert!(config.orchestration.timeout_ms.is_none());
        assert!(config.orchestration.enable_guides);
        assert!(!config.llm.enable_streaming);
        assert_eq!(config.sessions.reaper_interval_seconds, 60);
        assert_eq!(config.logging.log_level, "INFO");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let loader = ConfigurationLoader::new(Some(&temp_dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loader.get_u64("orchestration.max_turns"), Some(3));
        assert_eq!(loader.get_u64("orchestration.timeout_ms"), None);
        assert_eq!(loader.get_bool("orchestration.enable_guides"), Some(true));
    }

    #[test]
    fn test_partial_config_from_toml() {
        use std::fs;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[orchestration]
max_turns = 5
context_word_budget = 1200
timeout_ms = 90000

[llm]
temperature = 0.4
enable_streaming = true

[logging]
log_file = "/tmp/craftloop.md"
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).unwrap();

        let loader = ConfigurationLoader::new(Some(temp_file.path())).unwrap();
        assert_eq!(loader.get_u64("orchestration.max_turns"), Some(5));
        assert_eq!(loader.get_u64("orchestration.guide_word_budget"), Some(50_000));
        assert_eq!(loader.get_u64("orchestration.context_word_budget"), Some(1200));
        assert_eq!(loader.get_u64("orchestration.timeout_ms"), Some(90_000));
        assert_eq!(loader.config.llm.temperature, Some(0.4));
        assert_eq!(loader.get_bool("llm.enable_streaming"), Some(true));
        assert_eq!(
            loader.get_string("logging.log_file"),
            Some("/tmp/craftloop.md".to_string())
        );
        assert_eq!(loader.get_u64("sessions.max_session_age_seconds"), Some(600));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        use std::fs;
        use tempfile::NamedTempFile;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[orchestration\nmax_turns = ").unwrap();

        let err = ConfigurationLoader::new(Some(temp_file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML config"));
    }
}
