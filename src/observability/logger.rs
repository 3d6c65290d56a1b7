//! Markdown transcript logger for orchestrated calls.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::provider::ChatMessage;

/// Logger for orchestrated model conversations.
///
/// Writes an append-only markdown transcript: session boundaries, every model
/// call, resource requests and turn-ceiling events. Console echo goes through
/// `tracing` so hosts decide where it ends up.
#[derive(Debug)]
pub struct Logger {
    log_file: PathBuf,
    log_level: String,
}

impl Logger {
    /// Initialize logger.
    ///
    /// # Arguments
    /// * `log_file` - Path to log file. If None, creates a timestamped file in temp directory.
    /// * `log_level` - Logging level (defaults to "INFO").
    pub fn new(log_file: Option<&Path>, log_level: Option<&str>) -> Result<Self> {
        let log_file = match log_file {
            Some(p) => p.to_path_buf(),
            None => {
                let mut dir = std::env::temp_dir();
                dir.push("craftloop-logs");
                std::fs::create_dir_all(&dir).with_context(|| {
                    format!("Failed to create log directory: {}", dir.display())
                })?;
                let filename = format!(
                    "session_{}_{}.md",
                    Utc::now().timestamp_millis(),
                    std::process::id()
                );
                dir.join(filename)
            }
        };

        let log_level = log_level.unwrap_or("INFO").to_uppercase();

        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let logger = Self {
            log_file,
            log_level,
        };

        if !logger.log_file.exists() {
            logger.initialize_log_file()?;
        }

        Ok(logger)
    }

    fn initialize_log_file(&self) -> Result<()> {
        let mut file = File::create(&self.log_file)
            .with_context(|| format!("Failed to create log file: {}", self.log_file.display()))?;

        let now: DateTime<Utc> = Utc::now();

        writeln!(file, "# Orchestration Log\n")?;
        writeln!(file, "Log started: {}\n", now.to_rfc3339())?;
        writeln!(file, "---\n")?;

        Ok(())
    }

    fn append_to_log(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open log file: {}", self.log_file.display()))?;

        write!(file, "{}", content).with_context(|| "Failed to write to log file")?;

        Ok(())
    }

    fn is_debug(&self) -> bool {
        self.log_level == "DEBUG"
    }

    /// Log session start.
    ///
    /// # Arguments
    /// * `tool_label` - Diagnostic name of the feature driving the call.
    /// * `config` - Effective settings for the call.
    pub fn log_session_start(
        &self,
        tool_label: &str,
        config: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "## Session Started - {}\n\n**Tool:** {}\n**Config:** {}\n\n",
            now.to_rfc3339(),
            tool_label,
            serde_json::to_string_pretty(config).unwrap_or_default()
        );

        self.append_to_log(&content)?;
        tracing::info!(tool = tool_label, "session started");
        Ok(())
    }

    /// Log one model call.
    ///
    /// Full message bodies are only written at DEBUG level.
    pub fn log_model_call(
        &self,
        turn: u32,
        messages: &[ChatMessage],
        response: &str,
        finish_reason: Option<&str>,
    ) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();

        let messages_block = if self.is_debug() && !messages.is_empty() {
            let json = serde_json::to_string_pretty(messages).unwrap_or_else(|_| "[]".to_string());
            format!("**Messages:**\n```json\n{}\n```\n\n", json)
        } else {
            format!("**Messages:** {} messages\n\n", messages.len())
        };

        let content = format!(
            "### Model Call (turn {}) - {}\n\n{}**Finish reason:** {}\n\n**Response:**\n```\n{}\n```\n\n",
            turn,
            now.to_rfc3339(),
            messages_block,
            finish_reason.unwrap_or("unreported"),
            response
        );

        self.append_to_log(&content)?;
        tracing::debug!(turn, "model call logged");
        Ok(())
    }

    /// Log a resource request parsed from model output.
    ///
    /// # Arguments
    /// * `kind` - "guide" or "context".
    /// * `ids` - Requested ids in request order.
    pub fn log_resource_request(&self, kind: &str, ids: &[String]) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "### Resource Request - {}\n\n**Kind:** {}\n**Ids:** {}\n\n",
            now.to_rfc3339(),
            kind,
            if ids.is_empty() {
                "(none)".to_string()
            } else {
                ids.join(", ")
            }
        );

        self.append_to_log(&content)?;
        Ok(())
    }

    /// Log that the turn ceiling ended the loop.
    pub fn log_turn_ceiling(&self, max_turns: u32) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "### Turn Ceiling Reached - {}\n\n**Max turns:** {}\n\n",
            now.to_rfc3339(),
            max_turns
        );

        self.append_to_log(&content)?;
        tracing::warn!(max_turns, "turn ceiling reached");
        Ok(())
    }

    /// Log error with context.
    pub fn log_error(
        &self,
        error: &str,
        context: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let mut content = format!(
            "### Error - {}\n\n**Error:** {}\n\n",
            now.to_rfc3339(),
            error
        );

        if let Some(ctx) = context {
            content.push_str(&format!(
                "**Context:** {}\n\n",
                serde_json::to_string_pretty(ctx).unwrap_or_default()
            ));
        }

        self.append_to_log(&content)?;
        tracing::error!("{}", error);
        Ok(())
    }

    /// Log session completion.
    pub fn log_completion(&self, reason: &str) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "### Session Completed - {}\n\n**Reason:** {}\n\n---\n\n",
            now.to_rfc3339(),
            reason
        );

        self.append_to_log(&content)?;
        tracing::info!(reason, "session completed");
        Ok(())
    }

    /// Log custom content.
    pub fn log_custom(&self, title: &str, content: &str) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let log_content = format!("### {} - {}\n\n{}\n\n", title, now.to_rfc3339(), content);
        self.append_to_log(&log_content)
    }

    /// Get the log file path.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Get the log level.
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

#[cfg(test)]
mod tests;
