//! Options and results for a single model completion call.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Configuration for a completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Temperature for sampling (None = provider default)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Token the client should observe to abort generation server-side
    pub cancellation: Option<CancellationToken>,
}

impl CompletionOptions {
    /// Create options with provider defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Validate the options
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                anyhow::bail!("Temperature must be between 0.0 and 2.0");
            }
        }

        if self.max_tokens == Some(0) {
            anyhow::bail!("Max tokens must be greater than 0");
        }

        Ok(())
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// Natural end of output
    Stop,
    /// Output was cut off by a token cap
    Length,
    /// Any other provider-reported reason
    Other(String),
}

impl FinishReason {
    /// Parse a provider finish-reason string
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the response was truncated by the token cap
    pub fn is_length(&self) -> bool {
        matches!(self, Self::Length)
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => f.write_str("stop"),
            Self::Length => f.write_str("length"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Token accounting reported for one or more calls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u64,
    /// Tokens generated
    pub completion_tokens: u64,
    /// Prompt + completion as reported by the provider
    pub total_tokens: u64,
    /// Cost in USD when the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl TokenUsage {
    /// Create usage without cost information
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost_usd: None,
        }
    }

    /// Attach a cost
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }
}

/// Result of one completion call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Generated text
    pub content: String,
    /// Finish reason if the provider reported one
    pub finish_reason: Option<FinishReason>,
    /// Usage if the provider reported it
    pub usage: Option<TokenUsage>,
}

impl Completion {
    /// Create a completion that stopped normally
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        }
    }

    /// Set the finish reason
    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    /// Set the usage
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Whether this completion was cut off by the token cap
    pub fn is_truncated(&self) -> bool {
        self.finish_reason.as_ref().is_some_and(FinishReason::is_length)
    }
}
