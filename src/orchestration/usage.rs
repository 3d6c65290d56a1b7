//! Token usage accumulation across the calls of one orchestrated call

use crate::provider::TokenUsage;

/// Fold one call's usage into a running total.
///
/// A missing delta leaves the total untouched; a missing total is seeded from
/// the delta. Cost stays `None` until some call reports one, after which
/// missing costs count as zero.
pub fn accumulate(total: Option<TokenUsage>, delta: Option<&TokenUsage>) -> Option<TokenUsage> {
    let Some(delta) = delta else {
        return total;
    };
    let Some(total) = total else {
        return Some(delta.clone());
    };

    let cost_usd = match (total.cost_usd, delta.cost_usd) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    };

    Some(TokenUsage {
        prompt_tokens: total.prompt_tokens + delta.prompt_tokens,
        completion_tokens: total.completion_tokens + delta.completion_tokens,
        total_tokens: total.total_tokens + delta.total_tokens,
        cost_usd,
    })
}
