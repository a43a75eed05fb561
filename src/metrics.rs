//! Response metrics: token counts and latency attached to a finished call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::{ResponseStatus, TransportOutput};

/// Characters per token used when the provider reports no usage.
/// An approximation, not a tokenizer.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Normalized result of one successful `send_prompt` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub text: String,
    /// Provider-reported output tokens, or `chars / 4` when unavailable.
    /// Zero for degraded (blocked/unparseable) responses.
    pub token_count: u64,
    pub time_to_first_token: Duration,
    /// Retries consumed before this attempt succeeded.
    pub retry_count: u32,
    pub status: ResponseStatus,
}

/// Estimated token count for a text: `character count / 4`.
pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count() as u64 / CHARS_PER_TOKEN
}

/// Throughput for a history entry. Zero when the duration is not positive.
pub fn tokens_per_second(token_count: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        token_count as f64 / secs
    } else {
        0.0
    }
}

/// Turn a transport's raw output into an `AiResponse`.
///
/// Time to first token falls back to the whole call duration when the
/// transport saw no content fragment (non-streaming or empty streams).
pub fn finalize(output: TransportOutput) -> AiResponse {
    let token_count = if output.status.is_degraded() {
        0
    } else {
        output
            .reported_tokens
            .unwrap_or_else(|| estimate_tokens(&output.text))
    };

    AiResponse {
        token_count,
        time_to_first_token: output.first_token_after.unwrap_or(output.elapsed),
        retry_count: 0,
        status: output.status,
        text: output.text,
    }
}
