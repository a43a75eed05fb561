//! Gemini-native `generateContent` codec.
//!
//! Unlike the OpenAI-compatible path this call is not streamed, and the
//! system and user prompts are joined into a single text part instead of
//! separate roles. Responses without candidate text degrade in-band: a
//! block reason or a parse failure becomes the response text.

use std::time::Instant;

use reqwest::{Client, Url};
use serde::Deserialize;

use crate::dispatch::{
    MAX_RESPONSE_BYTES, RequestParams, ResponseStatus, TransportOutput, error_summary,
    read_capped,
};
use crate::error::FoundryError;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const BLOCKED_PREFIX: &str = "Error: Prompt was blocked. Reason: ";

pub const UNPARSEABLE_MESSAGE: &str = "Error parsing Gemini response or response was empty.";

const PROVIDER: &str = "Gemini";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    candidates_token_count: Option<u64>,
}

#[derive(Deserialize)]
struct GeminiModelList {
    #[serde(default)]
    models: Vec<GeminiModel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiModel {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

/// Decoded `generateContent` body.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedGeneration {
    pub text: String,
    pub reported_tokens: Option<u64>,
    pub status: ResponseStatus,
}

/// `{base}/models/{model}:generateContent?key={api_key}`, key URL-encoded.
pub fn generate_url(base_url: &str, model: &str, api_key: &str) -> Result<Url, FoundryError> {
    let raw = format!(
        "{}/models/{}:generateContent",
        base_url.trim_end_matches('/'),
        model.trim()
    );
    Url::parse_with_params(&raw, &[("key", api_key)])
        .map_err(|e| FoundryError::InvalidEndpoint(format!("gemini model {model:?}: {e}")))
}

/// Single-part body: `"{system}\n\n{user}"`.
pub fn build_body(params: &RequestParams) -> serde_json::Value {
    let full_prompt = format!("{}\n\n{}", params.system_prompt, params.user_prompt);
    serde_json::json!({
        "contents": [
            {"parts": [{"text": full_prompt}]}
        ]
    })
}

/// Decode a 2xx body. Never fails: missing text turns into an in-band
/// message tagged `Blocked` or `Unparseable`.
pub fn parse_generation(body: &[u8]) -> ParsedGeneration {
    let Ok(response) = serde_json::from_slice::<GenerateResponse>(body) else {
        return unparseable();
    };

    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text);

    if let Some(text) = text {
        return ParsedGeneration {
            text,
            reported_tokens: response
                .usage_metadata
                .and_then(|u| u.candidates_token_count),
            status: ResponseStatus::Complete,
        };
    }

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return ParsedGeneration {
            text: format!("{BLOCKED_PREFIX}{reason}"),
            reported_tokens: None,
            status: ResponseStatus::Blocked(reason),
        };
    }

    unparseable()
}

fn unparseable() -> ParsedGeneration {
    ParsedGeneration {
        text: UNPARSEABLE_MESSAGE.to_string(),
        reported_tokens: None,
        status: ResponseStatus::Unparseable,
    }
}

/// Issue one `generateContent` call. Time to first token equals the whole
/// request duration since nothing is streamed.
pub async fn generate_content(
    client: &Client,
    base_url: &str,
    params: &RequestParams,
) -> Result<TransportOutput, FoundryError> {
    let url = generate_url(base_url, &params.model_name, &params.credential)?;
    let start = Instant::now();

    // without_url(): the query string carries the API key.
    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(&build_body(params))
        .send()
        .await
        .map_err(|e| FoundryError::Request(e.without_url()))?;

    if !response.status().is_success() {
        let (status, message) = error_summary(response).await;
        return Err(FoundryError::Transport {
            provider: PROVIDER.to_string(),
            message,
            status: Some(status),
        });
    }

    let (bytes, truncated) = read_capped(response, MAX_RESPONSE_BYTES)
        .await
        .map_err(|e| FoundryError::Transport {
            provider: PROVIDER.to_string(),
            message: format!("failed to read response body: {}", e.without_url()),
            status: None,
        })?;
    if truncated {
        return Err(FoundryError::Transport {
            provider: PROVIDER.to_string(),
            message: format!("response too large (max {MAX_RESPONSE_BYTES} bytes)"),
            status: None,
        });
    }

    let elapsed = start.elapsed();
    let parsed = parse_generation(&bytes);
    if parsed.status.is_degraded() {
        tracing::warn!(status = ?parsed.status, "gemini response degraded");
    }

    Ok(TransportOutput {
        text: parsed.text,
        reported_tokens: parsed.reported_tokens,
        first_token_after: Some(elapsed),
        elapsed,
        status: parsed.status,
    })
}

/// `GET {base}/models?key=`, keeping models that can serve `generateContent`.
pub async fn list_models(
    client: &Client,
    base_url: &str,
    api_key: &str,
) -> Result<Vec<String>, FoundryError> {
    let raw = format!("{}/models", base_url.trim_end_matches('/'));
    let url = Url::parse_with_params(&raw, &[("key", api_key)])
        .map_err(|e| FoundryError::InvalidEndpoint(format!("{raw}: {e}")))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FoundryError::Request(e.without_url()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FoundryError::Transport {
            provider: PROVIDER.to_string(),
            message: format!("model listing failed: {status}"),
            status: Some(status.as_u16()),
        });
    }

    let list: GeminiModelList = response.json().await.map_err(|e| FoundryError::Transport {
        provider: PROVIDER.to_string(),
        message: format!("failed to parse model list: {}", e.without_url()),
        status: None,
    })?;

    Ok(list
        .models
        .into_iter()
        .filter(|m| {
            m.supported_generation_methods
                .iter()
                .any(|method| method == "generateContent")
        })
        .map(|m| m.name.trim_start_matches("models/").to_string())
        .collect())
}
