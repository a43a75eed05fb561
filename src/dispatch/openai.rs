use std::time::Instant;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use crate::dispatch::{
    MAX_RESPONSE_BYTES, OpenAiEndpoint, RequestParams, ResponseStatus, TransportOutput,
    error_summary, read_capped,
};
use crate::error::FoundryError;

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    completion_tokens: Option<u64>,
}

/// Non-streaming shape, for servers that ignore `stream: true`.
#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelId>,
}

#[derive(Deserialize)]
struct ModelId {
    id: String,
}

/// One decoded SSE `data:` payload.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChunkDelta {
    pub content: Option<String>,
    pub completion_tokens: Option<u64>,
}

/// Request body: system + user messages, streamed.
pub fn build_chat_body(params: &RequestParams) -> serde_json::Value {
    serde_json::json!({
        "model": params.model_name,
        "messages": [
            {"role": "system", "content": params.system_prompt},
            {"role": "user", "content": params.user_prompt},
        ],
        "stream": true,
    })
}

/// Decode a single SSE data payload. Returns None for payloads that are not
/// chat-completion chunks (keep-alives, vendor extensions).
pub fn parse_chunk(data: &str) -> Option<ChunkDelta> {
    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content);
    Some(ChunkDelta {
        content,
        completion_tokens: chunk.usage.and_then(|u| u.completion_tokens),
    })
}

/// In-band text for a response that carried no usable content.
pub fn unparseable_message(provider: &str) -> String {
    format!("Error parsing {provider} response.")
}

/// Drop embedding models; they cannot serve chat completions.
pub fn filter_chat_models(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    ids.into_iter()
        .filter(|id| {
            let lower = id.to_lowercase();
            !lower.contains("embed")
        })
        .collect()
}

fn transport_error(provider: &str, message: String, status: Option<u16>) -> FoundryError {
    FoundryError::Transport {
        provider: provider.to_string(),
        message,
        status,
    }
}

async fn error_from_status(provider: &str, response: reqwest::Response) -> FoundryError {
    let (status, message) = error_summary(response).await;
    transport_error(provider, message, Some(status))
}

fn too_large(provider: &str) -> FoundryError {
    transport_error(
        provider,
        format!("response too large (max {MAX_RESPONSE_BYTES} bytes)"),
        None,
    )
}

/// Stream a chat completion and concatenate the content deltas.
///
/// Network and HTTP failures are returned as errors (retryable). A stream
/// that ends without any content becomes an in-band `Unparseable` result.
pub async fn stream_chat_completion(
    client: &Client,
    endpoint: &OpenAiEndpoint,
    params: &RequestParams,
) -> Result<TransportOutput, FoundryError> {
    let provider = params.provider.as_str();
    let start = Instant::now();

    let response = client
        .post(endpoint.chat_completions_url())
        .header("Authorization", format!("Bearer {}", endpoint.bearer))
        .header("Content-Type", "application/json")
        .header("Accept", "text/event-stream")
        .json(&build_chat_body(params))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(error_from_status(provider, response).await);
    }

    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    if is_json {
        tracing::debug!(provider, "server ignored stream flag, reading JSON body");
        return read_json_completion(provider, response, start).await;
    }

    let mut events = response.bytes_stream().eventsource();
    let mut text = String::new();
    let mut first_token_after = None;
    let mut reported_tokens = None;

    while let Some(event) = events.next().await {
        let event = event
            .map_err(|e| transport_error(provider, format!("stream error: {e}"), None))?;
        let data = event.data.trim();
        if data == "[DONE]" {
            break;
        }
        let Some(chunk) = parse_chunk(data) else {
            tracing::debug!(provider, "skipping non-chunk SSE payload");
            continue;
        };
        if let Some(delta) = chunk.content.filter(|d| !d.is_empty()) {
            if first_token_after.is_none() {
                first_token_after = Some(start.elapsed());
                tracing::debug!(provider, ttft_ms = start.elapsed().as_millis() as u64, "first token");
            }
            text.push_str(&delta);
            if text.len() > MAX_RESPONSE_BYTES {
                tracing::warn!(provider, bytes = text.len(), "stream exceeded size cap");
                return Err(too_large(provider));
            }
        }
        if chunk.completion_tokens.is_some() {
            reported_tokens = chunk.completion_tokens;
        }
    }

    let elapsed = start.elapsed();

    if text.is_empty() {
        tracing::warn!(provider, "stream ended without content");
        return Ok(TransportOutput {
            text: unparseable_message(provider),
            reported_tokens: None,
            first_token_after: None,
            elapsed,
            status: ResponseStatus::Unparseable,
        });
    }

    Ok(TransportOutput {
        text,
        reported_tokens,
        first_token_after,
        elapsed,
        status: ResponseStatus::Complete,
    })
}

async fn read_json_completion(
    provider: &str,
    response: reqwest::Response,
    start: Instant,
) -> Result<TransportOutput, FoundryError> {
    let (bytes, truncated) = read_capped(response, MAX_RESPONSE_BYTES)
        .await
        .map_err(|e| transport_error(provider, format!("failed to read response body: {e}"), None))?;

    if truncated {
        return Err(too_large(provider));
    }

    let elapsed = start.elapsed();
    let parsed = serde_json::from_slice::<ChatCompletion>(&bytes).ok().and_then(|c| {
        let tokens = c.usage.and_then(|u| u.completion_tokens);
        c.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|s| !s.is_empty())
            .map(|text| (text, tokens))
    });

    Ok(match parsed {
        Some((text, reported_tokens)) => TransportOutput {
            text,
            reported_tokens,
            first_token_after: None,
            elapsed,
            status: ResponseStatus::Complete,
        },
        None => {
            tracing::warn!(provider, "unparseable chat completion body");
            TransportOutput {
                text: unparseable_message(provider),
                reported_tokens: None,
                first_token_after: None,
                elapsed,
                status: ResponseStatus::Unparseable,
            }
        }
    })
}

/// `GET {base}/models`, embeddings filtered out.
pub async fn list_models(
    client: &Client,
    endpoint: &OpenAiEndpoint,
) -> Result<Vec<String>, FoundryError> {
    let response = client
        .get(endpoint.models_url())
        .header("Authorization", format!("Bearer {}", endpoint.bearer))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(error_from_status("models", response).await);
    }

    let list: ModelList = response
        .json()
        .await
        .map_err(|e| transport_error("models", format!("failed to parse model list: {e}"), None))?;

    Ok(filter_chat_models(list.data.into_iter().map(|m| m.id)))
}
