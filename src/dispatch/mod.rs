pub mod gemini;
pub mod http;
pub mod openai;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FoundryError;

/// Fixed base URL for OpenAI chat completions.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Fixed base URL for xAI (Grok) chat completions.
pub const GROK_BASE_URL: &str = "https://api.x.ai/v1";

/// Bearer placeholder sent to LM Studio. The server ignores it.
pub const LM_STUDIO_TOKEN: &str = "lm-studio";

/// Cap on any response body held in memory, streamed text included.
pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Cap on how much of an error body is echoed into `FoundryError::Transport`.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Read at most `limit` bytes of a body. The flag is true when the body was
/// longer and the read stopped early.
pub(crate) async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<(Vec<u8>, bool), reqwest::Error> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            body.extend_from_slice(&chunk[..limit - body.len()]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

/// Status code and `"{status}: {preview}"` for a non-2xx response.
pub(crate) async fn error_summary(response: reqwest::Response) -> (u16, String) {
    let status = response.status();
    let body = read_capped(response, MAX_RESPONSE_BYTES)
        .await
        .map(|(body, _)| body)
        .unwrap_or_default();
    let text = String::from_utf8_lossy(&body);
    let preview: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
    (status.as_u16(), format!("{status}: {preview}"))
}

/// Backend AI service. Determines the transport flavor and what the
/// credential means (API key vs. server base URL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    Gemini,
    #[serde(rename = "LM Studio")]
    LmStudio,
    OpenAI,
    Grok,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Gemini,
        ProviderKind::LmStudio,
        ProviderKind::OpenAI,
        ProviderKind::Grok,
    ];

    /// Display name, also the persisted `selectedAIProvider` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::LmStudio => "LM Studio",
            Self::OpenAI => "OpenAI",
            Self::Grok => "Grok",
        }
    }

    /// True when the credential is a server address rather than a secret.
    pub fn credential_is_address(&self) -> bool {
        matches!(self, Self::LmStudio)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = FoundryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Gemini" => Ok(Self::Gemini),
            "LM Studio" => Ok(Self::LmStudio),
            "OpenAI" => Ok(Self::OpenAI),
            "Grok" => Ok(Self::Grok),
            other => Err(FoundryError::UnknownProvider(other.to_string())),
        }
    }
}

/// Normalized request, built fresh for every call.
#[derive(Clone)]
pub struct RequestParams {
    pub provider: ProviderKind,
    pub system_prompt: String,
    pub user_prompt: String,
    /// API key, or base URL for LM Studio.
    pub credential: String,
    pub model_name: String,
}

impl fmt::Debug for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RequestParams");
        s.field("provider", &self.provider)
            .field("model_name", &self.model_name)
            .field("system_prompt_chars", &self.system_prompt.chars().count())
            .field("user_prompt_chars", &self.user_prompt.chars().count());

        if self.provider.credential_is_address() {
            s.field("credential", &self.credential);
        } else {
            s.field("credential", &"[REDACTED]");
        }

        s.finish()
    }
}

/// OpenAI-compatible endpoint resolved from a provider + credential.
#[derive(Clone, PartialEq, Eq)]
pub struct OpenAiEndpoint {
    /// Base URL up to and including `/v1`, no trailing slash.
    pub base_url: String,
    pub bearer: String,
}

impl fmt::Debug for OpenAiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEndpoint")
            .field("base_url", &self.base_url)
            .field("bearer", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiEndpoint {
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }
}

/// Which transport variant handles a request. Exhaustive over `ProviderKind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Gemini,
    OpenAiCompatible(OpenAiEndpoint),
}

impl Route {
    /// Resolve the transport variant for a provider. LM Studio addresses are
    /// validated here so a malformed URL fails before any network I/O.
    pub fn resolve(provider: ProviderKind, credential: &str) -> Result<Self, FoundryError> {
        match provider {
            ProviderKind::Gemini => Ok(Self::Gemini),
            ProviderKind::LmStudio => {
                let address = credential.trim().trim_end_matches('/');
                let url = reqwest::Url::parse(address)
                    .map_err(|e| FoundryError::InvalidEndpoint(format!("{address}: {e}")))?;
                if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                    return Err(FoundryError::InvalidEndpoint(address.to_string()));
                }
                Ok(Self::OpenAiCompatible(OpenAiEndpoint {
                    base_url: format!("{address}/v1"),
                    bearer: LM_STUDIO_TOKEN.to_string(),
                }))
            }
            ProviderKind::OpenAI => Ok(Self::OpenAiCompatible(OpenAiEndpoint {
                base_url: OPENAI_BASE_URL.to_string(),
                bearer: credential.to_string(),
            })),
            ProviderKind::Grok => Ok(Self::OpenAiCompatible(OpenAiEndpoint {
                base_url: GROK_BASE_URL.to_string(),
                bearer: credential.to_string(),
            })),
        }
    }
}

/// How the transport's text should be read by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// Normal model output.
    Complete,
    /// Provider refused the prompt; text carries the in-band block message.
    Blocked(String),
    /// Body was empty or unparseable; text carries the in-band error message.
    Unparseable,
}

impl ResponseStatus {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Complete)
    }
}

/// Raw result of one transport call, before metrics are attached.
#[derive(Debug, Clone)]
pub struct TransportOutput {
    pub text: String,
    /// Provider-reported output tokens, if the backend sent usage.
    pub reported_tokens: Option<u64>,
    /// Time to the first non-empty content fragment (streaming only).
    pub first_token_after: Option<Duration>,
    /// Wall-clock duration of the whole call.
    pub elapsed: Duration,
    pub status: ResponseStatus,
}

/// Wire-level backend. `HttpTransport` is the production implementation;
/// tests inject fakes to observe routing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// OpenAI-compatible chat completion (LM Studio, OpenAI, Grok).
    async fn chat_completion(
        &self,
        endpoint: &OpenAiEndpoint,
        params: &RequestParams,
    ) -> Result<TransportOutput, FoundryError>;

    /// Gemini-native `generateContent`.
    async fn generate_content(&self, params: &RequestParams)
    -> Result<TransportOutput, FoundryError>;

    /// List model ids available at an OpenAI-compatible endpoint.
    async fn list_openai_models(
        &self,
        endpoint: &OpenAiEndpoint,
    ) -> Result<Vec<String>, FoundryError>;

    /// List Gemini models that support `generateContent`.
    async fn list_gemini_models(&self, api_key: &str) -> Result<Vec<String>, FoundryError>;
}
