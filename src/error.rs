use thiserror::Error;

#[derive(Debug, Error)]
pub enum FoundryError {
    #[error("{provider} API Key or Address is missing.")]
    CredentialMissing { provider: String },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("transport failure from {provider}: {message}")]
    Transport {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    #[error("no prompt selected")]
    NoPromptSelected,

    #[error("no text selected")]
    EmptyInput,

    #[error("request cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

impl FoundryError {
    /// Extract provider name from structured error variants.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::CredentialMissing { provider } => Some(provider),
            Self::Transport { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Returns true for transport failures that a fresh attempt may fix.
    /// Resolution errors (prompt, input, credential, endpoint) never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Request(_))
    }

    /// Short message for the status bar / error banner.
    /// Does not leak upstream response bodies or URLs carrying API keys.
    pub fn user_message(&self) -> String {
        match self {
            Self::CredentialMissing { provider } => {
                format!("{provider} API Key or Address is missing.")
            }
            Self::InvalidEndpoint(msg) => format!("invalid endpoint: {msg}"),
            Self::Transport {
                provider, status, ..
            } => match status {
                Some(code) => format!("{provider} request failed ({code})"),
                None => format!("{provider} request failed"),
            },
            Self::Request(_) => "request to provider failed".to_string(),
            Self::UnknownProvider(name) => format!("unknown provider: {name}"),
            Self::PromptNotFound(_) => "Prompt not found.".to_string(),
            Self::NoPromptSelected => "no prompt selected".to_string(),
            Self::EmptyInput => "no text selected".to_string(),
            Self::Cancelled => "request cancelled".to_string(),
            Self::Config(msg) => format!("config error: {msg}"),
        }
    }
}
