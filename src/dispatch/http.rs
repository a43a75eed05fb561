use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::dispatch::gemini::{self, GEMINI_BASE_URL};
use crate::dispatch::{openai, OpenAiEndpoint, RequestParams, Transport, TransportOutput};
use crate::error::FoundryError;

/// Upper bound on a single attempt. Local models can be slow to load.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Production transport: one pooled HTTP client shared by both codecs.
pub struct HttpTransport {
    client: Client,
    gemini_base_url: String,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_gemini_base_url(GEMINI_BASE_URL)
    }

    /// Point the Gemini codec at a different host (mock servers, proxies).
    pub fn with_gemini_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            gemini_base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn chat_completion(
        &self,
        endpoint: &OpenAiEndpoint,
        params: &RequestParams,
    ) -> Result<TransportOutput, FoundryError> {
        openai::stream_chat_completion(&self.client, endpoint, params).await
    }

    async fn generate_content(
        &self,
        params: &RequestParams,
    ) -> Result<TransportOutput, FoundryError> {
        gemini::generate_content(&self.client, &self.gemini_base_url, params).await
    }

    async fn list_openai_models(
        &self,
        endpoint: &OpenAiEndpoint,
    ) -> Result<Vec<String>, FoundryError> {
        openai::list_models(&self.client, endpoint).await
    }

    async fn list_gemini_models(&self, api_key: &str) -> Result<Vec<String>, FoundryError> {
        gemini::list_models(&self.client, &self.gemini_base_url, api_key).await
    }
}
