use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dispatch::{ProviderKind, RequestParams, Route, Transport};
use crate::error::FoundryError;
use crate::metrics::{self, AiResponse};
use crate::retry::{DEFAULT_RETRY_DELAY, RetryPolicy};

/// Single entry point for sending a prompt to any provider.
///
/// Resolves the transport variant for the provider, runs it under a
/// `RetryPolicy`, and attaches response metrics. Credentials are taken per
/// call and never stored. Emptiness of the credential is the caller's check.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    retry_delay: Duration,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the pause between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn send_prompt(
        &self,
        params: RequestParams,
        max_retries: u32,
    ) -> Result<AiResponse, FoundryError> {
        // Routing errors (bad LM Studio address) surface before any I/O.
        let route = Route::resolve(params.provider, &params.credential)?;

        tracing::info!(
            provider = %params.provider,
            model = %params.model_name,
            max_retries,
            "sending prompt"
        );

        let policy = RetryPolicy::new(max_retries).with_delay(self.retry_delay);
        let transport = &self.transport;
        let route = &route;
        let params = &params;

        let response = policy
            .execute(|| async move {
                let output = match route {
                    Route::Gemini => transport.generate_content(params).await?,
                    Route::OpenAiCompatible(endpoint) => {
                        transport.chat_completion(endpoint, params).await?
                    }
                };
                Ok(metrics::finalize(output))
            })
            .await?;

        tracing::info!(
            provider = %params.provider,
            tokens = response.token_count,
            ttft_ms = response.time_to_first_token.as_millis() as u64,
            retries = response.retry_count,
            degraded = response.status.is_degraded(),
            "prompt complete"
        );

        Ok(response)
    }

    /// `send_prompt` that gives up with `Cancelled` once `cancel` fires,
    /// whether it is waiting on the network or between retries.
    pub async fn send_prompt_cancellable(
        &self,
        params: RequestParams,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Result<AiResponse, FoundryError> {
        tokio::select! {
            result = self.send_prompt(params, max_retries) => result,
            () = cancel.cancelled() => {
                tracing::info!("prompt cancelled");
                Err(FoundryError::Cancelled)
            }
        }
    }

    /// List models offered by a provider. Not retried.
    pub async fn list_models(
        &self,
        provider: ProviderKind,
        credential: &str,
    ) -> Result<Vec<String>, FoundryError> {
        match Route::resolve(provider, credential)? {
            Route::Gemini => self.transport.list_gemini_models(credential).await,
            Route::OpenAiCompatible(endpoint) => {
                self.transport.list_openai_models(&endpoint).await
            }
        }
    }
}
