//! Shared fakes for orchestrator and coordinator tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use textfoundry::dispatch::{
    OpenAiEndpoint, ProviderKind, RequestParams, ResponseStatus, Transport, TransportOutput,
};
use textfoundry::error::FoundryError;

/// One observed transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Chat {
        base_url: String,
        bearer: String,
        provider: ProviderKind,
        model: String,
        system_prompt: String,
        user_prompt: String,
    },
    Gemini {
        credential: String,
        model: String,
        system_prompt: String,
        user_prompt: String,
    },
    ListOpenAi {
        base_url: String,
    },
    ListGemini,
}

pub fn output(text: &str, tokens: Option<u64>) -> TransportOutput {
    TransportOutput {
        text: text.to_string(),
        reported_tokens: tokens,
        first_token_after: Some(Duration::from_millis(10)),
        elapsed: Duration::from_millis(20),
        status: ResponseStatus::Complete,
    }
}

pub fn transport_failure(message: &str) -> FoundryError {
    FoundryError::Transport {
        provider: "fake".to_string(),
        message: message.to_string(),
        status: Some(503),
    }
}

/// Records calls and replays scripted results. With an empty script every
/// call succeeds with `"corrected text"`.
#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<Call>>,
    script: Mutex<VecDeque<Result<TransportOutput, FoundryError>>>,
    gate: Option<Arc<Notify>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(results: Vec<Result<TransportOutput, FoundryError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// Every generation call blocks until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn respond(&self, call: Call) -> Result<TransportOutput, FoundryError> {
        self.calls.lock().unwrap().push(call);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(output("corrected text", Some(3))))
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn chat_completion(
        &self,
        endpoint: &OpenAiEndpoint,
        params: &RequestParams,
    ) -> Result<TransportOutput, FoundryError> {
        self.respond(Call::Chat {
            base_url: endpoint.base_url.clone(),
            bearer: endpoint.bearer.clone(),
            provider: params.provider,
            model: params.model_name.clone(),
            system_prompt: params.system_prompt.clone(),
            user_prompt: params.user_prompt.clone(),
        })
        .await
    }

    async fn generate_content(
        &self,
        params: &RequestParams,
    ) -> Result<TransportOutput, FoundryError> {
        self.respond(Call::Gemini {
            credential: params.credential.clone(),
            model: params.model_name.clone(),
            system_prompt: params.system_prompt.clone(),
            user_prompt: params.user_prompt.clone(),
        })
        .await
    }

    async fn list_openai_models(
        &self,
        endpoint: &OpenAiEndpoint,
    ) -> Result<Vec<String>, FoundryError> {
        self.calls.lock().unwrap().push(Call::ListOpenAi {
            base_url: endpoint.base_url.clone(),
        });
        Ok(vec!["local-model".to_string()])
    }

    async fn list_gemini_models(&self, _api_key: &str) -> Result<Vec<String>, FoundryError> {
        self.calls.lock().unwrap().push(Call::ListGemini);
        Ok(vec!["gemini-pro".to_string()])
    }
}

/// Poll until `cond` holds or a second passes.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
