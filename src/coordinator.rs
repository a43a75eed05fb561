//! Hotkey / quick-action state machine.
//!
//! One `Coordinator` runs at most one correction at a time. A trigger that
//! arrives while a correction is in flight is dropped, not queued. Retries
//! happen inside the orchestrator only; the coordinator never re-runs an
//! action on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SettingsProvider;
use crate::dispatch::RequestParams;
use crate::error::FoundryError;
use crate::history::{HistoryItem, HistoryStore};
use crate::orchestrator::Orchestrator;
use crate::prompts::{self, CustomPromptHistory, PromptLibrary};

/// Coordinator state as seen by UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Busy,
    Ready,
    Error(String),
}

/// Which prompt a trigger should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptChoice {
    /// The prompt stored under `selectedPromptID` (main hotkey).
    Selected,
    /// A saved prompt or custom-history entry by id (per-prompt hotkey).
    Saved(Uuid),
    /// Free text typed into the quick action.
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub prompt: PromptChoice,
    /// Text to operate on instead of capturing the selection.
    pub text: Option<String>,
}

impl Trigger {
    pub fn hotkey(prompt: PromptChoice) -> Self {
        Self { prompt, text: None }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Result of a trigger that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Another correction was already running.
    Ignored,
    Completed(HistoryItem),
}

/// Captures the text to correct. Platform implementations simulate a copy
/// keystroke, wait ~200ms for the clipboard to settle, then read it.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn capture(&self) -> Option<String>;
}

/// Receives the corrected text (clipboard write + paste keystroke).
#[async_trait]
pub trait PasteSink: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<(), FoundryError>;
}

/// Success/failure cues (sounds, overlays).
pub trait Feedback: Send + Sync {
    fn success(&self) {}
    fn failure(&self, _message: &str) {}
}

/// Feedback that only logs.
pub struct LogFeedback;

impl Feedback for LogFeedback {
    fn success(&self) {
        tracing::info!("correction complete");
    }

    fn failure(&self, message: &str) {
        tracing::warn!(message, "correction failed");
    }
}

/// Releases the busy flag and the in-flight token however the action ends.
/// A trigger future dropped before finishing leaves the status `Idle`.
struct ActionGuard<'a> {
    coordinator: &'a Coordinator,
    finished: bool,
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        let coordinator = self.coordinator;
        coordinator.set_in_flight(None);
        if !self.finished {
            tracing::debug!("trigger dropped before completion");
            coordinator.status.send_replace(Status::Idle);
        }
        coordinator.busy.store(false, Ordering::Release);
    }
}

pub struct Coordinator {
    orchestrator: Arc<Orchestrator>,
    settings: Arc<dyn SettingsProvider>,
    prompts: Arc<PromptLibrary>,
    custom_prompts: Arc<CustomPromptHistory>,
    history: Arc<HistoryStore>,
    source: Arc<dyn TextSource>,
    sink: Arc<dyn PasteSink>,
    feedback: Arc<dyn Feedback>,
    busy: AtomicBool,
    status: watch::Sender<Status>,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl Coordinator {
    /// Coordinator with default prompts, in-memory stores and log-only feedback.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        settings: Arc<dyn SettingsProvider>,
        source: Arc<dyn TextSource>,
        sink: Arc<dyn PasteSink>,
    ) -> Self {
        let (status, _) = watch::channel(Status::Idle);
        Self {
            orchestrator,
            settings,
            prompts: Arc::new(PromptLibrary::default()),
            custom_prompts: Arc::new(CustomPromptHistory::in_memory()),
            history: Arc::new(HistoryStore::in_memory()),
            source,
            sink,
            feedback: Arc::new(LogFeedback),
            busy: AtomicBool::new(false),
            status,
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<PromptLibrary>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_custom_prompts(mut self, custom_prompts: Arc<CustomPromptHistory>) -> Self {
        self.custom_prompts = custom_prompts;
        self
    }

    pub fn with_history(mut self, history: Arc<HistoryStore>) -> Self {
        self.history = history;
        self
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn Feedback>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Abandon the in-flight request, if any. The trigger returns `Cancelled`.
    pub fn cancel(&self) {
        let guard = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = guard.as_ref() {
            token.cancel();
        }
    }

    /// Run one correction. Returns `Outcome::Ignored` without side effects
    /// when a correction is already running.
    pub async fn trigger(&self, trigger: Trigger) -> Result<Outcome, FoundryError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("correction in flight, ignoring trigger");
            return Ok(Outcome::Ignored);
        }
        let mut guard = ActionGuard {
            coordinator: self,
            finished: false,
        };
        self.status.send_replace(Status::Busy);

        let token = CancellationToken::new();
        self.set_in_flight(Some(token.clone()));
        let result = self.run(trigger, &token).await;
        guard.finished = true;

        match result {
            Ok(item) => {
                self.status.send_replace(Status::Ready);
                self.feedback.success();
                Ok(Outcome::Completed(item))
            }
            Err(e) => {
                let message = e.user_message();
                tracing::warn!(error = %e, "correction failed");
                self.status.send_replace(Status::Error(message.clone()));
                self.feedback.failure(&message);
                Err(e)
            }
        }
    }

    fn set_in_flight(&self, token: Option<CancellationToken>) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    async fn run(&self, trigger: Trigger, cancel: &CancellationToken) -> Result<HistoryItem, FoundryError> {
        let input = match trigger.text {
            Some(text) => Some(text),
            None => self.source.capture().await,
        }
        .filter(|t| !t.trim().is_empty())
        .ok_or(FoundryError::EmptyInput)?;

        // One snapshot per action; later settings edits do not apply mid-flight.
        let settings = self.settings.snapshot();
        let provider = settings.provider()?;
        let model = settings.model_for(provider).to_string();
        let credential = settings.credential_for(provider).to_string();

        let (title, content) = self.resolve_prompt(trigger.prompt, settings.selected_prompt_id.as_deref()).await?;

        if credential.trim().is_empty() {
            return Err(FoundryError::CredentialMissing {
                provider: provider.to_string(),
            });
        }

        let params = RequestParams {
            provider,
            system_prompt: prompts::compose_system_prompt(&settings.master_prompt, &content),
            user_prompt: input.clone(),
            credential,
            model_name: model.clone(),
        };

        let start = Instant::now();
        let response = self
            .orchestrator
            .send_prompt_cancellable(params, settings.retry_count, cancel)
            .await?;
        let duration = start.elapsed();

        let delivered = self.sink.deliver(&response.text).await;

        let item = HistoryItem::from_response(
            input,
            &response,
            duration,
            provider.as_str(),
            &model,
            Some(title),
        );
        self.history.add(item.clone()).await;

        delivered?;
        Ok(item)
    }

    /// Resolve (title, content) for a prompt choice.
    async fn resolve_prompt(
        &self,
        choice: PromptChoice,
        selected_id: Option<&str>,
    ) -> Result<(String, String), FoundryError> {
        let id = match choice {
            PromptChoice::Custom(text) => {
                if text.trim().is_empty() {
                    return Err(FoundryError::NoPromptSelected);
                }
                let recorded = self.custom_prompts.record(&text).await;
                return Ok((recorded.title(), recorded.content));
            }
            PromptChoice::Saved(id) => id,
            PromptChoice::Selected => selected_id
                .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
                .ok_or(FoundryError::NoPromptSelected)?,
        };

        if let Some(saved) = self.prompts.get(id).await {
            return Ok((saved.name, saved.content));
        }

        self.custom_prompts
            .get(id)
            .await
            .map(|p| (p.title(), p.content))
            .ok_or_else(|| FoundryError::PromptNotFound(id.to_string()))
    }
}
