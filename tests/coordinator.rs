//! Coordinator flow: busy guard, resolution failures, history and paste-back.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use common::{Call, FakeTransport, transport_failure, wait_until};
use textfoundry::config::{Settings, StaticSettings};
use textfoundry::coordinator::{
    Coordinator, Feedback, Outcome, PasteSink, PromptChoice, Status, TextSource, Trigger,
};
use textfoundry::dispatch::ProviderKind;
use textfoundry::error::FoundryError;
use textfoundry::history::HistoryStore;
use textfoundry::orchestrator::Orchestrator;
use textfoundry::prompts::{CustomPromptHistory, PromptLibrary, PromptSpec};

struct FixedSource(Option<String>);

#[async_trait]
impl TextSource for FixedSource {
    async fn capture(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<String>>);

#[async_trait]
impl PasteSink for RecordingSink {
    async fn deliver(&self, text: &str) -> Result<(), FoundryError> {
        self.0.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct CountingFeedback {
    successes: AtomicU32,
    failures: AtomicU32,
}

impl Feedback for CountingFeedback {
    fn success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn failure(&self, _message: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    coordinator: Arc<Coordinator>,
    transport: Arc<FakeTransport>,
    sink: Arc<RecordingSink>,
    history: Arc<HistoryStore>,
    custom: Arc<CustomPromptHistory>,
    feedback: Arc<CountingFeedback>,
    prompt: PromptSpec,
}

fn settings(prompt: &PromptSpec) -> Settings {
    Settings {
        selected_provider: ProviderKind::Grok.as_str().to_string(),
        grok_api_key: "xai-123".to_string(),
        master_prompt: "Be terse.".to_string(),
        selected_prompt_id: Some(prompt.id.to_string()),
        ..Settings::default()
    }
}

fn harness(
    transport: FakeTransport,
    selection: Option<&str>,
    tweak: impl FnOnce(&mut Settings),
) -> Harness {
    let prompt = PromptSpec::new("Fix", "Fix grammar.");
    let mut s = settings(&prompt);
    tweak(&mut s);

    let transport = Arc::new(transport);
    let sink = Arc::new(RecordingSink::default());
    let history = Arc::new(HistoryStore::in_memory());
    let custom = Arc::new(CustomPromptHistory::in_memory());
    let feedback = Arc::new(CountingFeedback::default());
    let orchestrator = Orchestrator::new(transport.clone()).with_retry_delay(Duration::ZERO);

    let coordinator = Coordinator::new(
        Arc::new(orchestrator),
        Arc::new(StaticSettings(s)),
        Arc::new(FixedSource(selection.map(str::to_string))),
        sink.clone(),
    )
    .with_prompts(Arc::new(PromptLibrary::in_memory(vec![prompt.clone()])))
    .with_custom_prompts(custom.clone())
    .with_history(history.clone())
    .with_feedback(feedback.clone());

    Harness {
        coordinator: Arc::new(coordinator),
        transport,
        sink,
        history,
        custom,
        feedback,
        prompt,
    }
}

fn selected() -> Trigger {
    Trigger::hotkey(PromptChoice::Selected)
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn success_pastes_records_history_and_goes_ready() {
    let h = harness(FakeTransport::new(), Some("i has a cat"), |_| {});
    let mut status = h.coordinator.subscribe();
    assert_eq!(*status.borrow_and_update(), Status::Idle);

    let outcome = h.coordinator.trigger(selected()).await.unwrap();
    let Outcome::Completed(item) = outcome else {
        panic!("expected Completed, got {outcome:?}");
    };

    assert_eq!(item.original_text, "i has a cat");
    assert_eq!(item.corrected_text, "corrected text");
    assert_eq!(item.provider, "Grok");
    assert_eq!(item.model, "grok-beta");
    assert_eq!(item.token_count, Some(3));
    assert_eq!(item.retry_count, Some(0));
    assert_eq!(item.prompt_title.as_deref(), Some("Fix"));

    assert_eq!(*h.sink.0.lock().unwrap(), vec!["corrected text".to_string()]);
    assert_eq!(h.history.items().await, vec![item]);
    assert_eq!(h.coordinator.status(), Status::Ready);
    assert!(status.has_changed().unwrap());
    assert_eq!(h.feedback.successes.load(Ordering::SeqCst), 1);
    assert!(!h.coordinator.is_busy());
}

#[tokio::test]
async fn system_prompt_is_master_then_prompt_content() {
    let h = harness(FakeTransport::new(), Some("i has a cat"), |_| {});
    h.coordinator.trigger(selected()).await.unwrap();

    match &h.transport.calls()[..] {
        [Call::Chat { system_prompt, user_prompt, bearer, .. }] => {
            assert_eq!(system_prompt, "Be terse.\n\nFix grammar.");
            assert_eq!(user_prompt, "i has a cat");
            assert_eq!(bearer, "xai-123");
        }
        other => panic!("unexpected calls: {other:?}"),
    }
}

#[tokio::test]
async fn saved_prompt_by_id_and_text_override() {
    let h = harness(FakeTransport::new(), None, |s| s.selected_prompt_id = None);
    let trigger = Trigger::hotkey(PromptChoice::Saved(h.prompt.id)).with_text("their going");

    let outcome = h.coordinator.trigger(trigger).await.unwrap();
    assert!(matches!(outcome, Outcome::Completed(ref item) if item.original_text == "their going"));
}

#[tokio::test]
async fn custom_prompt_is_recorded_and_titled() {
    let h = harness(FakeTransport::new(), Some("hello"), |_| {});
    let trigger = Trigger::hotkey(PromptChoice::Custom("Rewrite as a pirate would".to_string()));

    let Outcome::Completed(item) = h.coordinator.trigger(trigger).await.unwrap() else {
        panic!("expected Completed");
    };
    assert_eq!(item.prompt_title.as_deref(), Some("Custom: Rewrite as a pi..."));

    let recorded = h.custom.items().await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].content, "Rewrite as a pirate would");

    // Re-running a custom entry by id resolves through the custom history.
    let again = Trigger::hotkey(PromptChoice::Saved(recorded[0].id));
    assert!(matches!(h.coordinator.trigger(again).await.unwrap(), Outcome::Completed(_)));
    match h.transport.calls().last() {
        Some(Call::Chat { system_prompt, .. }) => {
            assert_eq!(system_prompt, "Be terse.\n\nRewrite as a pirate would");
        }
        other => panic!("unexpected call: {other:?}"),
    }
}

#[tokio::test]
async fn retries_come_from_settings() {
    let transport = FakeTransport::scripted(vec![Err(transport_failure("reset"))]);
    let h = harness(transport, Some("text"), |s| s.retry_count = 2);

    let Outcome::Completed(item) = h.coordinator.trigger(selected()).await.unwrap() else {
        panic!("expected Completed");
    };
    assert_eq!(item.retry_count, Some(1));
    assert_eq!(h.transport.call_count(), 2);
}

// ---------------------------------------------------------------------------
// Busy guard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trigger_while_busy_is_ignored() {
    let gate = Arc::new(Notify::new());
    let h = harness(FakeTransport::gated(gate.clone()), Some("text"), |_| {});

    let first = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.trigger(selected()).await })
    };
    let transport = h.transport.clone();
    wait_until(|| transport.call_count() == 1).await;
    assert_eq!(h.coordinator.status(), Status::Busy);

    let second = h.coordinator.trigger(selected()).await.unwrap();
    assert_eq!(second, Outcome::Ignored);
    assert_eq!(h.transport.call_count(), 1);

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, Outcome::Completed(_)));
    assert_eq!(h.history.len().await, 1);

    // Guard released: the next trigger runs.
    gate.notify_one();
    assert!(matches!(h.coordinator.trigger(selected()).await.unwrap(), Outcome::Completed(_)));
    assert_eq!(h.transport.call_count(), 2);
}

#[tokio::test]
async fn cancel_ends_in_flight_action() {
    let gate = Arc::new(Notify::new());
    let h = harness(FakeTransport::gated(gate), Some("text"), |_| {});

    let running = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.trigger(selected()).await })
    };
    let transport = h.transport.clone();
    wait_until(|| transport.call_count() == 1).await;

    h.coordinator.cancel();
    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, FoundryError::Cancelled));
    assert_eq!(h.coordinator.status(), Status::Error("request cancelled".to_string()));
    assert!(h.history.is_empty().await);
    assert!(!h.coordinator.is_busy());
}

#[tokio::test]
async fn dropped_trigger_releases_busy_and_goes_idle() {
    let gate = Arc::new(Notify::new());
    let h = harness(FakeTransport::gated(gate.clone()), Some("text"), |_| {});

    let timed_out =
        tokio::time::timeout(Duration::from_millis(50), h.coordinator.trigger(selected())).await;
    assert!(timed_out.is_err());
    assert_eq!(h.transport.call_count(), 1);

    assert_eq!(h.coordinator.status(), Status::Idle);
    assert!(!h.coordinator.is_busy());
    assert!(h.history.is_empty().await);
    assert_eq!(h.feedback.failures.load(Ordering::SeqCst), 0);

    // No token left behind for cancel() to hit.
    h.coordinator.cancel();

    gate.notify_one();
    let next = h.coordinator.trigger(selected()).await.unwrap();
    assert!(matches!(next, Outcome::Completed(_)));
    assert_eq!(h.coordinator.status(), Status::Ready);
    assert_eq!(h.transport.call_count(), 2);
}

// ---------------------------------------------------------------------------
// Resolution failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_selection_fails_without_network() {
    for selection in [None, Some(""), Some("   \n")] {
        let h = harness(FakeTransport::new(), selection, |_| {});
        let err = h.coordinator.trigger(selected()).await.unwrap_err();

        assert!(matches!(err, FoundryError::EmptyInput));
        assert_eq!(h.coordinator.status(), Status::Error("no text selected".to_string()));
        assert_eq!(h.transport.call_count(), 0);
        assert_eq!(h.feedback.failures.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn missing_credential_names_provider() {
    let h = harness(FakeTransport::new(), Some("text"), |s| s.grok_api_key.clear());
    let err = h.coordinator.trigger(selected()).await.unwrap_err();

    assert_eq!(err.user_message(), "Grok API Key or Address is missing.");
    assert_eq!(
        h.coordinator.status(),
        Status::Error("Grok API Key or Address is missing.".to_string())
    );
    assert_eq!(h.transport.call_count(), 0);
    assert!(h.sink.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn no_selected_prompt() {
    let h = harness(FakeTransport::new(), Some("text"), |s| s.selected_prompt_id = None);
    let err = h.coordinator.trigger(selected()).await.unwrap_err();
    assert!(matches!(err, FoundryError::NoPromptSelected));
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn unknown_prompt_id() {
    let h = harness(FakeTransport::new(), Some("text"), |s| {
        s.selected_prompt_id = Some(uuid::Uuid::new_v4().to_string());
    });
    let err = h.coordinator.trigger(selected()).await.unwrap_err();
    assert!(matches!(err, FoundryError::PromptNotFound(_)));
    assert_eq!(h.coordinator.status(), Status::Error("Prompt not found.".to_string()));
}

#[tokio::test]
async fn transport_failure_sets_error_status() {
    let transport = FakeTransport::scripted(vec![Err(transport_failure("down"))]);
    let h = harness(transport, Some("text"), |_| {});
    let err = h.coordinator.trigger(selected()).await.unwrap_err();

    assert!(matches!(err, FoundryError::Transport { .. }));
    assert!(matches!(h.coordinator.status(), Status::Error(_)));
    assert!(h.history.is_empty().await);
    assert_eq!(h.feedback.failures.load(Ordering::SeqCst), 1);
}
