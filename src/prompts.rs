use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{history, store};

/// Max custom prompts remembered by the quick action.
pub const CUSTOM_HISTORY_LIMIT: usize = 20;

/// Chars of a custom prompt shown in its title.
const CUSTOM_TITLE_CHARS: usize = 15;

/// A saved, named prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub id: Uuid,
    pub name: String,
    pub content: String,
}

impl PromptSpec {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Join the master prompt and a prompt's content into the system prompt.
///
/// The separator is always present, so an empty master prompt yields a
/// system prompt starting with a blank line. Kept as-is so results match
/// what users already have in their history.
pub fn compose_system_prompt(master_prompt: &str, prompt_content: &str) -> String {
    format!("{master_prompt}\n\n{prompt_content}")
}

/// Prompts a fresh install starts with.
pub fn default_prompts() -> Vec<PromptSpec> {
    vec![
        PromptSpec::new(
            "Grammar Correction",
            "Correct the grammar and spelling of the following text:",
        ),
        PromptSpec::new("Summarize", "Summarize the following text in one paragraph:"),
        PromptSpec::new(
            "Translate (English to French)",
            "Translate the following English text to French:",
        ),
    ]
}

/// The user's saved prompts, in display order. Every change is written
/// back to disk when the library was opened from a path.
pub struct PromptLibrary {
    path: Option<PathBuf>,
    prompts: Mutex<Vec<PromptSpec>>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::in_memory(default_prompts())
    }
}

impl PromptLibrary {
    /// Unpersisted library.
    pub fn in_memory(prompts: Vec<PromptSpec>) -> Self {
        Self {
            path: None,
            prompts: Mutex::new(prompts),
        }
    }

    /// Load from `path`. With no usable file, the library starts from `seed`
    /// (or the built-in defaults) and saves it at once so prompt ids stay
    /// stable from then on. A saved empty list stays empty.
    pub async fn open(path: PathBuf, seed: Option<Vec<PromptSpec>>) -> Self {
        let prompts = match store::try_load_list(&path).await {
            Some(saved) => saved,
            None => {
                let seeded = seed.unwrap_or_else(default_prompts);
                tracing::info!(path = %path.display(), count = seeded.len(), "seeding prompt library");
                if let Err(e) = store::save_list(&path, &seeded).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to save prompts");
                }
                seeded
            }
        };
        Self {
            path: Some(path),
            prompts: Mutex::new(prompts),
        }
    }

    pub async fn prompts(&self) -> Vec<PromptSpec> {
        self.prompts.lock().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<PromptSpec> {
        self.prompts.lock().await.iter().find(|p| p.id == id).cloned()
    }

    /// Case-insensitive name lookup.
    pub async fn find_by_name(&self, name: &str) -> Option<PromptSpec> {
        let name = name.trim();
        self.prompts
            .lock()
            .await
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub async fn add(&self, prompt: PromptSpec) {
        let mut prompts = self.prompts.lock().await;
        prompts.push(prompt);
        self.persist(&prompts).await;
    }

    /// Returns false if no prompt has this id.
    pub async fn update(&self, id: Uuid, name: &str, content: &str) -> bool {
        let mut prompts = self.prompts.lock().await;
        let Some(p) = prompts.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        p.name = name.to_string();
        p.content = content.to_string();
        self.persist(&prompts).await;
        true
    }

    pub async fn delete(&self, id: Uuid) -> bool {
        let mut prompts = self.prompts.lock().await;
        let before = prompts.len();
        prompts.retain(|p| p.id != id);
        let removed = prompts.len() != before;
        if removed {
            self.persist(&prompts).await;
        }
        removed
    }

    async fn persist(&self, prompts: &[PromptSpec]) {
        if let Some(ref path) = self.path
            && let Err(e) = store::save_list(path, prompts).await
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to save prompts");
        }
    }
}

/// An ad-hoc prompt typed into the quick action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPrompt {
    pub id: Uuid,
    pub content: String,
    pub created_ms: u64,
}

impl CustomPrompt {
    /// `"Custom: <first 15 chars>..."`
    pub fn title(&self) -> String {
        custom_title(&self.content)
    }
}

pub fn custom_title(content: &str) -> String {
    let head: String = content.chars().take(CUSTOM_TITLE_CHARS).collect();
    format!("Custom: {head}...")
}

/// Recently used custom prompts, newest first, unique by content.
pub struct CustomPromptHistory {
    path: Option<PathBuf>,
    items: Mutex<Vec<CustomPrompt>>,
}

impl CustomPromptHistory {
    /// Unpersisted history.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            items: Mutex::new(Vec::new()),
        }
    }

    /// Load from (and later save to) `path`.
    pub async fn open(path: PathBuf) -> Self {
        let items = store::load_list(&path).await;
        Self {
            path: Some(path),
            items: Mutex::new(items),
        }
    }

    /// Record a prompt at the head, dropping any older entry with the same
    /// content and anything beyond `CUSTOM_HISTORY_LIMIT`.
    pub async fn record(&self, content: &str) -> CustomPrompt {
        let item = CustomPrompt {
            id: Uuid::new_v4(),
            content: content.to_string(),
            created_ms: history::now_ms(),
        };

        let mut items = self.items.lock().await;
        items.retain(|p| p.content != content);
        items.insert(0, item.clone());
        items.truncate(CUSTOM_HISTORY_LIMIT);
        self.persist(&items).await;
        item
    }

    pub async fn delete(&self, id: Uuid) -> bool {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|p| p.id != id);
        let removed = items.len() != before;
        if removed {
            self.persist(&items).await;
        }
        removed
    }

    pub async fn get(&self, id: Uuid) -> Option<CustomPrompt> {
        self.items.lock().await.iter().find(|p| p.id == id).cloned()
    }

    pub async fn items(&self) -> Vec<CustomPrompt> {
        self.items.lock().await.clone()
    }

    async fn persist(&self, items: &[CustomPrompt]) {
        if let Some(ref path) = self.path
            && let Err(e) = store::save_list(path, items).await
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to save custom prompts");
        }
    }
}
