use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dispatch::ProviderKind;
use crate::error::FoundryError;
use crate::prompts::PromptSpec;

/// Default base directory for config and persisted stores.
const DEFAULT_HOME_DIR: &str = ".textfoundry";

/// User preferences, read as one snapshot at the start of every action.
/// Field names match the persisted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "selectedAIProvider")]
    pub selected_provider: String,
    #[serde(rename = "selectedGeminiModel")]
    pub gemini_model: String,
    #[serde(rename = "selectedLMStudioModel")]
    pub lm_studio_model: String,
    #[serde(rename = "selectedOpenAIModel")]
    pub openai_model: String,
    #[serde(rename = "selectedGrokModel")]
    pub grok_model: String,
    #[serde(rename = "geminiAPIKey")]
    pub gemini_api_key: String,
    #[serde(rename = "openAIAPIKey")]
    pub openai_api_key: String,
    #[serde(rename = "grokAPIKey")]
    pub grok_api_key: String,
    #[serde(rename = "lmStudioAddress")]
    pub lm_studio_address: String,
    #[serde(rename = "masterPrompt")]
    pub master_prompt: String,
    #[serde(rename = "retryCount")]
    pub retry_count: u32,
    #[serde(rename = "selectedPromptID")]
    pub selected_prompt_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_provider: ProviderKind::Gemini.as_str().to_string(),
            gemini_model: "gemini-pro".to_string(),
            lm_studio_model: "local-model".to_string(),
            openai_model: "gpt-4o".to_string(),
            grok_model: "grok-beta".to_string(),
            gemini_api_key: String::new(),
            openai_api_key: String::new(),
            grok_api_key: String::new(),
            lm_studio_address: "http://localhost:1234".to_string(),
            master_prompt: String::new(),
            retry_count: 0,
            selected_prompt_id: None,
        }
    }
}

impl Settings {
    pub fn provider(&self) -> Result<ProviderKind, FoundryError> {
        self.selected_provider.parse()
    }

    /// API key, or server address for LM Studio.
    pub fn credential_for(&self, provider: ProviderKind) -> &str {
        match provider {
            ProviderKind::Gemini => &self.gemini_api_key,
            ProviderKind::LmStudio => &self.lm_studio_address,
            ProviderKind::OpenAI => &self.openai_api_key,
            ProviderKind::Grok => &self.grok_api_key,
        }
    }

    pub fn model_for(&self, provider: ProviderKind) -> &str {
        match provider {
            ProviderKind::Gemini => &self.gemini_model,
            ProviderKind::LmStudio => &self.lm_studio_model,
            ProviderKind::OpenAI => &self.openai_model,
            ProviderKind::Grok => &self.grok_model,
        }
    }

    /// Apply credential overrides from the environment (`.env` included).
    pub fn apply_env(&mut self) {
        self.apply_env_with(|var| env::var(var).ok());
    }

    /// Apply overrides from `lookup`. Unset or blank values leave the
    /// setting alone.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 4] = [
            ("GEMINI_API_KEY", &mut self.gemini_api_key),
            ("OPENAI_API_KEY", &mut self.openai_api_key),
            ("XAI_API_KEY", &mut self.grok_api_key),
            ("LMSTUDIO_ADDRESS", &mut self.lm_studio_address),
        ];
        for (var, slot) in overrides {
            if let Some(value) = lookup(var)
                && !value.trim().is_empty()
            {
                *slot = value;
            }
        }
    }
}

/// Source of settings snapshots. Implementations may re-read storage on
/// every call; callers take one snapshot per action and never re-read it
/// mid-flight.
pub trait SettingsProvider: Send + Sync {
    fn snapshot(&self) -> Settings;
}

/// Fixed settings, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub Settings);

impl SettingsProvider for StaticSettings {
    fn snapshot(&self) -> Settings {
        self.0.clone()
    }
}

/// On-disk layout of `config.toml`: flat settings keys plus saved prompts.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    settings: Settings,
    #[serde(default)]
    prompts: Vec<PromptSpec>,
}

pub struct Config {
    pub home: PathBuf,
    pub settings: Settings,
    /// Prompts listed in `config.toml`. They seed `prompts.json` the first
    /// time the library is opened; None means the built-in defaults do.
    pub prompts: Option<Vec<PromptSpec>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: PathBuf::from(DEFAULT_HOME_DIR),
            settings: Settings::default(),
            prompts: None,
        }
    }
}

impl Config {
    /// Load `$TEXTFOUNDRY_HOME/config.toml` (default `.textfoundry/`), then
    /// apply environment overrides. A missing file yields defaults.
    pub fn load() -> Result<Self, FoundryError> {
        let home = env::var("TEXTFOUNDRY_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_HOME_DIR));
        let mut config = Self::from_home(home)?;
        config.settings.apply_env();
        config.warn_missing_credentials();
        Ok(config)
    }

    /// Load from an explicit directory without touching the environment.
    pub fn from_home(home: PathBuf) -> Result<Self, FoundryError> {
        let path = home.join("config.toml");
        let file = match std::fs::read_to_string(&path) {
            Ok(raw) => parse_config(&raw, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                ConfigFile::default()
            }
            Err(e) => {
                return Err(FoundryError::Config(format!("{}: {e}", path.display())));
            }
        };

        Ok(Self {
            home,
            settings: file.settings,
            prompts: (!file.prompts.is_empty()).then_some(file.prompts),
        })
    }

    pub fn history_path(&self) -> PathBuf {
        self.home.join("history.json")
    }

    pub fn prompts_path(&self) -> PathBuf {
        self.home.join("prompts.json")
    }

    pub fn custom_prompts_path(&self) -> PathBuf {
        self.home.join("custom_prompts.json")
    }

    fn warn_missing_credentials(&self) {
        for provider in ProviderKind::ALL {
            if self.settings.credential_for(provider).trim().is_empty() {
                tracing::warn!("{provider} credential not set, {provider} unavailable");
            }
        }
    }
}

impl SettingsProvider for Config {
    fn snapshot(&self) -> Settings {
        self.settings.clone()
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<ConfigFile, FoundryError> {
    toml::from_str(raw).map_err(|e| FoundryError::Config(format!("{}: {e}", path.display())))
}
