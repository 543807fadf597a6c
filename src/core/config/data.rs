use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::autosave::DEFAULT_AUTOSAVE_DELAY;
use crate::core::chat_stream::{DEFAULT_APP_TITLE, DEFAULT_BASE_URL};
use crate::core::config::io::ConfigError;
use crate::core::models::DEFAULT_MODEL;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// OpenAI-compatible API root, e.g. `https://openrouter.ai/api/v1`
    pub base_url: Option<String>,
    /// Sent as `HTTP-Referer` for OpenRouter app attribution
    pub referer: Option<String>,
    /// Sent as `X-Title`
    pub app_title: Option<String>,
    /// Where the key-value store keeps its files
    pub data_dir: Option<PathBuf>,
    pub autosave_delay_ms: Option<u64>,
    pub use_keyring: Option<bool>,
    /// Model used to draft coach prompts
    pub prompt_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    BaseUrl,
    Referer,
    AppTitle,
    DataDir,
    AutosaveDelayMs,
    UseKeyring,
    PromptModel,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::BaseUrl,
        ConfigKey::Referer,
        ConfigKey::AppTitle,
        ConfigKey::DataDir,
        ConfigKey::AutosaveDelayMs,
        ConfigKey::UseKeyring,
        ConfigKey::PromptModel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::BaseUrl => "base-url",
            ConfigKey::Referer => "referer",
            ConfigKey::AppTitle => "app-title",
            ConfigKey::DataDir => "data-dir",
            ConfigKey::AutosaveDelayMs => "autosave-delay-ms",
            ConfigKey::UseKeyring => "use-keyring",
            ConfigKey::PromptModel => "prompt-model",
        }
    }

    /// Accepts both `base-url` and `base_url` spellings.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|key| key.name() == normalized)
    }

    pub fn default_display(self) -> String {
        match self {
            ConfigKey::BaseUrl => DEFAULT_BASE_URL.to_string(),
            ConfigKey::Referer => "(none)".to_string(),
            ConfigKey::AppTitle => DEFAULT_APP_TITLE.to_string(),
            ConfigKey::DataDir => "platform data directory".to_string(),
            ConfigKey::AutosaveDelayMs => DEFAULT_AUTOSAVE_DELAY.as_millis().to_string(),
            ConfigKey::UseKeyring => "on".to_string(),
            ConfigKey::PromptModel => DEFAULT_MODEL.to_string(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

fn parse_toggle(key: ConfigKey, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            expected: "on or off",
        }),
    }
}

impl Config {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn app_title(&self) -> &str {
        self.app_title.as_deref().unwrap_or(DEFAULT_APP_TITLE)
    }

    pub fn autosave_delay(&self) -> Duration {
        self.autosave_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_AUTOSAVE_DELAY)
    }

    pub fn use_keyring(&self) -> bool {
        self.use_keyring.unwrap_or(true)
    }

    pub fn prompt_model(&self) -> &str {
        self.prompt_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// The explicitly configured value, if any.
    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::BaseUrl => self.base_url.clone(),
            ConfigKey::Referer => self.referer.clone(),
            ConfigKey::AppTitle => self.app_title.clone(),
            ConfigKey::DataDir => self.data_dir.as_ref().map(|p| p.display().to_string()),
            ConfigKey::AutosaveDelayMs => self.autosave_delay_ms.map(|ms| ms.to_string()),
            ConfigKey::UseKeyring => self
                .use_keyring
                .map(|on| if on { "on" } else { "off" }.to_string()),
            ConfigKey::PromptModel => self.prompt_model.clone(),
        }
    }

    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<(), ConfigError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidValue {
                key,
                value: value.to_string(),
                expected: "a non-empty value",
            });
        }
        match key {
            ConfigKey::BaseUrl => {
                if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
                    return Err(ConfigError::InvalidValue {
                        key,
                        value: value.to_string(),
                        expected: "an http:// or https:// URL",
                    });
                }
                self.base_url = Some(trimmed.trim_end_matches('/').to_string());
            }
            ConfigKey::Referer => self.referer = Some(trimmed.to_string()),
            ConfigKey::AppTitle => self.app_title = Some(trimmed.to_string()),
            ConfigKey::DataDir => self.data_dir = Some(PathBuf::from(trimmed)),
            ConfigKey::AutosaveDelayMs => {
                let ms = trimmed
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key,
                        value: value.to_string(),
                        expected: "a number of milliseconds",
                    })?;
                self.autosave_delay_ms = Some(ms);
            }
            ConfigKey::UseKeyring => self.use_keyring = Some(parse_toggle(key, trimmed)?),
            ConfigKey::PromptModel => self.prompt_model = Some(trimmed.to_string()),
        }
        Ok(())
    }

    pub fn unset(&mut self, key: ConfigKey) {
        match key {
            ConfigKey::BaseUrl => self.base_url = None,
            ConfigKey::Referer => self.referer = None,
            ConfigKey::AppTitle => self.app_title = None,
            ConfigKey::DataDir => self.data_dir = None,
            ConfigKey::AutosaveDelayMs => self.autosave_delay_ms = None,
            ConfigKey::UseKeyring => self.use_keyring = None,
            ConfigKey::PromptModel => self.prompt_model = None,
        }
    }
}
