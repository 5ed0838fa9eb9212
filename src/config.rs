//! Runtime settings
//!
//! Loaded from an optional YAML file, then overridden by environment
//! variables. The binary applies its own flags last.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "claude-opus-4-20250514";
pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
pub const DEFAULT_SOURCE_URL: &str = "https://www.gutenberg.org/ebooks/64317.txt.utf-8";

const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";
const ENV_MODEL: &str = "METAPHORIZER_MODEL";
const ENV_API_BASE: &str = "METAPHORIZER_API_BASE";
const ENV_DATABASE: &str = "METAPHORIZER_DB";
const ENV_SOURCE_URL: &str = "METAPHORIZER_SOURCE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Everything the pipeline needs from its environment.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub database: PathBuf,
    pub source_url: String,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            database: data_dir().join("metaphorizer.db"),
            source_url: DEFAULT_SOURCE_URL.to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("database", &self.database)
            .field("source_url", &self.source_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// `<data_dir>/metaphorizer`, e.g. `~/.local/share/metaphorizer`
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"))
        .join("metaphorizer")
}

/// Default location of the settings file.
pub fn default_config_path() -> PathBuf {
    data_dir().join("config.yaml")
}

impl Settings {
    /// Load settings from `path` (or the default location) and the process
    /// environment. A missing default file is not an error; a missing
    /// explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = default_config_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(settings.apply_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse YAML; absent keys keep their defaults. An empty document is
    /// the default settings.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply environment overrides read through `lookup`. Empty values are
    /// ignored.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = get(ENV_API_KEY) {
            self.api_key = key;
        }
        if let Some(model) = get(ENV_MODEL) {
            self.model = model;
        }
        if let Some(base) = get(ENV_API_BASE) {
            self.api_base = base;
        }
        if let Some(db) = get(ENV_DATABASE) {
            self.database = PathBuf::from(db);
        }
        if let Some(url) = get(ENV_SOURCE_URL) {
            self.source_url = url;
        }
        self
    }
}
