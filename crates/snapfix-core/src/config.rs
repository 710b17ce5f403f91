//! Configuration management for snapfix.
//!
//! Loads configuration from ${SNAPFIX_HOME}/config.toml with sensible
//! defaults. API credentials resolve config-first with environment-variable
//! fallbacks.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod paths {
    //! Path resolution for snapfix configuration.
    //!
    //! SNAPFIX_HOME resolution order:
    //! 1. SNAPFIX_HOME environment variable (if set)
    //! 2. ~/.config/snapfix (default)

    use std::path::PathBuf;

    /// Returns the snapfix home directory.
    pub fn snapfix_home() -> PathBuf {
        if let Ok(home) = std::env::var("SNAPFIX_HOME") {
            return PathBuf::from(home);
        }

        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".config").join("snapfix"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        snapfix_home().join("config.toml")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generative model to use for all task prompts.
    pub model: String,

    /// Override for the Generative Language API base URL.
    pub base_url: Option<String>,

    /// API key; falls back to the GEMINI_API_KEY environment variable.
    pub api_key: Option<String>,

    /// Address the HTTP surface binds to.
    pub bind_addr: String,

    /// Number of recent turns rendered into each prompt's context prefix.
    pub context_window: usize,

    /// Timeout for web search calls, in seconds.
    pub search_timeout_secs: u64,

    /// Timeout for image upload calls, in seconds.
    pub upload_timeout_secs: u64,
}

impl Config {
    const DEFAULT_MODEL: &str = "gemini-2.0-flash";
    const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
    const DEFAULT_CONTEXT_WINDOW: usize = 10;
    const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 10;
    const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 15;

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: Self::DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
            bind_addr: Self::DEFAULT_BIND_ADDR.to_string(),
            context_window: Self::DEFAULT_CONTEXT_WINDOW,
            search_timeout_secs: Self::DEFAULT_SEARCH_TIMEOUT_SECS,
            upload_timeout_secs: Self::DEFAULT_UPLOAD_TIMEOUT_SECS,
        }
    }
}

/// Resolves the API key with precedence: config > environment.
pub fn resolve_api_key(config_api_key: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = config_api_key {
        let trimmed = key.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    std::env::var(env_var)
        .context(format!("No API key available. Set {env_var} or api_key in config.toml."))
}

/// Resolves a base URL with precedence: env > config > default.
pub fn resolve_base_url(config_base_url: Option<&str>, env_var: &str, default_url: &str) -> String {
    if let Ok(env_url) = std::env::var(env_var) {
        let trimmed = env_url.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    if let Some(config_url) = config_base_url {
        let trimmed = config_url.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    default_url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/snapfix/config.toml")).unwrap();
        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.context_window, 10);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str("model = \"gemini-2.5-pro\"").unwrap();
        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.bind_addr, "127.0.0.1:5000");
        assert_eq!(config.search_timeout_secs, 10);
    }

    #[test]
    fn config_key_wins_over_env() {
        let key = resolve_api_key(Some("from-config"), "SNAPFIX_TEST_UNSET_VAR").unwrap();
        assert_eq!(key, "from-config");
    }

    #[test]
    fn blank_config_key_is_ignored() {
        let result = resolve_api_key(Some("   "), "SNAPFIX_TEST_UNSET_VAR_2");
        assert!(result.is_err());
    }

    #[test]
    fn base_url_defaults_when_unset() {
        let url = resolve_base_url(None, "SNAPFIX_TEST_UNSET_VAR_3", "https://example.com/v1");
        assert_eq!(url, "https://example.com/v1");
    }
}
