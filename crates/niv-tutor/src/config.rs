//! Configuration for NIV Lab.
//!
//! Settings come from an optional `niv.json` file (camelCase keys, every
//! field defaulted). The API key is never stored in the file: it is looked up
//! in the environment variables listed in `apiKeyEnv`.

use std::path::Path;
use std::time::Duration;

use niv_llm::{GeminiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "niv.json";

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Default timeout in seconds for a single LLM request.
const fn default_request_timeout() -> u64 {
    60
}

/// Default quiet period before expert advice is requested.
const fn default_advice_debounce() -> u64 {
    800
}

fn default_api_key_env() -> Vec<String> {
    vec!["GEMINI_API_KEY".to_string(), "API_KEY".to_string()]
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

/// Main configuration for NIV Lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gemini model used by every LLM feature.
    #[serde(default = "default_model")]
    pub model: String,

    /// Root URL of the Gemini REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Timeout for a single LLM request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Quiet period after a settings change before advice is fetched.
    #[serde(default = "default_advice_debounce")]
    pub advice_debounce_ms: u64,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Environment variables searched for the API key, in order.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout(),
            advice_debounce_ms: default_advice_debounce(),
            server: ServerConfig::default(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `niv.json` in the current directory; falls back to defaults
    /// when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `niv.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file cannot be read or
    /// is not valid JSON, and `TutorError::ConfigValidationError` if a value
    /// is unusable.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` on the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 second in your niv.json",
            ));
        }

        if self.model.trim().is_empty() {
            return Err(TutorError::config_validation(
                "model must not be empty",
                "Set model to a Gemini model name (e.g. \"gemini-2.5-flash\") in your niv.json",
            ));
        }

        if self.api_base_url.trim().is_empty() {
            return Err(TutorError::config_validation(
                "apiBaseUrl must not be empty",
                "Remove apiBaseUrl from your niv.json to use the public Gemini endpoint",
            ));
        }

        if self.api_key_env.iter().all(|name| name.trim().is_empty()) {
            return Err(TutorError::config_validation(
                "apiKeyEnv must list at least one variable name",
                "Set apiKeyEnv to [\"GEMINI_API_KEY\"] in your niv.json",
            ));
        }

        Ok(())
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Advice debounce delay as a [`Duration`].
    #[must_use]
    pub const fn advice_debounce(&self) -> Duration {
        Duration::from_millis(self.advice_debounce_ms)
    }

    /// First non-empty API key found in the configured environment variables.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(|name| std::env::var(name).ok())
    }

    /// Client settings, or `None` when no key is set (degraded mode).
    #[must_use]
    pub fn gemini_config(&self) -> Option<GeminiConfig> {
        self.gemini_config_with(|name| std::env::var(name).ok())
    }

    fn api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key_env
            .iter()
            .filter_map(|name| lookup(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    }

    fn gemini_config_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<GeminiConfig> {
        self.api_key_with(lookup).map(|key| {
            GeminiConfig::new(key)
                .with_model(&self.model)
                .with_base_url(&self.api_base_url)
                .with_timeout(self.request_timeout())
        })
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
