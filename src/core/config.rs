//! Configuration management for the recording proxy.
//!
//! Configuration comes from three layers, later layers winning:
//! built-in defaults, an optional JSON config file (with `${VAR}` expansion),
//! and `MIRRA_*` environment variables.

use crate::core::recorder::DEFAULT_QUEUE_SIZE;
use crate::core::recording::Provider;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Upstream request timeout in seconds (covers long-lived streams)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upstream per provider name (`claude`, `openai`, `gemini`)
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Where and whether recordings are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Directory holding the day files
    #[serde(default = "default_recording_path")]
    pub path: PathBuf,

    /// Capacity of the pending-recordings queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: default_recording_path(),
            queue_size: default_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// `debug`, `info`, `warn` or `error`
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

/// Log line rendering. Unrecognized names fall back to `pretty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Plain,
}

impl From<String> for LogFormat {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "plain" | "text" => LogFormat::Plain,
            _ => LogFormat::Pretty,
        }
    }
}

impl From<LogFormat> for String {
    fn from(value: LogFormat) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Plain => "plain",
        })
    }
}

/// Upstream endpoint for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL the original path and query are appended to
    pub upstream_url: String,
}

impl ProviderConfig {
    pub fn new(upstream_url: impl Into<String>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
        }
    }
}

fn default_port() -> u16 {
    4567
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_enabled() -> bool {
    true
}

fn default_recording_path() -> PathBuf {
    PathBuf::from("./recordings")
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Built-in upstreams for every routable provider.
pub fn default_providers() -> HashMap<String, ProviderConfig> {
    HashMap::from([
        (
            Provider::Claude.to_string(),
            ProviderConfig::new("https://api.anthropic.com"),
        ),
        (
            Provider::OpenAI.to_string(),
            ProviderConfig::new("https://api.openai.com"),
        ),
        (
            Provider::Gemini.to_string(),
            ProviderConfig::new("https://generativelanguage.googleapis.com"),
        ),
    ])
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            request_timeout_secs: default_request_timeout(),
            recording: RecordingConfig::default(),
            logging: LoggingConfig::default(),
            providers: default_providers(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional JSON file and the environment.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use llm_mirror::core::config::AppConfig;
    ///
    /// let config = AppConfig::load(Some("config.json".as_ref())).expect("Failed to load config");
    /// ```
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env file if it exists (skip in tests to avoid interference)
        #[cfg(not(test))]
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a JSON config file. Provider entries are merged over the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&content);

        let mut config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(&expanded, config::FileFormat::Json))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        for (name, provider) in default_providers() {
            config.providers.entry(name).or_insert(provider);
        }

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port_str) = std::env::var("MIRRA_PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                self.port = port;
            }
        }

        if let Ok(enabled) = std::env::var("MIRRA_RECORDING_ENABLED") {
            if !enabled.is_empty() {
                self.recording.enabled = str_to_bool(&enabled);
            }
        }

        if let Ok(path) = std::env::var("MIRRA_RECORDING_PATH") {
            if !path.is_empty() {
                self.recording.path = PathBuf::from(path);
            }
        }

        for provider in Provider::ROUTABLE {
            let var = format!("MIRRA_{}_UPSTREAM", provider.as_str().to_uppercase());
            if let Ok(url) = std::env::var(&var) {
                if !url.is_empty() {
                    self.providers
                        .insert(provider.to_string(), ProviderConfig::new(url));
                }
            }
        }

        if let Ok(format) = std::env::var("MIRRA_LOG_FORMAT") {
            self.logging.format = LogFormat::from(format);
        }

        if let Ok(level) = std::env::var("MIRRA_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Upstream configured for `provider`, if any.
    pub fn upstream_for(&self, provider: Provider) -> Option<&ProviderConfig> {
        self.providers.get(provider.as_str())
    }
}

static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\$\{([^}:]+)(?::-?([^}]*))?\}"#).expect("env var pattern is valid")
});

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .to_string()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
