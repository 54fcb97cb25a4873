//! AI provider configuration document
//!
//! The document is re-read at every orchestration trigger so an operator can
//! switch provider, model or key without restarting the process.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

/// Settings for one AI provider
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AiProviderConfig {
    /// `openai`, `localai` or `anthropic`
    pub provider: String,

    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the key, used when `api_key` is unset
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Language the backend should answer in; part of the cache key
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_language() -> String {
    "english".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_timeout_secs() -> u64 {
    120
}

impl AiProviderConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            api_key_env: None,
            temperature: default_temperature(),
            base_url: None,
            language: default_language(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Explicit key first, then the named environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.is_empty())
            })
    }
}

/// Where the provider configuration comes from
#[async_trait]
pub trait ProviderConfigSource: Send + Sync {
    async fn load(&self) -> Result<AiProviderConfig, config::ConfigError>;
}

/// Reads the provider document through the `config` crate, with `REMEDY_AI__*` overrides
#[derive(Debug, Clone)]
pub struct FileProviderSource {
    path: Option<PathBuf>,
    env_prefix: String,
}

impl FileProviderSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            env_prefix: "REMEDY_AI".to_string(),
        }
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }
}

#[async_trait]
impl ProviderConfigSource for FileProviderSource {
    async fn load(&self) -> Result<AiProviderConfig, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = &self.path {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }
        builder
            .add_source(config::Environment::with_prefix(&self.env_prefix).separator("__"))
            .build()?
            .try_deserialize()
    }
}

/// Fixed configuration, for tests and one-shot runs
#[derive(Debug, Clone)]
pub struct StaticProviderSource(pub AiProviderConfig);

#[async_trait]
impl ProviderConfigSource for StaticProviderSource {
    async fn load(&self) -> Result<AiProviderConfig, config::ConfigError> {
        Ok(self.0.clone())
    }
}
