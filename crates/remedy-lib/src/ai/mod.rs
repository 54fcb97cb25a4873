//! AI backends that turn a prompt into text
//!
//! Provides:
//! - The [`AiBackend`] capability used by the remediation generator and explainer
//! - OpenAI-compatible and Anthropic implementations over `reqwest`
//! - The reloadable provider configuration document

mod anthropic;
mod config;
mod openai;

#[cfg(test)]
pub(crate) mod testing;

pub use self::anthropic::AnthropicBackend;
pub use self::config::{
    AiProviderConfig, FileProviderSource, ProviderConfigSource, StaticProviderSource,
};
pub use self::openai::OpenAiBackend;

use crate::error::AiError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// A text completion service
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Provider name, part of the cache key
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, AiError>;
}

/// Builds a backend from the configuration loaded for a cycle
pub trait BackendFactory: Send + Sync {
    fn build(&self, config: &AiProviderConfig) -> Result<Arc<dyn AiBackend>, AiError>;
}

/// Factory for the built-in HTTP providers
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpBackendFactory;

impl BackendFactory for HttpBackendFactory {
    fn build(&self, config: &AiProviderConfig) -> Result<Arc<dyn AiBackend>, AiError> {
        backend_from_config(config)
    }
}

/// Instantiate the backend named by `config.provider`
pub fn backend_from_config(config: &AiProviderConfig) -> Result<Arc<dyn AiBackend>, AiError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let api_key = config.resolve_api_key();

    match config.provider.to_ascii_lowercase().as_str() {
        "openai" => {
            let key = api_key.ok_or_else(|| AiError::Backend {
                status: 0,
                message: "openai provider requires an API key".to_string(),
            })?;
            let backend = OpenAiBackend::new(
                "openai",
                config.base_url.as_deref(),
                Some(key),
                &config.model,
                timeout,
            )?
            .with_sampling(config.temperature, config.max_tokens);
            Ok(Arc::new(backend))
        }
        "localai" => {
            let base_url = config.base_url.as_deref().ok_or_else(|| AiError::Backend {
                status: 0,
                message: "localai provider requires base_url".to_string(),
            })?;
            let backend =
                OpenAiBackend::new("localai", Some(base_url), api_key, &config.model, timeout)?
                    .with_sampling(config.temperature, config.max_tokens);
            Ok(Arc::new(backend))
        }
        "anthropic" => {
            let key = api_key.ok_or_else(|| AiError::Backend {
                status: 0,
                message: "anthropic provider requires an API key".to_string(),
            })?;
            let backend =
                AnthropicBackend::new(config.base_url.as_deref(), key, &config.model, timeout)?
                    .with_sampling(config.temperature, config.max_tokens);
            Ok(Arc::new(backend))
        }
        other => Err(AiError::UnsupportedProvider(other.to_string())),
    }
}

/// Map a non-success provider response to an [`AiError`]
pub(crate) fn map_status(status: StatusCode, body: String) -> AiError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        AiError::RateLimited(body)
    } else {
        AiError::Backend {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_selection_by_provider() {
        let mut config = AiProviderConfig::new("openai", "gpt-4o-mini");
        config.api_key = Some("sk".to_string());
        assert_eq!(backend_from_config(&config).unwrap().name(), "openai");

        config.provider = "Anthropic".to_string();
        assert_eq!(backend_from_config(&config).unwrap().name(), "anthropic");

        config.provider = "localai".to_string();
        assert!(backend_from_config(&config).is_err());
        config.base_url = Some("http://localai:8080/v1".to_string());
        assert_eq!(backend_from_config(&config).unwrap().name(), "localai");

        config.provider = "cohere".to_string();
        assert!(matches!(
            backend_from_config(&config),
            Err(AiError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_openai_requires_key() {
        let config = AiProviderConfig::new("openai", "gpt-4o-mini");
        assert!(backend_from_config(&config).is_err());
    }
}
