//! Error types for each layer of the engine

use thiserror::Error;

/// Errors reported by a cluster accessor
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("cluster transport error: {0}")]
    Transport(String),

    #[error("cluster API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClusterError {
    pub fn not_found(kind: &str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ClusterError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for ClusterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Serialization(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Errors reported by an AI backend
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI provider rate limit reached: {0}")]
    RateLimited(String),

    #[error("AI provider returned an error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("AI provider transport error: {0}")]
    Transport(String),

    #[error("AI provider returned an empty completion")]
    EmptyResponse,

    #[error("unsupported AI provider: {0}")]
    UnsupportedProvider(String),
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Errors of a completion cache store
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry could not be decoded: {0}")]
    Decode(String),
}

/// Errors of one remediation attempt
#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("invalid resource name format: {0}")]
    InvalidName(String),

    #[error("invalid parent object format: {0}")]
    InvalidParentObject(String),

    #[error("unsupported resource kind: {0}")]
    UnsupportedKind(String),

    #[error("failed to fetch manifest for {target}: {source}")]
    ManifestFetch {
        target: String,
        #[source]
        source: ClusterError,
    },

    #[error("AI backend quota exhausted, remediation deferred: {0}")]
    RateLimited(String),

    #[error("AI backend failed to generate a manifest: {0}")]
    Backend(#[source] AiError),

    #[error("failed to apply manifest: {0}")]
    Apply(#[source] ClusterError),

    #[error("remediation cancelled before apply")]
    Cancelled,
}

impl RemediationError {
    /// Input errors are never worth retrying
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            RemediationError::InvalidName(_)
                | RemediationError::InvalidParentObject(_)
                | RemediationError::UnsupportedKind(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemediationError::RateLimited(_))
    }

    /// Metric label for the failure
    pub fn label(&self) -> &'static str {
        match self {
            RemediationError::InvalidName(_)
            | RemediationError::InvalidParentObject(_)
            | RemediationError::UnsupportedKind(_) => "invalid",
            RemediationError::ManifestFetch { .. } => "fetch_failed",
            RemediationError::RateLimited(_) => "rate_limited",
            RemediationError::Backend(_) => "generation_failed",
            RemediationError::Apply(_) => "apply_failed",
            RemediationError::Cancelled => "cancelled",
        }
    }
}

impl From<AiError> for RemediationError {
    fn from(e: AiError) -> Self {
        match e {
            AiError::RateLimited(msg) => RemediationError::RateLimited(msg),
            other => RemediationError::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_maps_to_distinct_variant() {
        let err: RemediationError = AiError::RateLimited("429 Too Many Requests".into()).into();
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("quota exhausted"));

        let err: RemediationError = AiError::EmptyResponse.into();
        assert!(!err.is_rate_limited());
        assert!(matches!(err, RemediationError::Backend(_)));
    }

    #[test]
    fn test_input_errors_are_flagged() {
        assert!(RemediationError::InvalidName("x".into()).is_input_error());
        assert!(RemediationError::InvalidParentObject("x".into()).is_input_error());
        assert!(!RemediationError::Apply(ClusterError::Transport("x".into())).is_input_error());
    }
}
