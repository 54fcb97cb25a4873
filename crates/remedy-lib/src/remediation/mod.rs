//! Remediation of diagnosed issues
//!
//! For each issue the generator fetches the current manifest of the
//! responsible resource, asks the AI backend for a corrected version
//! (through the completion cache), applies it with server-side apply and
//! waits for the rollout verifier to reach a verdict.

mod explain;
mod generator;
mod prompt;
mod target;


pub use explain::Explainer;
pub use generator::{GeneratedManifest, RemediationAttempt, RemediationGenerator};
pub use prompt::{correction_prompt, explanation_prompt};
pub use target::{resolve_target, RemediationTarget};

use crate::ai::AiBackend;
use crate::cache::CompletionCache;
use crate::error::AiError;
use crate::observability::RemedyMetrics;
use tracing::debug;

/// A completion and whether it was served from the cache
pub(crate) struct Completion {
    pub text: String,
    pub fingerprint: String,
    pub cached: bool,
}

/// Serve the entry under `key` from the cache, or send `prompt` to the
/// backend and remember the answer under `key`
pub(crate) async fn cached_completion(
    cache: &CompletionCache,
    backend: &dyn AiBackend,
    key: String,
    prompt: &str,
    metrics: &RemedyMetrics,
) -> Result<Completion, AiError> {
    if let Some(text) = cache.lookup(&key).await {
        return Ok(Completion {
            text,
            fingerprint: key,
            cached: true,
        });
    }

    debug!(fingerprint = %key, provider = %backend.name(), "Requesting completion");
    let text = match backend.complete(prompt).await {
        Ok(text) => {
            metrics.inc_ai_requests(backend.name(), "ok");
            text
        }
        Err(e) => {
            let result = if matches!(e, AiError::RateLimited(_)) {
                "rate_limited"
            } else {
                "error"
            };
            metrics.inc_ai_requests(backend.name(), result);
            return Err(e);
        }
    };

    cache.store(&key, &text).await;
    Ok(Completion {
        text,
        fingerprint: key,
        cached: false,
    })
}
