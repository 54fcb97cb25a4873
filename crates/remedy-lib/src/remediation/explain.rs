//! AI explanation of issues, stored in `DiagnosedIssue::details`

use super::prompt::explanation_prompt;
use super::cached_completion;
use crate::ai::AiBackend;
use crate::cache::{fingerprint, CompletionCache};
use crate::error::AiError;
use crate::models::{unmask_text, DiagnosedIssue};
use crate::observability::RemedyMetrics;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Explainer {
    backend: Arc<dyn AiBackend>,
    cache: Arc<CompletionCache>,
    language: String,
    metrics: RemedyMetrics,
}

impl Explainer {
    pub fn new(backend: Arc<dyn AiBackend>, cache: Arc<CompletionCache>, language: &str) -> Self {
        Self {
            backend,
            cache,
            language: language.to_string(),
            metrics: RemedyMetrics::new(),
        }
    }

    /// Fill `issue.details` with an explanation of its failures
    pub async fn explain(&self, issue: &mut DiagnosedIssue) -> Result<(), AiError> {
        let failures = issue.masked_failure_text();
        if failures.trim().is_empty() {
            return Ok(());
        }

        let prompt = explanation_prompt(failures.trim_end(), &self.language);
        let completion = cached_completion(
            &self.cache,
            self.backend.as_ref(),
            fingerprint(self.backend.name(), &self.language, &prompt),
            &prompt,
            &self.metrics,
        )
        .await?;

        debug!(issue = %issue.name, cached = completion.cached, "Explained issue");
        issue.details = unmask_text(&completion.text, &issue.sensitive());
        Ok(())
    }

    /// Explain every issue, stopping early once the backend rate-limits.
    /// Returns how many issues were explained.
    pub async fn explain_all(&self, issues: &mut [DiagnosedIssue]) -> usize {
        let mut explained = 0;
        for issue in issues.iter_mut() {
            match self.explain(issue).await {
                Ok(()) => explained += 1,
                Err(AiError::RateLimited(msg)) => {
                    warn!(error = %msg, "AI backend rate limited, skipping remaining explanations");
                    break;
                }
                Err(e) => {
                    warn!(kind = %issue.kind, name = %issue.name, error = %e, "Explanation failed");
                }
            }
        }
        explained
    }
}
