//! Fetch, prompt, apply and verify one issue

use super::prompt::correction_prompt;
use super::target::{resolve_target, RemediationTarget};
use super::{cached_completion, Completion};
use crate::ai::AiBackend;
use crate::cache::{fingerprint, CompletionCache};
use crate::cluster::{ClusterAccessor, ResourceKind, DEFAULT_NAMESPACE, FIELD_MANAGER};
use crate::error::RemediationError;
use crate::models::{unmask_text, ApplyOutcome, DiagnosedIssue};
use crate::observability::{RemedyMetrics, StructuredLogger};
use crate::rollout::{RolloutVerifier, VerificationOutcome, VerificationTarget};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Corrected manifest produced for an issue
#[derive(Debug, Clone)]
pub struct GeneratedManifest {
    pub target: RemediationTarget,
    pub source_manifest: String,
    /// Backend output after unmasking; not validated
    pub manifest: String,
    pub fingerprint: String,
    pub from_cache: bool,
}

/// Everything that happened while remediating one issue
#[derive(Debug, Clone)]
pub struct RemediationAttempt {
    pub target: RemediationTarget,
    pub source_manifest: String,
    pub generated_manifest: String,
    pub outcome: ApplyOutcome,
    pub verification: VerificationOutcome,
}

impl RemediationAttempt {
    /// Applied and verified ready
    pub fn recovered(&self) -> bool {
        self.verification.is_ready()
    }
}

pub struct RemediationGenerator {
    accessor: Arc<dyn ClusterAccessor>,
    backend: Arc<dyn AiBackend>,
    cache: Arc<CompletionCache>,
    verifier: Arc<RolloutVerifier>,
    language: String,
    metrics: RemedyMetrics,
    logger: StructuredLogger,
}

impl RemediationGenerator {
    pub fn new(
        accessor: Arc<dyn ClusterAccessor>,
        backend: Arc<dyn AiBackend>,
        cache: Arc<CompletionCache>,
        verifier: Arc<RolloutVerifier>,
    ) -> Self {
        Self {
            accessor,
            backend,
            cache,
            verifier,
            language: "english".to_string(),
            metrics: RemedyMetrics::new(),
            logger: StructuredLogger::new("remediator"),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Produce a corrected manifest for `issue` without applying it
    pub async fn generate(
        &self,
        issue: &DiagnosedIssue,
    ) -> Result<GeneratedManifest, RemediationError> {
        let target = resolve_target(issue)?;
        debug!(%target, issue = %issue.name, "Fetching manifest");

        let source_manifest = self
            .accessor
            .get(target.kind, &target.namespace, &target.name)
            .await
            .map_err(|source| RemediationError::ManifestFetch {
                target: target.to_string(),
                source,
            })?;

        let failure_text = issue.masked_failure_text();
        let prompt = correction_prompt(
            target.kind.as_str(),
            &source_manifest,
            &failure_text,
            &issue.details,
        );
        // Keyed on the failure signature alone so manifest drift still hits
        let key = fingerprint(self.backend.name(), &self.language, &failure_text);

        let Completion {
            text,
            fingerprint,
            cached,
        } = cached_completion(
            &self.cache,
            self.backend.as_ref(),
            key,
            &prompt,
            &self.metrics,
        )
        .await?;

        info!(
            kind = %target.kind,
            namespace = %target.namespace,
            name = %target.name,
            %fingerprint,
            cached,
            "Generated corrected manifest"
        );

        Ok(GeneratedManifest {
            target,
            source_manifest,
            manifest: unmask_text(&text, &issue.sensitive()),
            fingerprint,
            from_cache: cached,
        })
    }

    /// Server-side apply of a manifest, defaulting an unset namespace
    pub async fn apply(&self, manifest: &str) -> Result<ApplyOutcome, RemediationError> {
        let manifest = with_default_namespace(manifest);
        self.accessor
            .apply(&manifest, FIELD_MANAGER, true)
            .await
            .map_err(RemediationError::Apply)
    }

    /// Generate, apply and verify. Apply is never attempted after a generation error.
    pub async fn remediate(
        &self,
        issue: &DiagnosedIssue,
        cancel: &CancellationToken,
    ) -> Result<RemediationAttempt, RemediationError> {
        let result = self.remediate_inner(issue, cancel).await;
        match &result {
            Ok(attempt) => {
                let label = if attempt.recovered() {
                    "recovered"
                } else {
                    "unverified"
                };
                self.metrics.inc_remediations(label);
            }
            Err(RemediationError::Cancelled) => {
                self.metrics.inc_remediations("cancelled");
                info!(kind = %issue.kind, name = %issue.name, "Remediation cancelled before apply");
            }
            Err(e) => {
                self.metrics.inc_remediations(e.label());
                self.logger
                    .log_remediation_failed(&issue.kind, &issue.name, &e.to_string());
            }
        }
        result
    }

    async fn remediate_inner(
        &self,
        issue: &DiagnosedIssue,
        cancel: &CancellationToken,
    ) -> Result<RemediationAttempt, RemediationError> {
        let generated = self.generate(issue).await?;
        if cancel.is_cancelled() {
            return Err(RemediationError::Cancelled);
        }

        let outcome = self.apply(&generated.manifest).await?;
        self.logger.log_remediation_applied(
            &outcome.kind,
            &outcome.namespace,
            &outcome.name,
            &outcome.action.to_string(),
        );

        let target = verification_target(&generated.target, &outcome);
        let verification = self.verifier.verify(&target, cancel).await;
        self.metrics.inc_verifications(verification.label());
        self.logger.log_verification(
            target.kind.as_str(),
            &target.namespace,
            &target.name,
            verification.label(),
        );
        if !verification.is_ready() {
            warn!(%target, outcome = %verification, "Applied fix did not verify");
        }

        Ok(RemediationAttempt {
            target: generated.target,
            source_manifest: generated.source_manifest,
            generated_manifest: generated.manifest,
            outcome,
            verification,
        })
    }
}

/// Prefer what the cluster reports it applied; fall back to the fetched target
fn verification_target(target: &RemediationTarget, outcome: &ApplyOutcome) -> VerificationTarget {
    match outcome.kind.parse::<ResourceKind>() {
        Ok(kind) if !outcome.name.is_empty() => VerificationTarget {
            kind,
            namespace: if outcome.namespace.is_empty() {
                target.namespace.clone()
            } else {
                outcome.namespace.clone()
            },
            name: outcome.name.clone(),
        },
        _ => VerificationTarget {
            kind: target.kind,
            namespace: target.namespace.clone(),
            name: target.name.clone(),
        },
    }
}

/// Insert `metadata.namespace: default` into namespaced manifests that lack one.
///
/// Text that does not parse, or whose kind is unknown, is passed through unchanged.
fn with_default_namespace(manifest: &str) -> String {
    let Ok(mut value) = serde_yaml::from_str::<serde_yaml::Value>(manifest) else {
        return manifest.to_string();
    };
    let namespaced = value["kind"]
        .as_str()
        .map(|k| k.parse::<ResourceKind>().is_ok())
        .unwrap_or(false);
    let Some(metadata) = value
        .get_mut("metadata")
        .and_then(serde_yaml::Value::as_mapping_mut)
    else {
        return manifest.to_string();
    };

    let has_namespace = metadata
        .get("namespace")
        .and_then(serde_yaml::Value::as_str)
        .map(|ns| !ns.is_empty())
        .unwrap_or(false);
    if !namespaced || has_namespace {
        return manifest.to_string();
    }

    metadata.insert("namespace".into(), DEFAULT_NAMESPACE.into());
    serde_yaml::to_string(&value).unwrap_or_else(|_| manifest.to_string())
}
