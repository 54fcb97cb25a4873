//! Core data models for the remediation engine

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// A substring of a failure message that must not leave the process as-is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensitive {
    pub unmasked: String,
    pub masked: String,
}

impl Sensitive {
    /// Create a sensitive value with a deterministic, length-preserving mask
    pub fn new(unmasked: impl Into<String>) -> Self {
        let unmasked = unmasked.into();
        let masked = mask_value(&unmasked);
        Self { unmasked, masked }
    }
}

/// Produce a mask for `value` with the same length.
///
/// The mask is derived from a SHA-256 of the value so identical failures mask
/// identically across cycles and keep hitting the same cache entries.
pub fn mask_value(value: &str) -> String {
    let len = value.chars().count();
    let mut out = String::with_capacity(len);
    let mut round = 0u32;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(round.to_be_bytes());
        hasher.update(value.as_bytes());
        for byte in hasher.finalize() {
            if out.len() == len {
                break;
            }
            // letters only, so masks stay valid inside resource names
            out.push((b'a' + byte % 26) as char);
        }
        round += 1;
    }
    out
}

/// One detected failure message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensitive: Vec<Sensitive>,
}

impl Failure {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sensitive: Vec::new(),
        }
    }

    pub fn with_sensitive(mut self, values: impl IntoIterator<Item = String>) -> Self {
        self.sensitive
            .extend(values.into_iter().filter(|v| !v.is_empty()).map(Sensitive::new));
        self
    }

    /// Text safe to send outside the process
    pub fn masked_text(&self) -> String {
        mask_text(&self.text, &self.sensitive)
    }
}

/// Replace every unmasked value with its mask
pub fn mask_text(text: &str, sensitive: &[Sensitive]) -> String {
    // longest first so a value that contains another is masked whole
    let mut ordered: Vec<&Sensitive> = sensitive.iter().collect();
    ordered.sort_by(|a, b| b.unmasked.len().cmp(&a.unmasked.len()));
    ordered
        .into_iter()
        .fold(text.to_string(), |acc, s| acc.replace(&s.unmasked, &s.masked))
}

/// Replace every mask with its original value
pub fn unmask_text(text: &str, sensitive: &[Sensitive]) -> String {
    let mut ordered: Vec<&Sensitive> = sensitive.iter().collect();
    ordered.sort_by(|a, b| b.masked.len().cmp(&a.masked.len()));
    ordered
        .into_iter()
        .fold(text.to_string(), |acc, s| acc.replace(&s.masked, &s.unmasked))
}

/// One unhealthy resource found by an analyzer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosedIssue {
    pub kind: String,
    /// `namespace/name` for namespaced resources
    pub name: String,
    /// `Kind/name` of the owning controller, empty when not attributed
    #[serde(default)]
    pub parent_object: String,
    #[serde(default)]
    pub errors: Vec<Failure>,
    #[serde(default)]
    pub details: String,
}

impl DiagnosedIssue {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            parent_object: String::new(),
            errors: Vec::new(),
            details: String::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_object = parent.into();
        self
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.errors.push(failure);
        self
    }

    /// All sensitive values across every failure
    pub fn sensitive(&self) -> Vec<Sensitive> {
        self.errors
            .iter()
            .flat_map(|f| f.sensitive.iter().cloned())
            .collect()
    }

    /// Masked failure texts joined by newlines
    pub fn masked_failure_text(&self) -> String {
        self.errors
            .iter()
            .map(|f| format!("{}\n", f.masked_text()))
            .collect()
    }
}

/// Category of an analyzer-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerFailureKind {
    /// Requested by filter but not registered
    UnknownAnalyzer,
    /// The analyzer returned an error
    Failed,
    /// The analyzer panicked
    Panicked,
    /// The cycle was cancelled before the analyzer finished
    Cancelled,
}

/// Infrastructure-level failure of one analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerFailure {
    pub analyzer: String,
    pub kind: AnalyzerFailureKind,
    pub message: String,
}

impl fmt::Display for AnalyzerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.analyzer, self.message)
    }
}

/// Duration of one analyzer invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerStat {
    pub analyzer: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// Aggregate of one analysis run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub results: Vec<DiagnosedIssue>,
    pub errors: Vec<AnalyzerFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Vec<AnalyzerStat>>,
    /// Analyzers that finished without error
    pub completed: Vec<String>,
}

impl AnalysisReport {
    /// Errors raised by analyzers that were actually invoked
    pub fn invocation_errors(&self) -> impl Iterator<Item = &AnalyzerFailure> {
        self.errors
            .iter()
            .filter(|e| e.kind != AnalyzerFailureKind::UnknownAnalyzer)
    }

    pub fn is_clean(&self) -> bool {
        self.results.is_empty() && self.errors.is_empty()
    }
}

/// How the cluster handled an apply request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    Created,
    Updated,
    Applied,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyAction::Created => write!(f, "created"),
            ApplyAction::Updated => write!(f, "updated"),
            ApplyAction::Applied => write!(f, "applied"),
        }
    }
}

/// Result of applying one manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub action: ApplyAction,
}

/// Waiting or terminated detail of a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Status of a single container in a pod
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    pub ready: bool,
    #[serde(default)]
    pub restart_count: i32,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<ContainerStateDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<ContainerStateDetail>,
}

/// Pod condition as reported by the API server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Configuration and observed state of one probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeStatus {
    pub status: bool,
    pub success_threshold: i32,
    pub failure_count: i32,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<String>,
}

/// Liveness and readiness probes of one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProbes {
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness: Option<ProbeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ProbeStatus>,
}

/// Pod phase and per-container readiness
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probe_results: Vec<ContainerProbes>,
}

impl PodStatus {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }

    pub fn is_failed(&self) -> bool {
        self.phase == "Failed"
    }

    /// Running with every container ready
    pub fn is_ready(&self) -> bool {
        self.is_running() && self.container_statuses.iter().all(|c| c.ready)
    }
}

/// Member pods of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPods {
    pub name: String,
    pub namespace: String,
    pub pod_names: Vec<String>,
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
