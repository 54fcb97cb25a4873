//! Agent configuration
//!
//! Read from an optional file (`REMEDY_CONFIG`, default `remedy.yaml`)
//! layered under `REMEDY_*` environment variables, with `__` separating
//! nested keys (`REMEDY_ORCHESTRATOR__INTERVAL_SECS=30`).

use anyhow::{Context, Result};
use remedy_lib::analysis::AnalysisConfig;
use remedy_lib::cache::CacheConfig;
use remedy_lib::orchestrator::OrchestratorConfig;
use remedy_lib::rollout::VerifierConfig;
use serde::Deserialize;
use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "REMEDY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "remedy.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name reported in structured log records
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Port of the cluster boundary, health and metrics server
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default)]
    pub cluster: ClusterSection,

    #[serde(default)]
    pub ai: AiSection,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub verifier: VerifierConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterSection {
    /// Reach the cluster through another agent instead of the API server
    #[serde(default)]
    pub agent_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiSection {
    /// Provider document, reloaded every cycle
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

fn default_instance() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "kube-remedy".to_string())
}

fn default_listen_port() -> u16 {
    8080
}

impl AgentConfig {
    /// Load from the configured file and the environment
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path, explicit.is_some())
    }

    /// An explicitly named file must exist; the default one may be absent
    pub fn load_from(path: &std::path::Path, required: bool) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path).required(required))
            .add_source(
                config::Environment::with_prefix("REMEDY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(config::Config::try_deserialize)
            .with_context(|| format!("loading configuration from {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_lib::orchestrator::OverlapPolicy;
    use remedy_lib::rollout::ReadinessPolicy;
    use std::io::Write;

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let config =
            AgentConfig::load_from(std::path::Path::new("/nonexistent/remedy.yaml"), false)
                .unwrap();

        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.orchestrator.interval_secs, 60);
        assert_eq!(config.orchestrator.overlap, OverlapPolicy::Skip);
        assert_eq!(config.verifier.readiness, ReadinessPolicy::Any);
        assert!(config.cache.enabled);
        assert!(config.ai.config_path.is_none());
    }

    #[test]
    fn test_missing_required_file_fails() {
        assert!(
            AgentConfig::load_from(std::path::Path::new("/nonexistent/remedy.yaml"), true)
                .is_err()
        );
    }

    #[test]
    fn test_file_values_are_read() {
        let mut file = tempfile_yaml();
        writeln!(
            file,
            "listen_port: 9000\n\
             ai:\n  config_path: /etc/remedy/provider.yaml\n\
             analysis:\n  max_concurrency: 4\n  active: [Pod]\n\
             cache:\n  backend: file\n  dir: /tmp/remedy-cache\n\
             verifier:\n  timeout_secs: 60\n  readiness: all\n\
             orchestrator:\n  interval_secs: 30\n  overlap: allow\n  explain: true"
        )
        .unwrap();

        let config = AgentConfig::load_from(file.path(), true).unwrap();

        assert_eq!(config.listen_port, 9000);
        assert_eq!(
            config.ai.config_path,
            Some(PathBuf::from("/etc/remedy/provider.yaml"))
        );
        assert_eq!(config.analysis.max_concurrency, 4);
        assert_eq!(config.analysis.active, vec!["Pod".to_string()]);
        assert_eq!(config.verifier.timeout_secs, 60);
        assert_eq!(config.verifier.readiness, ReadinessPolicy::All);
        assert_eq!(config.orchestrator.overlap, OverlapPolicy::Allow);
        assert!(config.orchestrator.explain);
    }

    fn tempfile_yaml() -> tempfile::NamedTempFile {
        tempfile::Builder::new().suffix(".yaml").tempfile().unwrap()
    }
}
