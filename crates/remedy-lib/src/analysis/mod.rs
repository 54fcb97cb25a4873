//! Cluster analysis
//!
//! Analyzers inspect one resource kind and report [`DiagnosedIssue`]s. The
//! [`AnalysisRunner`] executes a selection of them with bounded parallelism
//! and folds their output into a single [`AnalysisReport`].

mod deployment;
mod pod;
mod runner;


pub use deployment::DeploymentAnalyzer;
pub use pod::PodAnalyzer;
pub use runner::{run_analyzers, AnalysisRunner};

use crate::cluster::ClusterAccessor;
use crate::models::DiagnosedIssue;
use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use async_trait::async_trait;

/// Everything an analyzer may use during one invocation
#[derive(Clone)]
pub struct AnalysisContext {
    pub accessor: Arc<dyn ClusterAccessor>,
    /// `None` analyzes every namespace
    pub namespace: Option<String>,
    pub cancel: CancellationToken,
}

impl AnalysisContext {
    pub fn new(accessor: Arc<dyn ClusterAccessor>) -> Self {
        Self {
            accessor,
            namespace: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A diagnostic plugin for one resource kind
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Registry key, e.g. `Pod`
    fn name(&self) -> &str;

    async fn analyze(&self, ctx: &AnalysisContext) -> Result<Vec<DiagnosedIssue>>;
}

/// Analysis settings
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub namespace: Option<String>,

    /// Analyzers to run when no explicit filter is given
    #[serde(default)]
    pub active: Vec<String>,

    /// Explicit filter; takes precedence over `active`
    #[serde(default)]
    pub filters: Vec<String>,

    #[serde(default)]
    pub with_stats: bool,
}

fn default_max_concurrency() -> usize {
    10
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            namespace: None,
            active: Vec::new(),
            filters: Vec::new(),
            with_stats: false,
        }
    }
}

/// Analyzers chosen for a run, plus filter names that matched nothing
pub struct Selection {
    pub analyzers: Vec<Arc<dyn Analyzer>>,
    pub unknown: Vec<String>,
}

/// Name-keyed table of analyzers
#[derive(Default, Clone)]
pub struct AnalyzerRegistry {
    analyzers: BTreeMap<String, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in analyzers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PodAnalyzer));
        registry.register(Arc::new(DeploymentAnalyzer));
        registry
    }

    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(analyzer.name().to_string(), analyzer);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Analyzer>> {
        self.analyzers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.analyzers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Filter wins over the active set; with neither every analyzer runs
    pub fn select(&self, filter: &[String], active: &[String]) -> Selection {
        let requested = if !filter.is_empty() {
            filter
        } else if !active.is_empty() {
            active
        } else {
            return Selection {
                analyzers: self.analyzers.values().cloned().collect(),
                unknown: Vec::new(),
            };
        };

        let mut analyzers = Vec::new();
        let mut unknown = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for name in requested {
            if !seen.insert(name.as_str()) {
                continue;
            }
            match self.get(name) {
                Some(analyzer) => analyzers.push(analyzer),
                None => unknown.push(name.clone()),
            }
        }
        Selection { analyzers, unknown }
    }
}
