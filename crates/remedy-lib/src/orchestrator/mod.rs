//! Periodic analyze, remediate and verify cycles
//!
//! Provides:
//! - [`CycleRunner`]: one full pass over the cluster, producing a [`CycleSummary`]
//! - [`Orchestrator`]: the ticker that reloads provider configuration and
//!   fires cycles, with a configurable overlap policy

mod cycle;
mod r#loop;


pub use cycle::{CycleRunner, CycleSummary};
pub use r#loop::Orchestrator;

use serde::Deserialize;
use std::time::Duration;

/// What to do when a tick fires while a cycle is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Drop the tick and log it
    #[default]
    Skip,
    /// Start another cycle alongside the running one
    Allow,
}

/// Orchestration loop settings
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default)]
    pub overlap: OverlapPolicy,

    /// Run the explanation pass before remediating
    #[serde(default)]
    pub explain: bool,

    #[serde(skip)]
    interval: Option<Duration>,
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            overlap: OverlapPolicy::default(),
            explain: false,
            interval: None,
        }
    }
}

impl OrchestratorConfig {
    /// Sub-second periods, for tests
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
            .unwrap_or_else(|| Duration::from_secs(self.interval_secs.max(1)))
    }
}
