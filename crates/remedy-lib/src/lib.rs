//! Remediation engine for Kubernetes workloads
//!
//! This crate provides the core functionality for:
//! - Cluster access, directly through the API server or through the agent
//! - Bounded-concurrency analysis of cluster resources
//! - AI-generated manifest corrections with a completion cache
//! - Server-side apply and rollout verification
//! - The periodic orchestration loop, health checks and observability

pub mod ai;
pub mod analysis;
pub mod cache;
pub mod cluster;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod remediation;
pub mod rollout;

pub use cluster::{AgentClient, ClusterAccessor, KubeClusterAccessor, ResourceKind};
pub use error::{AiError, CacheError, ClusterError, RemediationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{RemedyMetrics, StructuredLogger};
pub use orchestrator::{CycleRunner, CycleSummary, Orchestrator, OrchestratorConfig};
