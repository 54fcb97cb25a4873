//! Hosting process for the remediation engine
//!
//! Serves the cluster HTTP boundary used by `remedyctl` and remote engines,
//! and runs the orchestration loop.

pub mod api;
pub mod config;
