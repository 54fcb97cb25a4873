//! Rollout verification after a manifest is applied

mod verifier;

pub use verifier::{
    ReadinessPolicy, RolloutVerifier, VerificationOutcome, VerificationTarget, VerifierConfig,
};
