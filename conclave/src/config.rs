//! Engine configuration — defaults, environment overrides, clamping.
//!
//! All tunables have safe defaults; `from_env` reads `CONCLAVE_*`
//! variables and clamps every value to its valid range, so a bad
//! deployment setting degrades to the nearest sane value instead of
//! panicking or misbehaving.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::consensus::ConsensusConfig;
use crate::policy::PolicyConfig;
use crate::resolver::ResolverConfig;

/// Aggregated configuration for the routing engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub policy: PolicyConfig,
    pub resolver: ResolverConfig,
    pub consensus: ConsensusConfig,
}

impl EngineConfig {
    /// Read configuration from `CONCLAVE_*` environment variables.
    ///
    /// Unset or unparseable variables keep their defaults; out-of-range
    /// values are clamped with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(rate) = parse_f64_env("CONCLAVE_LEARNING_RATE") {
            config.policy.learning_rate = clamp_with_warning("CONCLAVE_LEARNING_RATE", rate, 0.01, 1.0);
        }
        if let Some(samples) = parse_u64_env("CONCLAVE_MIN_SAMPLES") {
            config.policy.min_samples_for_confidence = samples.max(1);
        }
        if let Some(rate) = parse_f64_env("CONCLAVE_EXPLORATION_RATE") {
            config.resolver.exploration_rate =
                clamp_with_warning("CONCLAVE_EXPLORATION_RATE", rate, 0.0, 1.0);
        }
        if let Some(k) = parse_u64_env("CONCLAVE_TOP_K") {
            config.resolver.top_k = k.clamp(1, 10) as usize;
        }
        if let Some(threshold) = parse_f64_env("CONCLAVE_CONSENSUS_THRESHOLD") {
            config.consensus.consensus_threshold =
                clamp_with_warning("CONCLAVE_CONSENSUS_THRESHOLD", threshold, 0.5, 1.0);
        }
        if let Some(rounds) = parse_u64_env("CONCLAVE_MAX_ROUNDS") {
            config.consensus.max_rounds = rounds.clamp(1, 10) as u32;
        }
        if let Some(secs) = parse_u64_env("CONCLAVE_ROUND_TIMEOUT_SECS") {
            config.consensus.round_timeout = Duration::from_secs(secs.clamp(1, 600));
        }

        config
    }
}

fn parse_f64_env(var: &str) -> Option<f64> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var, value = %raw, "unparseable numeric env var ignored");
            None
        }
    }
}

fn parse_u64_env(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var, value = %raw, "unparseable numeric env var ignored");
            None
        }
    }
}

fn clamp_with_warning(var: &str, value: f64, min: f64, max: f64) -> f64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(var, value, clamped, "env var out of range; clamped");
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.policy.learning_rate, 0.1);
        assert_eq!(config.policy.min_samples_for_confidence, 10);
        assert_eq!(config.resolver.exploration_rate, 0.1);
        assert_eq!(config.resolver.top_k, 3);
        assert_eq!(config.consensus.max_rounds, 3);
        assert_eq!(config.consensus.consensus_threshold, 0.8);
    }

    #[test]
    fn test_clamp_helper() {
        assert_eq!(clamp_with_warning("X", 5.0, 0.0, 1.0), 1.0);
        assert_eq!(clamp_with_warning("X", -1.0, 0.0, 1.0), 0.0);
        assert_eq!(clamp_with_warning("X", 0.5, 0.0, 1.0), 0.5);
    }

    // Env-var reads race under parallel tests, so from_env coverage stays
    // with the parse helpers.
    #[test]
    fn test_parse_helpers_reject_garbage() {
        assert!("abc".trim().parse::<f64>().is_err());
        assert!("1e-1".trim().parse::<f64>().is_ok());
    }
}
