//! Provider adapter contract — the uniform request/response seam.
//!
//! Every backend capability is reached through [`ProviderAdapter`]. This
//! crate never inspects provider-specific protocols; retries and backoff
//! for an individual call are the adapter's responsibility, not ours.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque provider identifier, assigned by the external catalog.
pub type ProviderId = String;

/// Errors surfaced by a provider call.
///
/// These are typed failures, never panics: in single-route mode the caller
/// sees them as a routing failure, in consensus mode a failed call merely
/// removes one vote from the current round.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider not reachable: {0}")]
    Unavailable(ProviderId),

    #[error("provider call failed: {0}")]
    CallFailed(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rejected request: {0}")]
    Rejected(String),
}

/// Result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Per-call constraints passed through to the adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallConstraints {
    /// Maximum output units (tokens or provider-equivalent).
    pub max_units: Option<u32>,
    /// Cost ceiling for this single call.
    pub max_cost: Option<f64>,
    /// Soft latency target; the hard cut-off is enforced by the caller.
    pub target_latency_ms: Option<u64>,
}

/// One request to a backend provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Which provider to invoke.
    pub provider: ProviderId,
    /// Prompt or payload content.
    pub content: String,
    /// Optional system/context framing prepended by the caller.
    pub system: Option<String>,
    /// Per-call constraints.
    pub constraints: CallConstraints,
}

impl ProviderRequest {
    pub fn new(provider: impl Into<ProviderId>, content: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            content: content.into(),
            system: None,
            constraints: CallConstraints::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_constraints(mut self, constraints: CallConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// A successful provider response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Response content.
    pub content: String,
    /// Units consumed (tokens or provider-equivalent).
    pub units: u32,
    /// Cost of this call in the caller's currency.
    pub cost: f64,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
}

/// Uniform interface to invoke a backend capability.
///
/// Implementations live in the external provider catalog; tests use
/// scripted adapters.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Invoke a provider. Failures are typed, never panics.
    async fn invoke(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse>;

    /// Whether the given provider is currently reachable.
    async fn is_available(&self, provider: &ProviderId) -> bool {
        let _ = provider;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = ProviderRequest::new("alpha", "do the thing")
            .with_system("you are terse")
            .with_constraints(CallConstraints {
                max_units: Some(256),
                max_cost: None,
                target_latency_ms: Some(2_000),
            });
        assert_eq!(req.provider, "alpha");
        assert_eq!(req.system.as_deref(), Some("you are terse"));
        assert_eq!(req.constraints.max_units, Some(256));
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::Timeout(Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
        let err = ProviderError::Unavailable("beta".to_string());
        assert!(err.to_string().contains("beta"));
    }

    #[test]
    fn test_response_serde_roundtrip() {
        let resp = ProviderResponse {
            content: "done".to_string(),
            units: 42,
            cost: 0.003,
            latency_ms: 120,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: ProviderResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.units, 42);
        assert_eq!(parsed.content, "done");
    }
}
