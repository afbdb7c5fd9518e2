//! Provider registry — static capability and benchmark metadata.
//!
//! Tracks which providers exist, what they can do, and their declared
//! benchmark scores. Benchmark numbers are configuration data loaded at
//! startup, never computed at runtime; source real measurements before
//! trusting them in production.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::{Capability, TaskDomain};
use crate::provider::ProviderId;

/// Errors raised while loading or validating the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("registry is empty")]
    Empty,

    #[error("duplicate provider id: {0}")]
    DuplicateProvider(ProviderId),

    #[error("default provider {0} is not in the registry")]
    UnknownDefault(ProviderId),

    #[error("benchmark out of range for {provider}: {field}={value}")]
    BenchmarkOutOfRange {
        provider: ProviderId,
        field: &'static str,
        value: f64,
    },
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Fixed-shape declared benchmark record for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    /// Declared quality score (0.0-1.0).
    pub quality: f64,
    /// Declared average cost per call.
    pub avg_cost: f64,
    /// Declared average latency in milliseconds.
    pub avg_latency_ms: u64,
}

impl BenchmarkRecord {
    fn validate(&self, provider: &ProviderId) -> RegistryResult<()> {
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(RegistryError::BenchmarkOutOfRange {
                provider: provider.clone(),
                field: "quality",
                value: self.quality,
            });
        }
        if self.avg_cost < 0.0 {
            return Err(RegistryError::BenchmarkOutOfRange {
                provider: provider.clone(),
                field: "avg_cost",
                value: self.avg_cost,
            });
        }
        Ok(())
    }
}

/// Static profile for one registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Catalog identifier.
    pub id: ProviderId,
    /// Human-readable name for justification strings.
    pub display_name: String,
    /// Capabilities this provider offers.
    pub capabilities: Vec<Capability>,
    /// Domains this provider is declared to specialize in.
    pub specializations: Vec<TaskDomain>,
    /// Declared benchmark record (static configuration).
    pub benchmarks: BenchmarkRecord,
}

impl ProviderProfile {
    /// Whether this provider covers every required capability.
    pub fn covers(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }

    /// Whether this provider declares a specialization for the domain.
    pub fn specializes_in(&self, domain: TaskDomain) -> bool {
        self.specializations.contains(&domain)
    }
}

/// TOML file shape for registry configuration.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    default_provider: ProviderId,
    #[serde(rename = "provider")]
    providers: Vec<ProviderProfile>,
}

/// Registry of all known providers, in declaration order.
///
/// Declaration order is significant: it is the tie-breaker everywhere a
/// deterministic ordering is required.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    profiles: Vec<ProviderProfile>,
    default_provider: ProviderId,
}

impl ProviderRegistry {
    /// Build a registry from profiles plus a documented system default.
    ///
    /// The default provider is the answer of last resort when every
    /// candidate has been filtered away.
    pub fn new(
        profiles: Vec<ProviderProfile>,
        default_provider: ProviderId,
    ) -> RegistryResult<Self> {
        if profiles.is_empty() {
            return Err(RegistryError::Empty);
        }
        for (i, p) in profiles.iter().enumerate() {
            p.benchmarks.validate(&p.id)?;
            if profiles[..i].iter().any(|q| q.id == p.id) {
                return Err(RegistryError::DuplicateProvider(p.id.clone()));
            }
        }
        if !profiles.iter().any(|p| p.id == default_provider) {
            return Err(RegistryError::UnknownDefault(default_provider));
        }
        Ok(Self {
            profiles,
            default_provider,
        })
    }

    /// Load and validate a registry from TOML configuration.
    pub fn from_toml(raw: &str) -> RegistryResult<Self> {
        let file: RegistryFile = toml::from_str(raw)?;
        Self::new(file.providers, file.default_provider)
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &str) -> Option<&ProviderProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// All registered providers in declaration order.
    pub fn all(&self) -> &[ProviderProfile] {
        &self.profiles
    }

    /// Provider ids in declaration order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.profiles.iter().map(|p| p.id.clone()).collect()
    }

    /// Providers declaring a specialization for the domain, in declaration order.
    pub fn specialists_for(&self, domain: TaskDomain) -> Vec<&ProviderProfile> {
        self.profiles
            .iter()
            .filter(|p| p.specializes_in(domain))
            .collect()
    }

    /// The documented system-default provider.
    pub fn default_provider(&self) -> &ProviderProfile {
        // Validated at construction; the default is always present.
        self.profiles
            .iter()
            .find(|p| p.id == self.default_provider)
            .unwrap_or(&self.profiles[0])
    }
}
