//! Conclave — adaptive task routing with multi-participant consensus.
//!
//! This library provides:
//! - Keyword-based task classification into domains and complexity tiers
//! - A static, priority-ordered routing rule table
//! - A learned routing policy updated online from task feedback
//! - A route resolver blending rules, policy, and ε-greedy exploration
//! - Weighted A/B experiments over routing configurations
//! - Committee-based consensus sessions with bounded deliberation rounds
//!
//! # Usage
//!
//! ```rust,ignore
//! use conclave::{EngineConfig, ProviderRegistry, RoutingEngine, RuleTable};
//!
//! let registry = ProviderRegistry::from_toml(&std::fs::read_to_string("providers.toml")?)?;
//! let rules = RuleTable::from_toml(&std::fs::read_to_string("rules.toml")?, &registry)?;
//! let engine = RoutingEngine::new(EngineConfig::from_env(), registry, rules, adapter).shared();
//!
//! let report = engine.execute("fix the failing build", None, &Default::default()).await?;
//! engine.record_feedback(&report.provider, profile.domain, 0.8, true, None, Default::default());
//! ```

pub mod classifier;
pub mod config;
pub mod consensus;
pub mod engine;
pub mod experiment;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod rules;

// Re-export key classifier types
pub use classifier::{Capability, Complexity, TaskClassifier, TaskDomain, TaskProfile};

// Re-export configuration
pub use config::EngineConfig;

// Re-export key consensus types
pub use consensus::{
    Committee, CommitteeError, CommitteeSeat, ConsensusConfig, ConsensusOrchestrator,
    ConsensusOutcome, ConsensusSession, ParticipantResponse, SessionPhase,
};

// Re-export engine types
pub use engine::{EngineError, EngineResult, ExecutionReport, RoutingEngine, SharedEngine};

// Re-export experiment types
pub use experiment::{
    Experiment, ExperimentError, ExperimentManager, ExperimentStatus, ExperimentVerdict, Variant,
    VariantSpec,
};

// Re-export policy types
pub use policy::{
    FeedbackEntry, InMemoryBackend, PolicyConfig, PolicyState, PolicyStore, SharedPolicyStore,
    StateBackend,
};

// Re-export provider seam types
pub use provider::{
    CallConstraints, ProviderAdapter, ProviderError, ProviderId, ProviderRequest,
    ProviderResponse, ProviderResult,
};

// Re-export registry types
pub use registry::{BenchmarkRecord, ProviderProfile, ProviderRegistry, RegistryError};

// Re-export resolver types
pub use resolver::{RankedAlternative, ResolverConfig, RouteResolver, RoutingDecision};

// Re-export rule table types
pub use rules::{RouteConstraints, RoutingRule, RuleLoadError, RuleTable};
