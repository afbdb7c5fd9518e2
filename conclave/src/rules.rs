//! Rule-based route selection — the static, ordered rule table.
//!
//! Rules are configuration data: never mutated at runtime, totally
//! ordered by priority with declaration order as the tie-breaker.
//! A miss ("no rule matched") is a normal outcome, not an error; the
//! resolver falls through to policy-only or default selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::{Capability, TaskDomain, TaskProfile};
use crate::provider::ProviderId;
use crate::registry::{BenchmarkRecord, ProviderRegistry};

/// Errors raised while loading or validating the rule table.
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("rule TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("rule {rule} references unknown provider {provider}")]
    UnknownProvider { rule: String, provider: ProviderId },

    #[error("rule {rule} has no primary provider")]
    MissingPrimary { rule: String },
}

/// Hard constraint thresholds declared on a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConstraints {
    /// Minimum declared benchmark quality for the primary.
    pub min_quality: Option<f64>,
    /// Maximum declared cost per call for the primary.
    pub max_cost: Option<f64>,
    /// Maximum declared latency for the primary.
    pub max_latency_ms: Option<u64>,
}

/// One static routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Name for logs and justifications.
    pub name: String,
    /// Domains this rule applies to; empty means wildcard.
    #[serde(default)]
    pub domains: Vec<TaskDomain>,
    /// Primary provider choice.
    pub primary: ProviderId,
    /// Capability weights used to pick the routed capability.
    #[serde(default)]
    pub capability_weights: BTreeMap<Capability, f64>,
    /// Ordered fallback chain.
    #[serde(default)]
    pub fallbacks: Vec<ProviderId>,
    /// Hard constraints; a violated rule is dropped, not errored.
    #[serde(default)]
    pub constraints: RuleConstraints,
    /// Higher priority wins; ties go to declaration order.
    #[serde(default)]
    pub priority: i32,
}

impl RoutingRule {
    /// Whether this rule applies to the given domain.
    pub fn matches_domain(&self, domain: TaskDomain) -> bool {
        self.domains.is_empty() || self.domains.contains(&domain)
    }

    /// The rule's preferred capability (highest declared weight).
    pub fn preferred_capability(&self) -> Option<Capability> {
        self.capability_weights
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(c, _)| *c)
    }
}

/// Caller-supplied routing constraints and preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConstraints {
    /// Providers the caller refuses.
    pub excluded_providers: Vec<ProviderId>,
    /// Providers the caller prefers (scoring bonus, never exclusive).
    pub preferred_providers: Vec<ProviderId>,
    /// Per-call cost ceiling.
    pub max_cost: Option<f64>,
    /// Per-call latency ceiling in milliseconds.
    pub max_latency_ms: Option<u64>,
    /// Minimum decision confidence the caller will accept.
    pub min_confidence: Option<f64>,
}

impl RouteConstraints {
    pub fn excludes(&self, provider: &str) -> bool {
        self.excluded_providers.iter().any(|p| p == provider)
    }

    pub fn prefers(&self, provider: &str) -> bool {
        self.preferred_providers.iter().any(|p| p == provider)
    }
}

/// A matched rule with its resolved candidate chain.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    /// Name of the winning rule.
    pub rule_name: String,
    /// Capability the rule routes to, if declared.
    pub capability: Option<Capability>,
    /// Primary plus fallbacks, exclusions already removed, each annotated
    /// with its declared benchmark record.
    pub chain: Vec<(ProviderId, BenchmarkRecord)>,
}

/// TOML file shape for the rule table.
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(rename = "rule")]
    rules: Vec<RoutingRule>,
}

/// The static, ordered rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<RoutingRule>,
}

impl RuleTable {
    /// Build a table from rules, validating provider references.
    pub fn new(rules: Vec<RoutingRule>, registry: &ProviderRegistry) -> Result<Self, RuleLoadError> {
        for rule in &rules {
            if rule.primary.is_empty() {
                return Err(RuleLoadError::MissingPrimary {
                    rule: rule.name.clone(),
                });
            }
            for provider in std::iter::once(&rule.primary).chain(rule.fallbacks.iter()) {
                if registry.get(provider).is_none() {
                    return Err(RuleLoadError::UnknownProvider {
                        rule: rule.name.clone(),
                        provider: provider.clone(),
                    });
                }
            }
        }
        Ok(Self { rules })
    }

    /// Load and validate a rule table from TOML configuration.
    pub fn from_toml(raw: &str, registry: &ProviderRegistry) -> Result<Self, RuleLoadError> {
        let file: RuleFile = toml::from_str(raw)?;
        Self::new(file.rules, registry)
    }

    /// An empty table (policy-only routing).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rules in the table.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Select the best rule for a profile, or `None` on a miss.
    ///
    /// Deterministic: identical inputs with an unchanged table always
    /// produce the identical match.
    pub fn select(
        &self,
        profile: &TaskProfile,
        constraints: &RouteConstraints,
        registry: &ProviderRegistry,
    ) -> Option<RuleMatch> {
        let best = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches_domain(profile.domain))
            .filter(|(_, rule)| self.satisfies_constraints(rule, constraints, registry))
            // Highest priority wins; min_by_key on (-priority, index) keeps
            // declaration order as the tie-breaker.
            .min_by_key(|(idx, rule)| (-rule.priority, *idx))
            .map(|(_, rule)| rule)?;

        let chain: Vec<(ProviderId, BenchmarkRecord)> = std::iter::once(&best.primary)
            .chain(best.fallbacks.iter())
            .filter(|p| !constraints.excludes(p))
            .filter_map(|p| registry.get(p).map(|prof| (p.clone(), prof.benchmarks.clone())))
            .collect();

        if chain.is_empty() {
            // Every provider in the chain was excluded; treat as a miss.
            return None;
        }

        Some(RuleMatch {
            rule_name: best.name.clone(),
            capability: best.preferred_capability(),
            chain,
        })
    }

    /// Hard-constraint filter: rule thresholds and caller ceilings are
    /// checked against the primary's declared benchmarks.
    fn satisfies_constraints(
        &self,
        rule: &RoutingRule,
        constraints: &RouteConstraints,
        registry: &ProviderRegistry,
    ) -> bool {
        let Some(primary) = registry.get(&rule.primary) else {
            return false;
        };
        let bench = &primary.benchmarks;

        if let Some(min_q) = rule.constraints.min_quality {
            if bench.quality < min_q {
                return false;
            }
        }
        if let Some(max_c) = rule.constraints.max_cost {
            if bench.avg_cost > max_c {
                return false;
            }
        }
        if let Some(max_l) = rule.constraints.max_latency_ms {
            if bench.avg_latency_ms > max_l {
                return false;
            }
        }
        if let Some(max_c) = constraints.max_cost {
            if bench.avg_cost > max_c {
                return false;
            }
        }
        if let Some(max_l) = constraints.max_latency_ms {
            if bench.avg_latency_ms > max_l {
                return false;
            }
        }
        true
    }
}
