//! Routing engine — the crate's front door.
//!
//! Ties together classification, rule/policy routing, execution with
//! fallback, feedback learning, experiments, and consensus sessions
//! behind one handle that is cheap to share across tasks.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::classifier::{TaskClassifier, TaskDomain, TaskProfile};
use crate::config::EngineConfig;
use crate::consensus::{
    Committee, CommitteeError, ConsensusError, ConsensusOrchestrator, ConsensusOutcome,
};
use crate::experiment::{
    Experiment, ExperimentError, ExperimentManager, ExperimentStatus, ExperimentVerdict, Variant,
    VariantSpec,
};
use crate::policy::{FeedbackEntry, PolicyKey, PolicyState, PolicyStore, SharedPolicyStore};
use crate::provider::{ProviderAdapter, ProviderId, ProviderRequest, ProviderResponse};
use crate::registry::ProviderRegistry;
use crate::resolver::{RouteResolver, RoutingDecision};
use crate::rules::{RouteConstraints, RuleTable};

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("every candidate provider failed: {}", attempted.join(", "))]
    AllProvidersFailed { attempted: Vec<ProviderId> },

    #[error(transparent)]
    Committee(#[from] CommitteeError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Experiment(#[from] ExperimentError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Outcome of a routed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// The routing decision that drove execution.
    pub decision: RoutingDecision,
    /// Provider that actually answered (may be a fallback).
    pub provider: ProviderId,
    /// The provider's response.
    pub response: ProviderResponse,
    /// Number of providers tried, including the one that answered.
    pub attempts: u32,
}

/// Shared handle to a routing engine.
pub type SharedEngine = Arc<RoutingEngine>;

/// The adaptive routing engine.
pub struct RoutingEngine {
    config: EngineConfig,
    registry: ProviderRegistry,
    rules: RuleTable,
    classifier: TaskClassifier,
    resolver: RouteResolver,
    policy: SharedPolicyStore,
    experiments: ExperimentManager,
    adapter: Arc<dyn ProviderAdapter>,
    rng: Mutex<ChaCha8Rng>,
}

impl RoutingEngine {
    pub fn new(
        config: EngineConfig,
        registry: ProviderRegistry,
        rules: RuleTable,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        let policy = PolicyStore::new(config.policy.clone()).shared();
        let resolver = RouteResolver::new(config.resolver.clone());
        Self {
            classifier: TaskClassifier::new(),
            resolver,
            policy,
            experiments: ExperimentManager::new(),
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
            config,
            registry,
            rules,
            adapter,
        }
    }

    /// Fix the exploration seed; assignment and exploration draws become
    /// reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(ChaCha8Rng::seed_from_u64(seed));
        self
    }

    pub fn shared(self) -> SharedEngine {
        Arc::new(self)
    }

    /// Classify a task and resolve its route without executing anything.
    /// Never fails.
    pub fn select_route(
        &self,
        text: &str,
        hint: Option<TaskDomain>,
        constraints: &RouteConstraints,
    ) -> (TaskProfile, RoutingDecision) {
        let profile = self.classifier.classify(text, hint);
        let decision = {
            let mut rng = self.lock_rng();
            self.resolver.resolve(
                &profile,
                constraints,
                &self.rules,
                &self.policy,
                &self.registry,
                &mut *rng,
            )
        };
        (profile, decision)
    }

    /// Route and execute a task, walking the fallback chain on failure.
    pub async fn execute(
        &self,
        text: &str,
        hint: Option<TaskDomain>,
        constraints: &RouteConstraints,
    ) -> EngineResult<ExecutionReport> {
        let (profile, decision) = self.select_route(text, hint, constraints);
        self.execute_route(text, &profile, decision).await
    }

    /// Execute against an already-resolved route.
    pub async fn execute_route(
        &self,
        text: &str,
        profile: &TaskProfile,
        decision: RoutingDecision,
    ) -> EngineResult<ExecutionReport> {
        let call_timeout = Duration::from_millis(profile.max_latency_ms);
        let chain: Vec<ProviderId> = std::iter::once(decision.provider.clone())
            .chain(decision.alternatives.iter().map(|a| a.provider.clone()))
            .collect();

        let mut attempts = 0u32;
        for provider in &chain {
            attempts += 1;
            let request = ProviderRequest::new(provider, text);
            match timeout(call_timeout, self.adapter.invoke(&request)).await {
                Ok(Ok(response)) => {
                    info!(
                        provider = %provider,
                        domain = %profile.domain,
                        attempts,
                        latency_ms = response.latency_ms,
                        "task executed"
                    );
                    self.note_outcome(provider, profile.domain, true, Some(&response));
                    return Ok(ExecutionReport {
                        decision,
                        provider: provider.clone(),
                        response,
                        attempts,
                    });
                }
                Ok(Err(e)) => {
                    warn!(provider = %provider, error = %e, "provider call failed; trying next");
                    self.note_outcome(provider, profile.domain, false, None);
                }
                Err(_) => {
                    warn!(provider = %provider, timeout_ms = profile.max_latency_ms, "provider call timed out; trying next");
                    self.note_outcome(provider, profile.domain, false, None);
                }
            }
        }

        Err(EngineError::AllProvidersFailed { attempted: chain })
    }

    /// Record caller feedback for a completed task. Always succeeds; the
    /// rating is clamped to [-1, 1].
    pub fn record_feedback(
        &self,
        provider: &str,
        domain: TaskDomain,
        rating: f64,
        helpful: bool,
        notes: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> String {
        self.policy.record(FeedbackEntry {
            id: String::new(),
            provider: provider.to_string(),
            domain,
            rating,
            helpful,
            latency_ms: None,
            cost: None,
            notes,
            metadata,
            recorded_at: Utc::now(),
        })
    }

    /// Run a consensus session for a question.
    ///
    /// A non-empty `optional_participants` list restricts which providers
    /// may compete for the open seats. Committee assembly failures are
    /// errors; an aborted session is a normal outcome carried in the
    /// [`ConsensusOutcome`].
    pub async fn start_consensus(
        &self,
        question: &str,
        hint: Option<TaskDomain>,
        required_participants: &[ProviderId],
        optional_participants: &[ProviderId],
        expected_shape: Option<&str>,
    ) -> EngineResult<ConsensusOutcome> {
        let profile = self.classifier.classify(question, hint);
        let committee = Committee::assemble(
            &self.registry,
            profile.domain,
            required_participants,
            optional_participants,
            &self.policy,
        )?;
        let orchestrator =
            ConsensusOrchestrator::new(self.config.consensus.clone(), self.adapter.clone());
        let outcome = orchestrator.run(question, &committee, expected_shape).await?;

        // Fold the session outcome into the policy, one entry per seat
        // that survived to the final round.
        if let Some(last) = outcome.session.latest_round() {
            let rating = (outcome.quality_score / 50.0 - 1.0).clamp(-1.0, 1.0);
            for response in &last.responses {
                self.policy.record(FeedbackEntry {
                    id: String::new(),
                    provider: response.provider.clone(),
                    domain: profile.domain,
                    rating,
                    helpful: outcome.consensus_reached,
                    latency_ms: Some(response.latency_ms),
                    cost: Some(response.cost),
                    notes: None,
                    metadata: BTreeMap::new(),
                    recorded_at: Utc::now(),
                });
            }
        }
        Ok(outcome)
    }

    /// Create an experiment.
    pub fn create_experiment(
        &self,
        name: &str,
        description: Option<String>,
        variants: Vec<VariantSpec>,
    ) -> EngineResult<String> {
        Ok(self.experiments.create(name, description, variants)?)
    }

    /// Assign a variant for one unit of traffic.
    pub fn assign_variant(&self, experiment_id: &str) -> EngineResult<Option<Variant>> {
        let mut rng = self.lock_rng();
        Ok(self.experiments.assign(experiment_id, &mut *rng)?)
    }

    /// Record an experiment conversion against a variant id.
    pub fn record_conversion(
        &self,
        experiment_id: &str,
        variant_id: &str,
        score: f64,
    ) -> EngineResult<()> {
        Ok(self
            .experiments
            .record_conversion(experiment_id, variant_id, score)?)
    }

    /// Conclude an experiment and return the verdict.
    pub fn conclude_experiment(&self, experiment_id: &str) -> EngineResult<ExperimentVerdict> {
        Ok(self.experiments.conclude(experiment_id)?)
    }

    pub fn pause_experiment(&self, experiment_id: &str) -> EngineResult<()> {
        Ok(self.experiments.pause(experiment_id)?)
    }

    pub fn resume_experiment(&self, experiment_id: &str) -> EngineResult<()> {
        Ok(self.experiments.resume(experiment_id)?)
    }

    pub fn list_experiments(&self, status: Option<ExperimentStatus>) -> Vec<Experiment> {
        self.experiments.list(status)
    }

    /// Snapshot of every learned policy record.
    pub fn policy_snapshot(&self) -> Vec<(PolicyKey, PolicyState)> {
        self.policy.snapshot()
    }

    /// The feedback audit log.
    pub fn feedback_log(&self) -> Vec<FeedbackEntry> {
        self.policy.feedback_log()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Implicit learning signal from execution outcomes. Ratings are
    /// gentler than explicit caller feedback.
    fn note_outcome(
        &self,
        provider: &str,
        domain: TaskDomain,
        success: bool,
        response: Option<&ProviderResponse>,
    ) {
        let rating = if success { 0.2 } else { -0.4 };
        self.policy.record(FeedbackEntry {
            id: String::new(),
            provider: provider.to_string(),
            domain,
            rating,
            helpful: success,
            latency_ms: response.map(|r| r.latency_ms),
            cost: response.map(|r| r.cost),
            notes: None,
            metadata: BTreeMap::new(),
            recorded_at: Utc::now(),
        });
    }

    fn lock_rng(&self) -> std::sync::MutexGuard<'_, ChaCha8Rng> {
        match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Capability;
    use crate::provider::{ProviderError, ProviderResult};
    use crate::registry::{BenchmarkRecord, ProviderProfile};
    use async_trait::async_trait;

    struct EchoAdapter;

    #[async_trait]
    impl ProviderAdapter for EchoAdapter {
        async fn invoke(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
            Ok(ProviderResponse {
                content: format!("{}: ok", request.provider),
                units: 10,
                cost: 0.001,
                latency_ms: 5,
            })
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl ProviderAdapter for FailingAdapter {
        async fn invoke(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
            Err(ProviderError::Unavailable(request.provider.clone()))
        }
    }

    fn registry() -> ProviderRegistry {
        let mk = |id: &str, quality: f64| ProviderProfile {
            id: id.to_string(),
            display_name: id.to_string(),
            capabilities: vec![
                Capability::CodeGeneration,
                Capability::Reasoning,
                Capability::Writing,
            ],
            specializations: vec![TaskDomain::Software],
            benchmarks: BenchmarkRecord {
                quality,
                avg_cost: 0.01,
                avg_latency_ms: 100,
            },
        };
        ProviderRegistry::new(
            vec![mk("alpha", 0.9), mk("beta", 0.7), mk("gamma", 0.6)],
            "gamma".to_string(),
        )
        .unwrap()
    }

    fn engine(adapter: Arc<dyn ProviderAdapter>) -> RoutingEngine {
        let mut config = EngineConfig::default();
        config.resolver.exploration_rate = 0.0;
        RoutingEngine::new(config, registry(), RuleTable::empty(), adapter).with_seed(7)
    }

    #[test]
    fn test_select_route_never_fails() {
        let engine = engine(Arc::new(EchoAdapter));
        let (profile, decision) =
            engine.select_route("fix the failing build", None, &RouteConstraints::default());
        assert_eq!(profile.domain, TaskDomain::Software);
        assert!(!decision.provider.is_empty());
    }

    #[tokio::test]
    async fn test_execute_happy_path() {
        let engine = engine(Arc::new(EchoAdapter));
        let report = engine
            .execute("fix the failing build", None, &RouteConstraints::default())
            .await
            .unwrap();
        assert_eq!(report.attempts, 1);
        assert!(report.response.content.ends_with("ok"));
    }

    #[tokio::test]
    async fn test_execute_all_fail() {
        let engine = engine(Arc::new(FailingAdapter));
        let err = engine
            .execute("fix the failing build", None, &RouteConstraints::default())
            .await
            .unwrap_err();
        match err {
            EngineError::AllProvidersFailed { attempted } => {
                assert!(!attempted.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        // Failures leave an implicit negative signal behind.
        assert!(!engine.policy_snapshot().is_empty());
    }

    #[test]
    fn test_record_feedback_returns_id() {
        let engine = engine(Arc::new(EchoAdapter));
        let id = engine.record_feedback(
            "alpha",
            TaskDomain::Software,
            0.8,
            true,
            None,
            BTreeMap::new(),
        );
        assert!(!id.is_empty());
        assert_eq!(engine.feedback_log().len(), 1);
    }

    #[test]
    fn test_experiment_passthrough() {
        let engine = engine(Arc::new(EchoAdapter));
        let id = engine
            .create_experiment(
                "exp",
                None,
                vec![
                    VariantSpec {
                        name: "a".to_string(),
                        weight: None,
                        config: BTreeMap::new(),
                    },
                    VariantSpec {
                        name: "b".to_string(),
                        weight: None,
                        config: BTreeMap::new(),
                    },
                ],
            )
            .unwrap();
        assert!(engine.assign_variant(&id).unwrap().is_some());
        assert_eq!(engine.list_experiments(None).len(), 1);
    }
}
