//! Experiment lifecycle through the engine — seeded assignment,
//! conversion tracking, and conclusion.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use conclave::{
    BenchmarkRecord, Capability, EngineConfig, ExperimentStatus, ProviderAdapter,
    ProviderProfile, ProviderRegistry, ProviderRequest, ProviderResponse, ProviderResult,
    RoutingEngine, RuleTable, TaskDomain, VariantSpec,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

struct NullAdapter;

#[async_trait]
impl ProviderAdapter for NullAdapter {
    async fn invoke(&self, _request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        Ok(ProviderResponse {
            content: String::new(),
            units: 0,
            cost: 0.0,
            latency_ms: 0,
        })
    }
}

fn engine() -> RoutingEngine {
    let profiles = ["alpha", "beta", "gamma"]
        .iter()
        .map(|id| ProviderProfile {
            id: id.to_string(),
            display_name: id.to_string(),
            capabilities: vec![Capability::Reasoning],
            specializations: vec![TaskDomain::General],
            benchmarks: BenchmarkRecord {
                quality: 0.7,
                avg_cost: 0.01,
                avg_latency_ms: 100,
            },
        })
        .collect();
    let registry = ProviderRegistry::new(profiles, "alpha".to_string()).unwrap();
    RoutingEngine::new(EngineConfig::default(), registry, RuleTable::empty(), Arc::new(NullAdapter))
        .with_seed(1234)
}

fn variant(name: &str, weight: Option<f64>) -> VariantSpec {
    VariantSpec {
        name: name.to_string(),
        weight,
        config: BTreeMap::new(),
    }
}

#[test]
fn test_seeded_assignment_follows_weights() {
    init_tracing();
    let engine = engine();
    let id = engine
        .create_experiment(
            "route-jitter",
            None,
            vec![variant("control", Some(0.5)), variant("treatment", Some(0.5))],
        )
        .unwrap();

    let mut control = 0u32;
    for _ in 0..1000 {
        let v = engine.assign_variant(&id).unwrap().unwrap();
        if v.name == "control" {
            control += 1;
        }
    }
    assert!(
        (450..=550).contains(&control),
        "control drew {} of 1000",
        control
    );
}

#[test]
fn test_skewed_weights_respected() {
    let engine = engine();
    let id = engine
        .create_experiment(
            "skew",
            None,
            vec![variant("heavy", Some(0.9)), variant("light", Some(0.1))],
        )
        .unwrap();

    let mut heavy = 0u32;
    for _ in 0..1000 {
        if engine.assign_variant(&id).unwrap().unwrap().name == "heavy" {
            heavy += 1;
        }
    }
    assert!((850..=950).contains(&heavy), "heavy drew {} of 1000", heavy);
}

#[test]
fn test_full_lifecycle_create_convert_conclude() {
    init_tracing();
    let engine = engine();
    let id = engine
        .create_experiment(
            "prompt-style",
            Some("terse vs verbose prompts".to_string()),
            vec![variant("terse", None), variant("verbose", None)],
        )
        .unwrap();
    let experiments = engine.list_experiments(None);
    let variant_id = |name: &str| {
        experiments[0]
            .variants
            .iter()
            .find(|v| v.name == name)
            .unwrap()
            .id
            .clone()
    };
    let terse = variant_id("terse");
    let verbose = variant_id("verbose");

    // Drive traffic, then convert "verbose" at a higher rate and score.
    for _ in 0..200 {
        engine.assign_variant(&id).unwrap();
    }
    for _ in 0..20 {
        engine.record_conversion(&id, &terse, 0.5).unwrap();
    }
    for _ in 0..40 {
        engine.record_conversion(&id, &verbose, 0.9).unwrap();
    }

    let verdict = engine.conclude_experiment(&id).unwrap();
    assert_eq!(verdict.winner.name, "verbose");
    assert_eq!(verdict.total_impressions, 200);

    let completed = engine.list_experiments(Some(ExperimentStatus::Completed));
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].winner.as_ref(), Some(&verdict.winner.id));

    // Concluded experiments no longer assign.
    assert!(engine.assign_variant(&id).unwrap().is_none());
}

#[test]
fn test_pause_stops_assignment_until_resume() {
    let engine = engine();
    let id = engine
        .create_experiment("pausable", None, vec![variant("a", None), variant("b", None)])
        .unwrap();

    assert!(engine.assign_variant(&id).unwrap().is_some());
    engine.pause_experiment(&id).unwrap();
    assert!(engine.assign_variant(&id).unwrap().is_none());
    engine.resume_experiment(&id).unwrap();
    assert!(engine.assign_variant(&id).unwrap().is_some());
}

#[test]
fn test_unknown_experiment_is_an_error() {
    let engine = engine();
    assert!(engine.assign_variant("missing").is_err());
    assert!(engine.conclude_experiment("missing").is_err());
}
