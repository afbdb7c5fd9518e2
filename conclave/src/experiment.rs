//! Experiment manager — weighted A/B variants with recorded outcomes.
//!
//! Experiments are declared with weighted variants, assign traffic by a
//! weighted draw, accumulate impressions and conversions, and conclude
//! with a deterministic winner. Declaration order breaks winner ties.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors raised by experiment operations.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("experiment not found: {0}")]
    NotFound(String),

    #[error("experiment {0} needs at least two variants")]
    TooFewVariants(String),

    #[error("variant weights for {name} sum to {sum:.3}, expected 1.0")]
    InvalidWeights { name: String, sum: f64 },

    #[error("variant not found: {experiment}/{variant}")]
    UnknownVariant { experiment: String, variant: String },

    #[error("experiment {0} is already completed")]
    AlreadyCompleted(String),
}

/// Result type for experiment operations.
pub type ExperimentResult<T> = Result<T, ExperimentError>;

/// Lifecycle of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Active,
    Paused,
    Completed,
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Declaration of one variant, before any traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSpec {
    pub name: String,
    /// Traffic share in [0, 1]. Omit on every variant for an even split.
    pub weight: Option<f64>,
    /// Opaque per-variant configuration handed back on assignment.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// A live variant with its accumulated counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub config: BTreeMap<String, String>,
    pub impressions: u64,
    pub conversions: u64,
    /// Sum of conversion scores, for the average at conclusion.
    pub score_total: f64,
}

impl Variant {
    pub fn conversion_rate(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.conversions as f64 / self.impressions as f64
        }
    }

    pub fn avg_score(&self) -> f64 {
        if self.conversions == 0 {
            0.0
        } else {
            self.score_total / self.conversions as f64
        }
    }

    /// Ranking metric at conclusion.
    fn combined(&self) -> f64 {
        0.6 * self.conversion_rate() + 0.4 * self.avg_score()
    }
}

/// One experiment, its variants in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ExperimentStatus,
    pub variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
    pub concluded_at: Option<DateTime<Utc>>,
    /// Winning variant id once concluded.
    pub winner: Option<String>,
}

/// Verdict produced by [`ExperimentManager::conclude`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentVerdict {
    pub experiment_id: String,
    pub winner: Variant,
    /// Winner's combined metric: 0.6·conversion rate + 0.4·average score.
    pub combined_score: f64,
    pub total_impressions: u64,
}

/// In-memory experiment registry; insertion order is preserved.
#[derive(Debug, Default)]
pub struct ExperimentManager {
    experiments: Mutex<Vec<Experiment>>,
}

impl ExperimentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an experiment from variant declarations.
    ///
    /// Weights may be omitted on every variant for an even split; when
    /// given they must cover every variant and sum to 1.0 (within a small
    /// tolerance).
    pub fn create(
        &self,
        name: &str,
        description: Option<String>,
        specs: Vec<VariantSpec>,
    ) -> ExperimentResult<String> {
        if specs.len() < 2 {
            return Err(ExperimentError::TooFewVariants(name.to_string()));
        }

        let weights: Vec<f64> = if specs.iter().all(|s| s.weight.is_none()) {
            let even = 1.0 / specs.len() as f64;
            vec![even; specs.len()]
        } else {
            let explicit: Vec<f64> = specs.iter().map(|s| s.weight.unwrap_or(0.0)).collect();
            let sum: f64 = explicit.iter().sum();
            if (sum - 1.0).abs() > 1e-6 {
                return Err(ExperimentError::InvalidWeights {
                    name: name.to_string(),
                    sum,
                });
            }
            explicit
        };

        let variants: Vec<Variant> = specs
            .into_iter()
            .zip(weights)
            .map(|(spec, weight)| Variant {
                id: Uuid::new_v4().to_string(),
                name: spec.name,
                weight,
                config: spec.config,
                impressions: 0,
                conversions: 0,
                score_total: 0.0,
            })
            .collect();

        let id = Uuid::new_v4().to_string();
        let experiment = Experiment {
            id: id.clone(),
            name: name.to_string(),
            description,
            status: ExperimentStatus::Active,
            variants,
            created_at: Utc::now(),
            concluded_at: None,
            winner: None,
        };

        info!(experiment = %id, name, variants = experiment.variants.len(), "experiment created");
        self.with_lock(|exps| exps.push(experiment));
        Ok(id)
    }

    /// Assign a variant by weighted draw and count the impression.
    ///
    /// Returns `Ok(None)` when the experiment exists but is not active;
    /// a missing experiment is an error.
    pub fn assign<R: Rng>(
        &self,
        experiment_id: &str,
        rng: &mut R,
    ) -> ExperimentResult<Option<Variant>> {
        let draw: f64 = rng.gen();
        self.with_experiment(experiment_id, |exp| {
            if exp.status != ExperimentStatus::Active {
                return Ok(None);
            }
            // Weighted cumulative scan; the last variant absorbs any
            // floating-point remainder.
            let mut cumulative = 0.0;
            let last = exp.variants.len() - 1;
            let idx = exp
                .variants
                .iter()
                .enumerate()
                .find_map(|(i, v)| {
                    cumulative += v.weight;
                    (draw < cumulative).then_some(i)
                })
                .unwrap_or(last);
            exp.variants[idx].impressions += 1;
            Ok(Some(exp.variants[idx].clone()))
        })?
    }

    /// Record a conversion against a variant id with a quality score in
    /// [0, 1].
    ///
    /// Accepted on paused experiments too; outcomes of traffic assigned
    /// before the pause still count.
    pub fn record_conversion(
        &self,
        experiment_id: &str,
        variant_id: &str,
        score: f64,
    ) -> ExperimentResult<()> {
        let score = score.clamp(0.0, 1.0);
        self.with_experiment(experiment_id, |exp| {
            if exp.status == ExperimentStatus::Completed {
                warn!(experiment = %exp.id, variant = variant_id, "conversion on completed experiment ignored");
                return Ok(());
            }
            let variant = exp
                .variants
                .iter_mut()
                .find(|v| v.id == variant_id)
                .ok_or_else(|| ExperimentError::UnknownVariant {
                    experiment: exp.id.clone(),
                    variant: variant_id.to_string(),
                })?;
            variant.conversions += 1;
            variant.score_total += score;
            Ok(())
        })?
    }

    /// Conclude the experiment and freeze its winner.
    ///
    /// Winner is the variant maximizing 0.6·conversion rate + 0.4·average
    /// score; an exact tie goes to the first-declared variant.
    pub fn conclude(&self, experiment_id: &str) -> ExperimentResult<ExperimentVerdict> {
        self.with_experiment(experiment_id, |exp| {
            if exp.status == ExperimentStatus::Completed {
                return Err(ExperimentError::AlreadyCompleted(exp.id.clone()));
            }

            let mut best_idx = 0;
            for (i, v) in exp.variants.iter().enumerate() {
                if v.combined() > exp.variants[best_idx].combined() {
                    best_idx = i;
                }
            }
            let winner = exp.variants[best_idx].clone();

            exp.status = ExperimentStatus::Completed;
            exp.concluded_at = Some(Utc::now());
            exp.winner = Some(winner.id.clone());

            let total_impressions = exp.variants.iter().map(|v| v.impressions).sum();
            info!(
                experiment = %exp.id,
                winner = %winner.name,
                combined = winner.combined(),
                total_impressions,
                "experiment concluded"
            );

            Ok(ExperimentVerdict {
                experiment_id: exp.id.clone(),
                combined_score: winner.combined(),
                winner,
                total_impressions,
            })
        })?
    }

    /// Pause assignment without discarding counters.
    pub fn pause(&self, experiment_id: &str) -> ExperimentResult<()> {
        self.set_status(experiment_id, ExperimentStatus::Paused)
    }

    /// Resume a paused experiment.
    pub fn resume(&self, experiment_id: &str) -> ExperimentResult<()> {
        self.set_status(experiment_id, ExperimentStatus::Active)
    }

    fn set_status(&self, experiment_id: &str, status: ExperimentStatus) -> ExperimentResult<()> {
        self.with_experiment(experiment_id, |exp| {
            if exp.status == ExperimentStatus::Completed {
                return Err(ExperimentError::AlreadyCompleted(exp.id.clone()));
            }
            exp.status = status;
            Ok(())
        })?
    }

    /// Look up an experiment snapshot by id.
    pub fn get(&self, experiment_id: &str) -> Option<Experiment> {
        self.with_lock(|exps| exps.iter().find(|e| e.id == experiment_id).cloned())
    }

    /// All experiments, optionally filtered by status, in creation order.
    pub fn list(&self, status: Option<ExperimentStatus>) -> Vec<Experiment> {
        self.with_lock(|exps| {
            exps.iter()
                .filter(|e| status.map(|s| e.status == s).unwrap_or(true))
                .cloned()
                .collect()
        })
    }

    fn with_lock<T>(&self, f: impl FnOnce(&mut Vec<Experiment>) -> T) -> T {
        let mut guard = match self.experiments.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn with_experiment<T>(
        &self,
        experiment_id: &str,
        f: impl FnOnce(&mut Experiment) -> T,
    ) -> ExperimentResult<T> {
        self.with_lock(|exps| {
            let exp = exps
                .iter_mut()
                .find(|e| e.id == experiment_id)
                .ok_or_else(|| ExperimentError::NotFound(experiment_id.to_string()))?;
            Ok(f(exp))
        })
    }
}
