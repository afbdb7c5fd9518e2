//! Policy store — online-updated per (provider, domain) performance records.
//!
//! Each key holds a running score updated by an exponential moving
//! average over feedback ratings. Records are created lazily on first
//! feedback and never deleted. Updates to the same key are serialized
//! behind a per-key mutex; updates to different keys proceed concurrently.
//! Persistence failures are logged and swallowed — learning degrades to
//! "no learning applied" rather than failing the request path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::classifier::TaskDomain;
use crate::provider::ProviderId;
use crate::rules::RouteConstraints;

/// Errors from the pluggable persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend write failed: {0}")]
    WriteFailed(String),

    #[error("backend read failed: {0}")]
    ReadFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for backend operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Minimal key-value persistence seam behind the policy store.
///
/// The default in-memory backend is sufficient for library use; a durable
/// implementation can back this with any key-value or relational store
/// without touching the learning algorithms.
pub trait StateBackend: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;
}

/// In-memory backend used when no durable store is attached.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for InMemoryBackend {
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::WriteFailed("lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::ReadFailed("lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::ReadFailed("lock poisoned".to_string()))?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Key for one learned performance record.
pub type PolicyKey = (ProviderId, TaskDomain);

/// Learned performance record for one (provider, domain) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyState {
    /// EMA-learned score in [0, 1].
    pub score: f64,
    /// EMA of the binary helpfulness signal.
    pub success_rate: f64,
    /// EMA of observed latency in milliseconds.
    pub avg_latency_ms: f64,
    /// EMA of observed cost per call.
    pub avg_cost: f64,
    /// Number of feedback entries folded in.
    pub sample_count: u64,
    /// min(1, sample_count / min_samples_for_confidence).
    pub confidence: f64,
    /// When this record last changed.
    pub updated_at: DateTime<Utc>,
}

impl PolicyState {
    /// Neutral starting point before any feedback.
    fn fresh() -> Self {
        Self {
            score: 0.5,
            success_rate: 0.5,
            avg_latency_ms: 0.0,
            avg_cost: 0.0,
            sample_count: 0,
            confidence: 0.0,
            updated_at: Utc::now(),
        }
    }
}

/// Immutable record of one completed task's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Assigned id, returned to the caller.
    pub id: String,
    pub provider: ProviderId,
    pub domain: TaskDomain,
    /// Caller rating in [-1, 1]; clamped on ingestion.
    pub rating: f64,
    /// Binary helpfulness signal.
    pub helpful: bool,
    /// Observed latency, when the caller has it.
    pub latency_ms: Option<u64>,
    /// Observed cost, when the caller has it.
    pub cost: Option<f64>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Arbitrary caller metadata.
    pub metadata: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

/// Tunables for the learning rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// EMA learning rate α.
    pub learning_rate: f64,
    /// Samples needed before confidence reaches 1.0.
    pub min_samples_for_confidence: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            min_samples_for_confidence: 10,
        }
    }
}

/// Shared reference to a policy store.
pub type SharedPolicyStore = Arc<PolicyStore>;

/// The learned routing policy plus its feedback audit log.
pub struct PolicyStore {
    config: PolicyConfig,
    /// Write lock taken only for lazy key insertion; updates serialize on
    /// the per-key mutex so different keys never contend.
    states: RwLock<HashMap<PolicyKey, Arc<Mutex<PolicyState>>>>,
    audit_log: Mutex<Vec<FeedbackEntry>>,
    backend: Arc<dyn StateBackend>,
}

impl PolicyStore {
    pub fn new(config: PolicyConfig) -> Self {
        Self::with_backend(config, Arc::new(InMemoryBackend::new()))
    }

    /// Attach a durable backend. Backend failures never propagate.
    pub fn with_backend(config: PolicyConfig, backend: Arc<dyn StateBackend>) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
            audit_log: Mutex::new(Vec::new()),
            backend,
        }
    }

    pub fn shared(self) -> SharedPolicyStore {
        Arc::new(self)
    }

    /// Record one feedback entry: append to the audit log and fold it
    /// into exactly one policy update. Always succeeds and returns the
    /// feedback id.
    pub fn record(&self, mut entry: FeedbackEntry) -> String {
        entry.rating = entry.rating.clamp(-1.0, 1.0);
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();

        self.apply(&entry);

        if let Ok(mut log) = self.audit_log.lock() {
            log.push(entry);
        }
        id
    }

    /// Convenience form of [`record`](Self::record) for the common case.
    pub fn update(&self, provider: &str, domain: TaskDomain, rating: f64, helpful: bool) -> String {
        self.record(FeedbackEntry {
            id: String::new(),
            provider: provider.to_string(),
            domain,
            rating,
            helpful,
            latency_ms: None,
            cost: None,
            notes: None,
            metadata: BTreeMap::new(),
            recorded_at: Utc::now(),
        })
    }

    /// Fold one entry into its key's state under the per-key lock.
    fn apply(&self, entry: &FeedbackEntry) {
        let key = (entry.provider.clone(), entry.domain);
        let cell = self.cell_for(&key);

        let snapshot = {
            let Ok(mut state) = cell.lock() else {
                warn!(provider = %entry.provider, domain = %entry.domain, "policy state lock poisoned; update dropped");
                return;
            };

            let alpha = self.config.learning_rate;
            // Map rating from [-1, 1] to [0, 1] before blending.
            let normalized = (entry.rating + 1.0) / 2.0;
            state.score = (state.score * (1.0 - alpha) + normalized * alpha).clamp(0.0, 1.0);
            let helpful = if entry.helpful { 1.0 } else { 0.0 };
            state.success_rate = state.success_rate * (1.0 - alpha) + helpful * alpha;

            if let Some(latency) = entry.latency_ms {
                state.avg_latency_ms = if state.sample_count == 0 {
                    latency as f64
                } else {
                    state.avg_latency_ms * (1.0 - alpha) + latency as f64 * alpha
                };
            }
            if let Some(cost) = entry.cost {
                state.avg_cost = if state.sample_count == 0 {
                    cost
                } else {
                    state.avg_cost * (1.0 - alpha) + cost * alpha
                };
            }

            state.sample_count += 1;
            state.confidence = (state.sample_count as f64
                / self.config.min_samples_for_confidence as f64)
                .min(1.0);
            state.updated_at = Utc::now();
            state.clone()
        };

        debug!(
            provider = %entry.provider,
            domain = %entry.domain,
            score = snapshot.score,
            confidence = snapshot.confidence,
            samples = snapshot.sample_count,
            "policy updated"
        );

        self.persist(&key, &snapshot);
    }

    /// Best-effort write-through; failures never block the request path.
    fn persist(&self, key: &PolicyKey, state: &PolicyState) {
        let storage_key = format!("policy/{}/{}", key.1, key.0);
        let bytes = match serde_json::to_vec(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "policy serialization failed; skipping persist");
                return;
            }
        };
        if let Err(e) = self.backend.put(&storage_key, &bytes) {
            warn!(key = %storage_key, error = %e, "policy persist failed; continuing without");
        }
    }

    /// Get (or lazily create) the cell for a key.
    fn cell_for(&self, key: &PolicyKey) -> Arc<Mutex<PolicyState>> {
        if let Ok(states) = self.states.read() {
            if let Some(cell) = states.get(key) {
                return cell.clone();
            }
        }
        let mut states = match self.states.write() {
            Ok(states) => states,
            Err(poisoned) => poisoned.into_inner(),
        };
        states
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(PolicyState::fresh())))
            .clone()
    }

    /// Current state for a key, if any feedback has been recorded.
    pub fn get(&self, provider: &str, domain: TaskDomain) -> Option<PolicyState> {
        let states = self.states.read().ok()?;
        let cell = states.get(&(provider.to_string(), domain))?;
        cell.lock().ok().map(|s| s.clone())
    }

    /// All learned states for a domain, in unspecified order.
    pub fn states_for(&self, domain: TaskDomain) -> Vec<(ProviderId, PolicyState)> {
        let Ok(states) = self.states.read() else {
            return Vec::new();
        };
        states
            .iter()
            .filter(|((_, d), _)| *d == domain)
            .filter_map(|((p, _), cell)| cell.lock().ok().map(|s| (p.clone(), s.clone())))
            .collect()
    }

    /// Highest-scoring provider for a domain under the caller's
    /// constraints, dampened by confidence.
    pub fn best_for(
        &self,
        domain: TaskDomain,
        constraints: &RouteConstraints,
    ) -> Option<(ProviderId, PolicyState)> {
        let mut candidates: Vec<(ProviderId, PolicyState)> = self
            .states_for(domain)
            .into_iter()
            .filter(|(p, _)| !constraints.excludes(p))
            .collect();

        candidates.sort_by(|a, b| {
            let score_a = a.1.score * (0.5 + 0.5 * a.1.confidence);
            let score_b = b.1.score * (0.5 + 0.5 * b.1.confidence);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.into_iter().next()
    }

    /// Snapshot of every learned key.
    pub fn snapshot(&self) -> Vec<(PolicyKey, PolicyState)> {
        let Ok(states) = self.states.read() else {
            return Vec::new();
        };
        states
            .iter()
            .filter_map(|(k, cell)| cell.lock().ok().map(|s| (k.clone(), s.clone())))
            .collect()
    }

    /// The append-only feedback audit log.
    pub fn feedback_log(&self) -> Vec<FeedbackEntry> {
        self.audit_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PolicyStore {
        PolicyStore::new(PolicyConfig::default())
    }

    #[test]
    fn test_lazy_creation() {
        let store = store();
        assert!(store.get("alpha", TaskDomain::Software).is_none());
        store.update("alpha", TaskDomain::Software, 1.0, true);
        assert!(store.get("alpha", TaskDomain::Software).is_some());
    }

    #[test]
    fn test_positive_feedback_increases_score() {
        let store = store();
        let mut last = 0.5;
        for _ in 0..20 {
            store.update("alpha", TaskDomain::Software, 1.0, true);
            let state = store.get("alpha", TaskDomain::Software).unwrap();
            assert!(state.score > last, "score must strictly increase");
            assert!(state.score <= 1.0);
            last = state.score;
        }
    }

    #[test]
    fn test_negative_feedback_decreases_score() {
        let store = store();
        let mut last = 0.5;
        for _ in 0..20 {
            store.update("alpha", TaskDomain::Software, -1.0, false);
            let state = store.get("alpha", TaskDomain::Software).unwrap();
            assert!(state.score < last, "score must strictly decrease");
            assert!(state.score >= 0.0);
            last = state.score;
        }
    }

    #[test]
    fn test_confidence_reaches_one_at_min_samples() {
        let store = PolicyStore::new(PolicyConfig {
            learning_rate: 0.1,
            min_samples_for_confidence: 10,
        });
        for i in 1..=9u64 {
            store.update("alpha", TaskDomain::Software, 1.0, true);
            let state = store.get("alpha", TaskDomain::Software).unwrap();
            assert!(state.confidence < 1.0, "confidence hit 1.0 at sample {}", i);
        }
        store.update("alpha", TaskDomain::Software, 1.0, true);
        let state = store.get("alpha", TaskDomain::Software).unwrap();
        assert_eq!(state.confidence, 1.0);
        assert_eq!(state.sample_count, 10);
    }

    #[test]
    fn test_rating_clamped() {
        let store = store();
        store.update("alpha", TaskDomain::Software, 5.0, true);
        let state = store.get("alpha", TaskDomain::Software).unwrap();
        // Clamped rating of 1.0 normalizes to 1.0; one EMA step from 0.5.
        assert!((state.score - 0.55).abs() < 1e-9);
        let log = store.feedback_log();
        assert_eq!(log[0].rating, 1.0);
    }

    #[test]
    fn test_keys_are_independent() {
        let store = store();
        store.update("alpha", TaskDomain::Software, 1.0, true);
        store.update("alpha", TaskDomain::Content, -1.0, false);

        let sw = store.get("alpha", TaskDomain::Software).unwrap();
        let ct = store.get("alpha", TaskDomain::Content).unwrap();
        assert!(sw.score > 0.5);
        assert!(ct.score < 0.5);
    }

    #[test]
    fn test_best_for_prefers_confident_high_score() {
        let store = store();
        // alpha: many positive samples; beta: one positive sample.
        for _ in 0..10 {
            store.update("alpha", TaskDomain::Software, 1.0, true);
        }
        store.update("beta", TaskDomain::Software, 1.0, true);

        let (best, _) = store
            .best_for(TaskDomain::Software, &RouteConstraints::default())
            .unwrap();
        assert_eq!(best, "alpha");
    }

    #[test]
    fn test_best_for_respects_exclusions() {
        let store = store();
        for _ in 0..5 {
            store.update("alpha", TaskDomain::Software, 1.0, true);
        }
        store.update("beta", TaskDomain::Software, 0.5, true);

        let constraints = RouteConstraints {
            excluded_providers: vec!["alpha".to_string()],
            ..Default::default()
        };
        let (best, _) = store.best_for(TaskDomain::Software, &constraints).unwrap();
        assert_eq!(best, "beta");
    }

    #[test]
    fn test_audit_log_appends() {
        let store = store();
        let id1 = store.update("alpha", TaskDomain::Software, 1.0, true);
        let id2 = store.update("beta", TaskDomain::Content, -0.5, false);

        let log = store.feedback_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, id1);
        assert_eq!(log[1].id, id2);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_latency_and_cost_folded() {
        let store = store();
        store.record(FeedbackEntry {
            id: String::new(),
            provider: "alpha".to_string(),
            domain: TaskDomain::Software,
            rating: 1.0,
            helpful: true,
            latency_ms: Some(400),
            cost: Some(0.02),
            notes: None,
            metadata: BTreeMap::new(),
            recorded_at: Utc::now(),
        });
        let state = store.get("alpha", TaskDomain::Software).unwrap();
        assert_eq!(state.avg_latency_ms, 400.0);
        assert_eq!(state.avg_cost, 0.02);
    }

    #[test]
    fn test_concurrent_updates_same_key_none_lost() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    store.update("alpha", TaskDomain::Software, 1.0, true);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let state = store.get("alpha", TaskDomain::Software).unwrap();
        assert_eq!(state.sample_count, 400);
        assert_eq!(state.confidence, 1.0);
    }

    #[test]
    fn test_backend_write_through() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = PolicyStore::with_backend(PolicyConfig::default(), backend.clone());
        store.update("alpha", TaskDomain::Software, 1.0, true);

        let scanned = backend.scan("policy/software/").unwrap();
        assert_eq!(scanned.len(), 1);
        let state: PolicyState = serde_json::from_slice(&scanned[0].1).unwrap();
        assert_eq!(state.sample_count, 1);
    }
}
