//! Consensus orchestrator — runs multi-round deliberation to completion.
//!
//! Each round fans the question out to every committee seat with a
//! per-call timeout. Seats that fail or time out are excluded from that
//! round's tally only and are dispatched to again next round; a round
//! with zero responses aborts the session and falls back to a single
//! direct answer. Between rounds, peers score each other's responses
//! and agreement is measured against the consensus threshold.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::consensus::committee::{Committee, CommitteeSeat};
use crate::consensus::extract;
use crate::consensus::state::{
    ConsensusSession, ConversationRound, ParticipantResponse, SessionPhase, TransitionError,
};
use crate::provider::{ProviderAdapter, ProviderRequest};

/// Errors from the consensus orchestrator.
///
/// An aborted session is not an error; it is a completed session whose
/// outcome says so.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Tunables for a consensus run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Maximum deliberation rounds.
    pub max_rounds: u32,
    /// Per-call timeout for deliberation and synthesis calls.
    pub round_timeout: Duration,
    /// Per-call timeout for peer-vote calls.
    pub vote_timeout: Duration,
    /// Agreement score in [0, 1] that ends deliberation early.
    pub consensus_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            round_timeout: Duration::from_secs(120),
            vote_timeout: Duration::from_secs(30),
            consensus_threshold: 0.8,
        }
    }
}

/// Final outcome of a consensus session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    /// The full session record, including round and transition history.
    pub session: ConsensusSession,
    /// Final answer: synthesized, best-voted, or the abort fallback.
    pub answer: String,
    /// Whether the committee converged above the threshold.
    pub consensus_reached: bool,
    /// Quality score in [0, 100].
    pub quality_score: f64,
    /// Total cost across every call made.
    pub total_cost: f64,
}

/// Runs consensus sessions against a provider adapter.
pub struct ConsensusOrchestrator {
    config: ConsensusConfig,
    adapter: Arc<dyn ProviderAdapter>,
}

impl ConsensusOrchestrator {
    pub fn new(config: ConsensusConfig, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self { config, adapter }
    }

    /// Deliberate a question with an assembled committee.
    ///
    /// Always produces an outcome; a provider failure drops that seat
    /// from the current round's tally only, and a fully failed round
    /// aborts with a single-provider fallback answer.
    pub async fn run(
        &self,
        question: &str,
        committee: &Committee,
        expected_shape: Option<&str>,
    ) -> Result<ConsensusOutcome, ConsensusError> {
        let mut session = ConsensusSession::new(question, self.config.max_rounds);
        let total_seats = committee.len();
        let mut total_cost = 0.0;
        let mut focus_areas: Vec<String> = Vec::new();

        info!(
            session = %session.id,
            seats = total_seats,
            max_rounds = self.config.max_rounds,
            "consensus session started"
        );

        loop {
            session.transition(SessionPhase::RoundInProgress, "deliberation round started")?;
            let round_no = session.current_round;
            let started_at = Utc::now();

            let mut responses = self
                .fan_out(question, committee.seats(), &session, &focus_areas, expected_shape)
                .await;
            total_cost += responses.iter().map(|r| r.cost).sum::<f64>();

            // A missed round excludes a seat from this tally only; every
            // seat is dispatched to again next round.
            let responders: Vec<&CommitteeSeat> = committee
                .seats()
                .iter()
                .filter(|seat| {
                    let answered = responses
                        .iter()
                        .any(|r| r.participant_id == seat.participant_id);
                    if !answered {
                        warn!(
                            session = %session.id,
                            seat = %seat.participant_id,
                            provider = %seat.provider,
                            round = round_no,
                            "participant missed this round"
                        );
                    }
                    answered
                })
                .collect();

            if responses.is_empty() {
                session.transition(SessionPhase::Aborted, "every participant failed")?;
                let (answer, cost) = self.abort_fallback(question, committee).await;
                total_cost += cost;
                warn!(session = %session.id, "session aborted; fallback answer issued");
                return Ok(ConsensusOutcome {
                    session,
                    answer,
                    consensus_reached: false,
                    quality_score: 0.0,
                    total_cost,
                });
            }

            let is_final_round = round_no >= self.config.max_rounds;
            if !is_final_round && responders.len() > 1 {
                let vote_cost = self.collect_votes(&responders, &mut responses, &session).await;
                total_cost += vote_cost;
            }

            let consensus_score = Self::measure_consensus(&responses);
            session.rounds.push(ConversationRound {
                round: round_no,
                responses,
                consensus_score,
                started_at,
            });
            session.transition(SessionPhase::ConsensusCheck, "round responses collected")?;

            debug!(
                session = %session.id,
                round = round_no,
                consensus = consensus_score,
                responders = session
                    .latest_round()
                    .map(|r| r.responses.len())
                    .unwrap_or(0),
                "consensus check"
            );

            if consensus_score >= self.config.consensus_threshold {
                session.transition(SessionPhase::Finalizing, "consensus threshold met")?;
                break;
            }
            if is_final_round {
                session.transition(SessionPhase::Finalizing, "max rounds reached")?;
                break;
            }

            // Below threshold with rounds left: compute focus areas and
            // loop; the next iteration transitions back into a round.
            focus_areas = Self::refinement_areas(&session);
            session.refinement_history.push(focus_areas.clone());
        }

        let (answer, synth_cost) = self.synthesize(question, committee, &session, expected_shape).await;
        total_cost += synth_cost;
        session.transition(SessionPhase::Complete, "final answer produced")?;

        let consensus_reached = session
            .latest_round()
            .map(|r| r.consensus_score >= self.config.consensus_threshold)
            .unwrap_or(false);
        let final_responders = session
            .latest_round()
            .map(|r| r.responses.len())
            .unwrap_or(0);
        let quality_score = Self::quality_score(&session, final_responders, total_seats);

        info!(
            session = %session.id,
            rounds = session.rounds.len(),
            consensus_reached,
            quality = quality_score,
            cost = total_cost,
            "consensus session complete"
        );

        Ok(ConsensusOutcome {
            session,
            answer,
            consensus_reached,
            quality_score,
            total_cost,
        })
    }

    /// Fan the deliberation prompt out to every seat in parallel.
    async fn fan_out(
        &self,
        question: &str,
        seats: &[CommitteeSeat],
        session: &ConsensusSession,
        focus_areas: &[String],
        expected_shape: Option<&str>,
    ) -> Vec<ParticipantResponse> {
        let calls = seats.iter().map(|seat| {
            let prompt = self.deliberation_prompt(question, seat, session, focus_areas, expected_shape);
            async move {
                let request = ProviderRequest::new(&seat.provider, &prompt)
                    .with_system(&seat.persona.framing());
                match timeout(self.config.round_timeout, self.adapter.invoke(&request)).await {
                    Ok(Ok(response)) => Some(ParticipantResponse {
                        participant_id: seat.participant_id.clone(),
                        provider: seat.provider.clone(),
                        confidence: extract::extract_confidence(&response.content),
                        suggestions: extract::extract_suggestions(&response.content),
                        concerns: extract::extract_concerns(&response.content),
                        votes: Default::default(),
                        cost: response.cost,
                        latency_ms: response.latency_ms,
                        content: response.content,
                    }),
                    Ok(Err(e)) => {
                        warn!(seat = %seat.participant_id, error = %e, "deliberation call failed");
                        None
                    }
                    Err(_) => {
                        warn!(seat = %seat.participant_id, "deliberation call timed out");
                        None
                    }
                }
            }
        });
        join_all(calls).await.into_iter().flatten().collect()
    }

    /// Collect pairwise peer votes; unparseable or failed votes are
    /// simply dropped. Returns the cost of the vote calls.
    async fn collect_votes(
        &self,
        voters: &[&CommitteeSeat],
        responses: &mut [ParticipantResponse],
        session: &ConsensusSession,
    ) -> f64 {
        let mut pairs = Vec::new();
        for voter in voters {
            for (target_idx, target) in responses.iter().enumerate() {
                if target.participant_id != voter.participant_id {
                    pairs.push(((*voter).clone(), target_idx, target.content.clone()));
                }
            }
        }

        let calls = pairs.into_iter().map(|(voter, target_idx, content)| {
            let prompt = format!(
                "Rate the following response to the question \"{}\" on a scale of 1 to 10. \
                 Reply with the number only.\n\n{}",
                session.question, content
            );
            async move {
                let request = ProviderRequest::new(&voter.provider, &prompt);
                match timeout(self.config.vote_timeout, self.adapter.invoke(&request)).await {
                    Ok(Ok(response)) => {
                        let vote = extract::parse_vote(&response.content);
                        if vote.is_none() {
                            debug!(voter = %voter.participant_id, "vote reply had no parseable score");
                        }
                        (target_idx, voter.participant_id, vote, response.cost)
                    }
                    Ok(Err(e)) => {
                        warn!(voter = %voter.participant_id, error = %e, "vote call failed");
                        (target_idx, voter.participant_id, None, 0.0)
                    }
                    Err(_) => {
                        warn!(voter = %voter.participant_id, "vote call timed out");
                        (target_idx, voter.participant_id, None, 0.0)
                    }
                }
            }
        });

        let mut cost = 0.0;
        for (target_idx, voter_id, vote, call_cost) in join_all(calls).await {
            cost += call_cost;
            if let Some(score) = vote {
                responses[target_idx].votes.insert(voter_id, score);
            }
        }
        cost
    }

    /// Agreement score for a round.
    ///
    /// When peer votes exist: mean of average confidence (scaled from
    /// 0-100) and average vote (scaled from 1-10). Without votes (single
    /// survivor or final round) confidence stands alone.
    fn measure_consensus(responses: &[ParticipantResponse]) -> f64 {
        if responses.is_empty() {
            return 0.0;
        }
        let avg_confidence = responses.iter().map(|r| r.confidence as f64).sum::<f64>()
            / responses.len() as f64
            / 100.0;

        let votes: Vec<f64> = responses
            .iter()
            .flat_map(|r| r.votes.values().copied())
            .collect();
        if votes.is_empty() {
            return avg_confidence;
        }
        let avg_vote = votes.iter().sum::<f64>() / votes.len() as f64 / 10.0;
        (avg_confidence + avg_vote) / 2.0
    }

    /// Focus areas carried into the next round: shared concerns (raised
    /// by at least two participants) plus suggestions attached to
    /// responses peers scored below 6.
    fn refinement_areas(session: &ConsensusSession) -> Vec<String> {
        let Some(round) = session.latest_round() else {
            return Vec::new();
        };

        let mut areas = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for response in &round.responses {
            for concern in &response.concerns {
                let normalized = concern.trim().to_lowercase();
                let shared = round
                    .responses
                    .iter()
                    .filter(|r| {
                        r.concerns
                            .iter()
                            .any(|c| c.trim().to_lowercase() == normalized)
                    })
                    .count()
                    >= 2;
                if shared && seen.insert(normalized) {
                    areas.push(concern.trim().to_string());
                }
            }
        }

        for response in &round.responses {
            if response.avg_vote().map(|v| v < 6.0).unwrap_or(false) {
                for suggestion in &response.suggestions {
                    let normalized = suggestion.trim().to_lowercase();
                    if seen.insert(normalized) {
                        areas.push(suggestion.trim().to_string());
                    }
                }
            }
        }
        areas
    }

    fn deliberation_prompt(
        &self,
        question: &str,
        seat: &CommitteeSeat,
        session: &ConsensusSession,
        focus_areas: &[String],
        expected_shape: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            "You are {} on a deliberation committee (round {} of at most {}).\n\nQuestion:\n{}\n",
            seat.participant_id,
            session.current_round,
            session.max_rounds,
            question
        );

        if let Some(round) = session.latest_round() {
            prompt.push_str("\nPrevious round positions:\n");
            for r in &round.responses {
                prompt.push_str(&format!("[{}] {}\n", r.participant_id, r.content));
            }
        }
        if !focus_areas.is_empty() {
            prompt.push_str("\nFocus this round on:\n");
            for area in focus_areas {
                prompt.push_str(&format!("- {area}\n"));
            }
        }
        if let Some(shape) = expected_shape {
            prompt.push_str(&format!("\nExpected answer shape: {shape}\n"));
        }
        prompt.push_str(
            "\nGive your best answer. End with a line \"Confidence: NN%\" and, if useful, \
             \"Suggestions:\" and \"Concerns:\" sections with bulleted items.",
        );
        prompt
    }

    /// Coordinator synthesis of the final answer. Falls back to the
    /// best-voted (then most confident) response if the call fails.
    async fn synthesize(
        &self,
        question: &str,
        committee: &Committee,
        session: &ConsensusSession,
        expected_shape: Option<&str>,
    ) -> (String, f64) {
        let fallback = session
            .latest_round()
            .and_then(|round| {
                round.responses.iter().max_by(|a, b| {
                    let va = a.avg_vote().unwrap_or(a.confidence as f64 / 10.0);
                    let vb = b.avg_vote().unwrap_or(b.confidence as f64 / 10.0);
                    va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
                })
            })
            .map(|r| r.content.clone())
            .unwrap_or_default();

        let mut prompt = format!(
            "As coordinator, synthesize the committee's final answer to:\n{}\n\nCommittee positions:\n",
            question
        );
        if let Some(round) = session.latest_round() {
            for r in &round.responses {
                prompt.push_str(&format!("[{}] {}\n", r.participant_id, r.content));
            }
        }
        for (i, areas) in session.refinement_history.iter().enumerate() {
            if !areas.is_empty() {
                prompt.push_str(&format!("\nRound {} focus areas: {}\n", i + 1, areas.join("; ")));
            }
        }
        if let Some(shape) = expected_shape {
            prompt.push_str(&format!("\nExpected answer shape: {shape}\n"));
        }

        let coordinator = committee.coordinator();
        let request = ProviderRequest::new(&coordinator.provider, &prompt);
        match timeout(self.config.round_timeout, self.adapter.invoke(&request)).await {
            Ok(Ok(response)) => (response.content, response.cost),
            Ok(Err(e)) => {
                warn!(error = %e, "synthesis call failed; using best-voted response");
                (fallback, 0.0)
            }
            Err(_) => {
                warn!("synthesis call timed out; using best-voted response");
                (fallback, 0.0)
            }
        }
    }

    /// Direct single-provider answer after an abort. Best-effort only.
    async fn abort_fallback(&self, question: &str, committee: &Committee) -> (String, f64) {
        let coordinator = committee.coordinator();
        let request = ProviderRequest::new(&coordinator.provider, question);
        match timeout(self.config.round_timeout, self.adapter.invoke(&request)).await {
            Ok(Ok(response)) => (response.content, response.cost),
            _ => (String::new(), 0.0),
        }
    }

    /// Session quality in [0, 100].
    ///
    /// quality = (avg confidence · 0.4 + final consensus · 0.4
    ///            + refinement bonus + participation bonus) · 100
    ///
    /// The refinement bonus rewards sessions that actually iterated
    /// (0.05 per extra round, capped at 0.1); the participation bonus
    /// rewards keeping the committee answering (0.1 · final-round
    /// responders/total).
    fn quality_score(session: &ConsensusSession, responders: usize, total: usize) -> f64 {
        let Some(last) = session.latest_round() else {
            return 0.0;
        };
        let avg_confidence = if last.responses.is_empty() {
            0.0
        } else {
            last.responses.iter().map(|r| r.confidence as f64).sum::<f64>()
                / last.responses.len() as f64
                / 100.0
        };
        let refinement_bonus = (0.05 * session.rounds.len().saturating_sub(1) as f64).min(0.1);
        let participation_bonus = if total == 0 {
            0.0
        } else {
            0.1 * responders as f64 / total as f64
        };

        ((avg_confidence * 0.4
            + last.consensus_score * 0.4
            + refinement_bonus
            + participation_bonus)
            * 100.0)
            .clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn response(id: &str, confidence: u8, votes: &[(&str, f64)]) -> ParticipantResponse {
        ParticipantResponse {
            participant_id: id.to_string(),
            provider: id.to_string(),
            content: format!("answer from {id}"),
            confidence,
            suggestions: vec![],
            concerns: vec![],
            votes: votes.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            cost: 0.0,
            latency_ms: 0,
        }
    }

    #[test]
    fn test_measure_consensus_with_votes() {
        let responses = vec![
            response("a", 90, &[("b", 9.0)]),
            response("b", 80, &[("a", 8.0)]),
        ];
        // avg confidence 0.85, avg vote 0.85, mean 0.85.
        let score = ConsensusOrchestrator::measure_consensus(&responses);
        assert!((score - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_measure_consensus_confidence_only() {
        let responses = vec![response("a", 60, &[])];
        let score = ConsensusOrchestrator::measure_consensus(&responses);
        assert!((score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_measure_consensus_empty() {
        assert_eq!(ConsensusOrchestrator::measure_consensus(&[]), 0.0);
    }

    #[test]
    fn test_refinement_areas_shared_concerns_and_low_votes() {
        let mut session = ConsensusSession::new("q", 3);
        let mut a = response("a", 70, &[("b", 4.0), ("c", 5.0)]);
        a.concerns = vec!["Latency budget".to_string()];
        a.suggestions = vec!["cache the hot path".to_string()];
        let mut b = response("b", 70, &[("a", 8.0)]);
        b.concerns = vec!["latency budget".to_string()];
        let c = response("c", 70, &[("a", 9.0)]);

        session.rounds.push(ConversationRound {
            round: 1,
            responses: vec![a, b, c],
            consensus_score: 0.5,
            started_at: Utc::now(),
        });

        let areas = ConsensusOrchestrator::refinement_areas(&session);
        // Shared concern (case-insensitive) plus the low-voted seat's
        // suggestion.
        assert_eq!(areas.len(), 2);
        assert!(areas.iter().any(|a| a.eq_ignore_ascii_case("latency budget")));
        assert!(areas.contains(&"cache the hot path".to_string()));
    }

    #[test]
    fn test_refinement_ignores_singleton_concerns() {
        let mut session = ConsensusSession::new("q", 3);
        let mut a = response("a", 70, &[("b", 8.0)]);
        a.concerns = vec!["only mine".to_string()];
        session.rounds.push(ConversationRound {
            round: 1,
            responses: vec![a, response("b", 70, &[("a", 8.0)])],
            consensus_score: 0.5,
            started_at: Utc::now(),
        });
        assert!(ConsensusOrchestrator::refinement_areas(&session).is_empty());
    }

    #[test]
    fn test_quality_score_bounds() {
        let mut session = ConsensusSession::new("q", 3);
        session.rounds.push(ConversationRound {
            round: 1,
            responses: vec![response("a", 100, &[("b", 10.0)]), {
                let mut r = response("b", 100, &[("a", 10.0)]);
                r.votes = BTreeMap::from([("a".to_string(), 10.0)]);
                r
            }],
            consensus_score: 1.0,
            started_at: Utc::now(),
        });
        let q = ConsensusOrchestrator::quality_score(&session, 2, 2);
        // 0.4 + 0.4 + 0 refinement + 0.1 participation = 0.9 → 90.
        assert!((q - 90.0).abs() < 1e-9);
        assert!(q <= 100.0);
    }

    #[test]
    fn test_quality_score_rewards_iteration() {
        let mut session = ConsensusSession::new("q", 3);
        for round in 1..=3 {
            session.rounds.push(ConversationRound {
                round,
                responses: vec![response("a", 80, &[])],
                consensus_score: 0.8,
                started_at: Utc::now(),
            });
        }
        let q = ConsensusOrchestrator::quality_score(&session, 1, 3);
        // 0.32 + 0.32 + 0.1 capped refinement + 0.0333 participation.
        let expected = (0.8 * 0.4 + 0.8 * 0.4 + 0.1 + 0.1 / 3.0) * 100.0;
        assert!((q - expected).abs() < 1e-6);
    }

    #[test]
    fn test_quality_score_no_rounds() {
        let session = ConsensusSession::new("q", 3);
        assert_eq!(ConsensusOrchestrator::quality_score(&session, 0, 3), 0.0);
    }

    #[test]
    fn test_config_defaults() {
        let config = ConsensusConfig::default();
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.consensus_threshold, 0.8);
    }
}
