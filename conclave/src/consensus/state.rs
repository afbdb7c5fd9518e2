//! Consensus session state machine — phases, transitions, round records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::ProviderId;

/// Phase of a consensus session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Session created, committee not yet deliberating.
    Initializing,
    /// A deliberation round is being fanned out.
    RoundInProgress,
    /// Round responses collected; agreement being measured.
    ConsensusCheck,
    /// Coordinator is synthesizing the final answer.
    Finalizing,
    /// Session finished with an answer.
    Complete,
    /// Session ended without a deliberated answer.
    Aborted,
}

impl SessionPhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [SessionPhase] {
        match self {
            Self::Initializing => &[Self::RoundInProgress, Self::Aborted],
            Self::RoundInProgress => &[Self::ConsensusCheck, Self::Aborted],
            Self::ConsensusCheck => &[Self::RoundInProgress, Self::Finalizing, Self::Aborted],
            Self::Finalizing => &[Self::Complete, Self::Aborted],
            Self::Complete | Self::Aborted => &[],
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::RoundInProgress => write!(f, "round_in_progress"),
            Self::ConsensusCheck => write!(f, "consensus_check"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Complete => write!(f, "complete"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// One participant's contribution to a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantResponse {
    /// Committee seat that produced this response.
    pub participant_id: String,
    /// Provider behind the seat.
    pub provider: ProviderId,
    /// Raw response content.
    pub content: String,
    /// Self-reported or inferred confidence, 0-100.
    pub confidence: u8,
    /// Extracted improvement suggestions.
    pub suggestions: Vec<String>,
    /// Extracted concerns.
    pub concerns: Vec<String>,
    /// Scores this response received from peers, keyed by voter seat.
    pub votes: BTreeMap<String, f64>,
    /// Cost of producing this response.
    pub cost: f64,
    /// Observed call latency.
    pub latency_ms: u64,
}

impl ParticipantResponse {
    /// Average peer score received, if any votes came in.
    pub fn avg_vote(&self) -> Option<f64> {
        if self.votes.is_empty() {
            None
        } else {
            Some(self.votes.values().sum::<f64>() / self.votes.len() as f64)
        }
    }
}

/// Record of one completed deliberation round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRound {
    /// Round number (1-indexed).
    pub round: u32,
    /// Responses from participants that answered in time.
    pub responses: Vec<ParticipantResponse>,
    /// Agreement score measured for this round, in [0, 1].
    pub consensus_score: f64,
    /// When this round started.
    pub started_at: DateTime<Utc>,
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} -> {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// A consensus session tracking state and history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSession {
    /// Unique session identifier.
    pub id: String,
    /// Current phase.
    pub phase: SessionPhase,
    /// Current round number.
    pub current_round: u32,
    /// Maximum deliberation rounds.
    pub max_rounds: u32,
    /// The question under deliberation.
    pub question: String,
    /// Round history.
    pub rounds: Vec<ConversationRound>,
    /// Transition history.
    pub transitions: Vec<SessionTransition>,
    /// Refinement focus areas carried into each subsequent round.
    pub refinement_history: Vec<Vec<String>>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

impl ConsensusSession {
    pub fn new(question: &str, max_rounds: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            phase: SessionPhase::Initializing,
            current_round: 0,
            max_rounds,
            question: question.to_string(),
            rounds: Vec::new(),
            transitions: Vec::new(),
            refinement_history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: SessionPhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }

        self.transitions.push(SessionTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;

        // Each entry into a deliberation round advances the counter.
        if to == SessionPhase::RoundInProgress {
            self.current_round += 1;
        }

        Ok(())
    }

    /// Whether the session has ended.
    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Whether another deliberation round may start.
    pub fn has_rounds_remaining(&self) -> bool {
        self.current_round < self.max_rounds
    }

    /// The most recent completed round, if any.
    pub fn latest_round(&self) -> Option<&ConversationRound> {
        self.rounds.last()
    }

    /// Compact status line for logs.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] round {}/{} | {} rounds recorded",
            self.phase,
            self.current_round,
            self.max_rounds,
            self.rounds.len()
        )
    }
}
