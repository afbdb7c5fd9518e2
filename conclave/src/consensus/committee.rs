//! Committee assembly — seats, roles, and persona framing.
//!
//! A committee holds 3 to 5 seats. Required participants are seated
//! unconditionally; remaining seats go to domain specialists, then to
//! the best remaining providers by learned policy score (declared
//! benchmark quality before any feedback exists). The first seat is
//! the coordinator, responsible for final synthesis.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::classifier::TaskDomain;
use crate::policy::PolicyStore;
use crate::provider::ProviderId;
use crate::registry::{ProviderProfile, ProviderRegistry};

/// Minimum committee size.
pub const MIN_COMMITTEE: usize = 3;
/// Maximum committee size.
pub const MAX_COMMITTEE: usize = 5;

/// Errors raised during committee assembly.
#[derive(Debug, Error)]
pub enum CommitteeError {
    #[error("need at least {MIN_COMMITTEE} providers, have {0}")]
    NotEnoughProviders(usize),

    #[error("required participant {0} is not registered")]
    UnknownRequired(ProviderId),

    #[error("optional participant {0} is not registered")]
    UnknownOptional(ProviderId),
}

/// Role a seat plays in deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatRole {
    /// Leads synthesis and serves as the fallback answerer.
    Coordinator,
    /// Seated for declared domain specialization.
    Specialist,
    /// Seated to round out the committee.
    Generalist,
}

impl std::fmt::Display for SeatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Specialist => write!(f, "specialist"),
            Self::Generalist => write!(f, "generalist"),
        }
    }
}

/// How a seat is prompted to communicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStyle {
    Direct,
    Exploratory,
    Cautious,
}

/// How a seat is prompted to weigh risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Balanced,
    Bold,
}

/// Deliberation persona assigned to a seat.
///
/// Personas are rotated deterministically so the same committee always
/// gets the same mix of perspectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub style: CommunicationStyle,
    pub risk: RiskTolerance,
}

impl Persona {
    /// The deterministic persona rotation.
    pub const ROTATION: [Persona; 3] = [
        Persona {
            style: CommunicationStyle::Direct,
            risk: RiskTolerance::Balanced,
        },
        Persona {
            style: CommunicationStyle::Exploratory,
            risk: RiskTolerance::Bold,
        },
        Persona {
            style: CommunicationStyle::Cautious,
            risk: RiskTolerance::Conservative,
        },
    ];

    /// Prompt fragment describing how this persona should deliberate.
    pub fn framing(&self) -> String {
        let style = match self.style {
            CommunicationStyle::Direct => "Answer directly and commit to a position.",
            CommunicationStyle::Exploratory => {
                "Explore alternatives before settling on a position."
            }
            CommunicationStyle::Cautious => "Qualify claims and surface what could go wrong.",
        };
        let risk = match self.risk {
            RiskTolerance::Conservative => "Prefer proven, low-risk options.",
            RiskTolerance::Balanced => "Weigh risk and reward evenly.",
            RiskTolerance::Bold => "Favor ambitious options when the upside is large.",
        };
        format!("{style} {risk}")
    }
}

/// One seat on an assembled committee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitteeSeat {
    /// Stable id within the session, e.g. "seat-1".
    pub participant_id: String,
    /// Provider occupying the seat.
    pub provider: ProviderId,
    pub role: SeatRole,
    pub persona: Persona,
    /// Whether the provider declared a specialization for the domain.
    pub specialized: bool,
}

/// An assembled committee for one session.
///
/// Seats are private: a committee only exists through [`assemble`],
/// which guarantees at least [`MIN_COMMITTEE`] seats and a coordinator.
///
/// [`assemble`]: Self::assemble
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Committee {
    seats: Vec<CommitteeSeat>,
    domain: TaskDomain,
}

impl Committee {
    /// Assemble a committee for a domain.
    ///
    /// Required participants are seated first, in the order given. Then
    /// domain specialists, then the remaining providers, both ordered by
    /// learned policy score for the domain (confidence-dampened, falling
    /// back to declared benchmark quality before any feedback exists),
    /// until the committee reaches [`MAX_COMMITTEE`] seats or providers
    /// run out. A non-empty `optional` list restricts which providers
    /// may compete for the open seats. Fewer than [`MIN_COMMITTEE`]
    /// eligible providers is an error.
    pub fn assemble(
        registry: &ProviderRegistry,
        domain: TaskDomain,
        required: &[ProviderId],
        optional: &[ProviderId],
        policy: &PolicyStore,
    ) -> Result<Self, CommitteeError> {
        for id in required {
            if registry.get(id).is_none() {
                return Err(CommitteeError::UnknownRequired(id.clone()));
            }
        }
        for id in optional {
            if registry.get(id).is_none() {
                return Err(CommitteeError::UnknownOptional(id.clone()));
            }
        }

        let mut chosen: Vec<ProviderId> = Vec::new();
        for id in required.iter().take(MAX_COMMITTEE) {
            if !chosen.contains(id) {
                chosen.push(id.clone());
            }
        }

        // Specialists first, then the rest, ranked by learned policy.
        let mut remaining: Vec<_> = registry
            .all()
            .iter()
            .filter(|p| !chosen.contains(&p.id))
            .filter(|p| optional.is_empty() || optional.contains(&p.id))
            .collect();
        remaining.sort_by(|a, b| {
            let score_a = Self::seat_score(a, domain, policy);
            let score_b = Self::seat_score(b, domain, policy);
            b.specializes_in(domain)
                .cmp(&a.specializes_in(domain))
                .then_with(|| {
                    score_b
                        .partial_cmp(&score_a)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        for p in remaining {
            if chosen.len() >= MAX_COMMITTEE {
                break;
            }
            chosen.push(p.id.clone());
        }

        if chosen.len() < MIN_COMMITTEE {
            return Err(CommitteeError::NotEnoughProviders(chosen.len()));
        }

        let seats: Vec<CommitteeSeat> = chosen
            .into_iter()
            .enumerate()
            .map(|(i, provider)| {
                let specialized = registry
                    .get(&provider)
                    .map(|p| p.specializes_in(domain))
                    .unwrap_or(false);
                CommitteeSeat {
                    participant_id: format!("seat-{}", i + 1),
                    role: if i == 0 {
                        SeatRole::Coordinator
                    } else if specialized {
                        SeatRole::Specialist
                    } else {
                        SeatRole::Generalist
                    },
                    persona: Persona::ROTATION[i % Persona::ROTATION.len()],
                    provider,
                    specialized,
                }
            })
            .collect();

        debug!(
            domain = %domain,
            seats = seats.len(),
            coordinator = %seats[0].provider,
            "committee assembled"
        );
        Ok(Self { seats, domain })
    }

    /// Open-seat ranking score, mirroring the route resolver's combined
    /// score so high-stakes seating follows the same learned signal.
    fn seat_score(profile: &ProviderProfile, domain: TaskDomain, policy: &PolicyStore) -> f64 {
        let (score, success_rate, confidence) = match policy.get(&profile.id, domain) {
            Some(state) => (state.score, state.success_rate, state.confidence),
            None => (profile.benchmarks.quality, 0.5, 0.0),
        };
        (0.5 * score + 0.3 * success_rate) * (0.5 + 0.5 * confidence)
    }

    /// The seats in order; the first is the coordinator.
    pub fn seats(&self) -> &[CommitteeSeat] {
        &self.seats
    }

    /// The domain this committee was assembled for.
    pub fn domain(&self) -> TaskDomain {
        self.domain
    }

    /// The coordinator seat.
    pub fn coordinator(&self) -> &CommitteeSeat {
        // Assembly guarantees at least MIN_COMMITTEE seats.
        &self.seats[0]
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }
}
