//! Multi-participant consensus — committee deliberation to a final answer.
//!
//! A committee of 3-5 providers deliberates a question over bounded
//! rounds. Each round fans out in parallel, peers score each other's
//! responses, and agreement is measured against a threshold. The
//! coordinator seat synthesizes the final answer.
//!
//! # Session Flow
//!
//! ```text
//! Initializing → RoundInProgress → ConsensusCheck
//!                      ▲                 │
//!                      │                 ├─ threshold met → Finalizing → Complete
//!                      └─ rounds left ───┤
//!                        (refine)        └─ max rounds → Finalizing → Complete
//!
//! all participants fail in a round → Aborted (fallback answer)
//! ```

pub mod committee;
pub mod extract;
pub mod orchestrator;
pub mod state;

pub use committee::{
    Committee, CommitteeError, CommitteeSeat, CommunicationStyle, Persona, RiskTolerance,
    SeatRole, MAX_COMMITTEE, MIN_COMMITTEE,
};
pub use orchestrator::{ConsensusConfig, ConsensusError, ConsensusOrchestrator, ConsensusOutcome};
pub use state::{
    ConsensusSession, ConversationRound, ParticipantResponse, SessionPhase, SessionTransition,
    TransitionError,
};
