use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EntityError;

/// Phase of a replica's current consensus round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundPhase {
    #[default]
    Idle,
    /// Proposer has built and signed a frame.
    Proposed,
    /// Collecting (proposer) or awaiting (validator) precommits.
    Precommitting,
    /// Last round committed; ready for the next proposal.
    Committed,
}

impl RoundPhase {
    /// Whether a round is open and has not committed yet.
    pub fn in_round(&self) -> bool {
        matches!(self, Self::Proposed | Self::Precommitting)
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Proposed => write!(f, "Proposed"),
            Self::Precommitting => write!(f, "Precommitting"),
            Self::Committed => write!(f, "Committed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    /// Proposer built a frame.
    Propose,
    /// Validator accepted the proposer's frame and signed it.
    ProposalAccepted,
    /// Proposer received a validator's precommit.
    Precommit,
    Commit,
    /// Round timed out or was dropped after a divergence.
    Abandon,
}

impl RoundEvent {
    pub const ALL: [RoundEvent; 5] = [
        Self::Propose,
        Self::ProposalAccepted,
        Self::Precommit,
        Self::Commit,
        Self::Abandon,
    ];
}

/// Round transition table.
///
/// Valid transitions:
/// - Idle | Committed → Proposed (Propose)
/// - Idle | Committed → Precommitting (ProposalAccepted)
/// - Proposed | Precommitting → Precommitting (Precommit)
/// - Proposed | Precommitting → Committed (Commit)
/// - Proposed | Precommitting → Idle (Abandon)
pub struct RoundStateMachine;

impl RoundStateMachine {
    pub fn transition(current: RoundPhase, event: RoundEvent) -> Result<RoundPhase, EntityError> {
        use RoundEvent as E;
        use RoundPhase as P;

        let next = match (current, event) {
            (P::Idle | P::Committed, E::Propose) => P::Proposed,
            (P::Idle | P::Committed, E::ProposalAccepted) => P::Precommitting,
            (P::Proposed | P::Precommitting, E::Precommit) => P::Precommitting,
            (P::Proposed | P::Precommitting, E::Commit) => P::Committed,
            (P::Proposed | P::Precommitting, E::Abandon) => P::Idle,
            _ => {
                return Err(EntityError::InvalidRoundTransition {
                    from: current,
                    event: format!("{:?}", event),
                })
            }
        };

        tracing::trace!(from = %current, to = %next, event = ?event, "round transition");
        Ok(next)
    }

    pub fn can_transition(current: RoundPhase, event: RoundEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposer_path() {
        let p = RoundStateMachine::transition(RoundPhase::Idle, RoundEvent::Propose).unwrap();
        let p = RoundStateMachine::transition(p, RoundEvent::Precommit).unwrap();
        let p = RoundStateMachine::transition(p, RoundEvent::Commit).unwrap();
        assert_eq!(p, RoundPhase::Committed);
        assert!(RoundStateMachine::can_transition(p, RoundEvent::Propose));
    }

    #[test]
    fn test_single_signer_commits_from_proposed() {
        let p = RoundStateMachine::transition(RoundPhase::Committed, RoundEvent::Propose).unwrap();
        assert_eq!(
            RoundStateMachine::transition(p, RoundEvent::Commit).unwrap(),
            RoundPhase::Committed
        );
    }

    #[test]
    fn test_no_double_proposal() {
        for phase in [RoundPhase::Proposed, RoundPhase::Precommitting] {
            assert!(!RoundStateMachine::can_transition(phase, RoundEvent::Propose));
            assert!(!RoundStateMachine::can_transition(phase, RoundEvent::ProposalAccepted));
        }
    }

    #[test]
    fn test_idle_cannot_commit_or_abandon() {
        for event in [RoundEvent::Commit, RoundEvent::Abandon, RoundEvent::Precommit] {
            assert!(!RoundStateMachine::can_transition(RoundPhase::Idle, event));
            assert!(!RoundStateMachine::can_transition(RoundPhase::Committed, event));
        }
    }

    #[test]
    fn test_every_event_valid_somewhere() {
        let phases = [
            RoundPhase::Idle,
            RoundPhase::Proposed,
            RoundPhase::Precommitting,
            RoundPhase::Committed,
        ];
        for event in RoundEvent::ALL {
            assert!(phases.iter().any(|p| RoundStateMachine::can_transition(*p, event)));
        }
    }
}
