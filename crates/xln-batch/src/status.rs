use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// Lifecycle status of an entity's jurisdiction batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Nothing queued.
    #[default]
    Empty,
    /// Ops are queued and the batch is still mutable.
    Accumulating,
    /// Frozen and handed to the quorum / jurisdiction, awaiting the outcome.
    Sent,
    /// Processed successfully on-chain. Archived and reset in the same step.
    Confirmed,
    /// Reverted or expired. Frozen payload is kept for a retry.
    Failed,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 5] = [
        Self::Empty,
        Self::Accumulating,
        Self::Sent,
        Self::Confirmed,
        Self::Failed,
    ];

    /// Whether the frozen payload is out of the entity's hands.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Accumulating => write!(f, "Accumulating"),
            Self::Sent => write!(f, "Sent"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Events that drive batch transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEvent {
    Append,
    Broadcast,
    Confirmed,
    Failed,
    /// `Sent` for longer than the configured maximum age.
    Expired,
    /// Re-request the quorum signature over the frozen hash.
    Resign,
    Retry,
    Clear,
}

impl BatchEvent {
    pub const ALL: [BatchEvent; 8] = [
        Self::Append,
        Self::Broadcast,
        Self::Confirmed,
        Self::Failed,
        Self::Expired,
        Self::Resign,
        Self::Retry,
        Self::Clear,
    ];
}

/// Batch transition table.
///
/// Valid transitions:
/// - Empty → Accumulating (Append)
/// - Accumulating → Accumulating (Append)
/// - Accumulating → Sent (Broadcast)
/// - Accumulating → Empty (Clear)
/// - Sent → Confirmed (Confirmed)
/// - Sent → Failed (Failed, Expired)
/// - Sent → Sent (Resign)
/// - Failed → Sent (Retry)
/// - Failed → Confirmed (Confirmed)
/// - Failed → Empty (Clear)
pub struct BatchStateMachine;

impl BatchStateMachine {
    /// Returns the new status, or `InvalidTransition` for any pair not in the table.
    pub fn transition(current: BatchStatus, event: BatchEvent) -> Result<BatchStatus, BatchError> {
        use BatchEvent as E;
        use BatchStatus as S;

        let next = match (current, event) {
            (S::Empty, E::Append) => S::Accumulating,

            (S::Accumulating, E::Append) => S::Accumulating,
            (S::Accumulating, E::Broadcast) => S::Sent,
            (S::Accumulating, E::Clear) => S::Empty,

            (S::Sent, E::Confirmed) => S::Confirmed,
            (S::Sent, E::Failed) | (S::Sent, E::Expired) => S::Failed,
            (S::Sent, E::Resign) => S::Sent,

            // A late confirmation of a batch we already gave up on still counts
            (S::Failed, E::Confirmed) => S::Confirmed,
            (S::Failed, E::Retry) => S::Sent,
            (S::Failed, E::Clear) => S::Empty,

            _ => {
                return Err(BatchError::InvalidTransition {
                    from: current,
                    event: format!("{:?}", event),
                })
            }
        };

        tracing::debug!(from = %current, to = %next, event = ?event, "batch state transition");
        Ok(next)
    }

    pub fn can_transition(current: BatchStatus, event: BatchEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
