use xln_account::AccountError;
use xln_batch::BatchError;
use xln_core::{EntityId, ValidatorId};
use xln_crypto::CryptoError;

use crate::round::RoundPhase;

/// Errors local to one transaction.
///
/// The transaction is rejected and the rest of the frame carries on.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("account error: {0}")]
    Account(#[from] AccountError),

    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("no account with {0}")]
    UnknownAccount(EntityId),

    #[error("account with {0} already exists")]
    AccountExists(EntityId),
}

/// Errors that abort a consensus round or reject a consensus message.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("consensus divergence at height {height}: proposer {expected}, local {got}")]
    ConsensusDivergence {
        height: u64,
        expected: String,
        got: String,
    },

    #[error("quorum failure at height {height}: weight {have} of {need}")]
    QuorumFailure { height: u64, have: u64, need: u64 },

    #[error("wrong frame height: expected {expected}, got {got}")]
    WrongHeight { expected: u64, got: u64 },

    #[error("frame does not extend the committed chain at height {0}")]
    WrongPredecessor(u64),

    #[error("frame timestamp {got} is before the last committed timestamp {last}")]
    TimestampRegression { last: u64, got: u64 },

    #[error("{0} is not the proposer of this entity")]
    NotProposer(ValidatorId),

    #[error("{0} is not a validator of this entity")]
    UnknownValidator(ValidatorId),

    #[error("message for entity {got} delivered to replica of {expected}")]
    WrongEntity { expected: EntityId, got: EntityId },

    #[error("a round is already in progress")]
    RoundInProgress,

    #[error("no round in progress")]
    NoActiveRound,

    #[error("mempool is empty")]
    EmptyMempool,

    #[error("expected {expected} signatures, got {got}")]
    SignatureCount { expected: usize, got: usize },

    #[error("invalid round transition from {from} on {event}")]
    InvalidRoundTransition { from: RoundPhase, event: String },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("state encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
