use xln_core::CoreError;
use xln_crypto::CryptoError;

use crate::status::BatchStatus;

/// Batch-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("invalid batch transition: {from} cannot handle {event}")]
    InvalidTransition { from: BatchStatus, event: String },

    #[error("batch is in flight (status {0}); wait for confirmation or failure")]
    BatchInFlight(BatchStatus),

    #[error("cannot broadcast an empty batch")]
    EmptyBatch,

    #[error("unknown batch hash: {0}")]
    UnknownBatch(String),

    #[error("unsupported batch codec version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown batch op tag {0}")]
    UnknownOpTag(u8),

    #[error("entity nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("jurisdiction rejected batch: {0}")]
    Rejected(String),

    #[error("insufficient reserve for token {token_id}: available {available}, required {required}")]
    InsufficientReserve {
        token_id: u32,
        available: u128,
        required: u128,
    },

    #[error("jurisdiction unavailable: {0}")]
    Unavailable(String),

    #[error("codec error: {0}")]
    Codec(#[from] CoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
