use xln_core::{HashType, ValidatorId};

/// Cryptographic errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("signer {0} is not part of the quorum")]
    UnknownSigner(ValidatorId),

    #[error("signer {0} appears more than once")]
    DuplicateSigner(ValidatorId),

    #[error("no public key known for signer {0}")]
    MissingKey(ValidatorId),

    #[error("insufficient signer weight: have {have}, need {need}")]
    InsufficientWeight { have: u64, need: u64 },

    #[error("hanko covers {found_kind} hash, expected {expected_kind}")]
    HashMismatch {
        expected_kind: HashType,
        found_kind: HashType,
    },

    #[error("nested hanko exceeds maximum depth {0}")]
    NestingTooDeep(usize),

    #[error("core error: {0}")]
    Core(#[from] xln_core::CoreError),
}
