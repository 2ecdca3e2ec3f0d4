use xln_core::{Side, TokenId};
use xln_crypto::CryptoError;

/// Errors raised by the bilateral account machine.
///
/// Every error leaves the account exactly as it was before the call.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("invalid nonce: account is at {expected}, proof carries {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("credit limit violation on token {token_id}: offdelta {offdelta} outside [{lower}, {upper}]")]
    CreditLimitViolation {
        token_id: TokenId,
        offdelta: i128,
        lower: i128,
        upper: i128,
    },

    #[error("settlement diff for token {0} does not conserve value")]
    ConservationViolation(TokenId),

    #[error("collateral of token {0} would become negative")]
    NegativeCollateral(TokenId),

    #[error("arithmetic overflow on token {0}")]
    Overflow(TokenId),

    #[error("a proposal is already pending on this account")]
    ProposalPending,

    #[error("no pending proposal to commit")]
    NoPendingProposal,

    #[error("co-signature does not match the pending proposal")]
    ProposalMismatch,

    #[error("conflicting proposal: the left side's pending proposal takes precedence")]
    ProposalConflict,

    #[error("proposal does not belong to this account: {0}")]
    WrongAccount(String),

    #[error("{side} side is not allowed to {action}")]
    Unauthorized { side: Side, action: String },

    #[error("invalid account operation: {0}")]
    InvalidOp(String),

    #[error("account is in dispute")]
    AccountInDispute,

    #[error("account has no active dispute")]
    NoActiveDispute,

    #[error("dispute timeout not reached: now {now}, timeout {timeout}")]
    DisputeNotExpired { now: u64, timeout: u64 },

    #[error("dispute finalization already requested")]
    DisputeFinalizing,

    #[error("no counterparty-signed dispute proof for the current state")]
    NoDisputeProof,

    #[error("an entity cannot open an account with itself")]
    SelfAccount,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
