pub mod delta;
pub mod error;
pub mod machine;
pub mod proposal;

pub use delta::Delta;
pub use error::AccountError;
pub use machine::{AccountMachine, ActiveDispute, OnchainState, PendingProposal};
pub use proposal::{
    AccountOp, AccountProposal, Cosignature, DisputeFinalization, DisputeProof, FinalDisputeProof,
    ProposalKind, Rejection, SettlementDiff, SettlementOp, SignedProposal, TokenSettlement,
};
