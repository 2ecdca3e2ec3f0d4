use std::fmt;

use serde::{Deserialize, Serialize};
use xln_account::{DisputeFinalization, FinalDisputeProof, SettlementOp};
use xln_core::{EntityId, Hash, TokenId};

/// One on-chain operation carried by a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    /// Move reserve from the submitting entity to another entity.
    ReserveToReserve {
        token_id: TokenId,
        to: EntityId,
        amount: u128,
    },
    /// Lock reserve as collateral of the account with `counterparty`.
    ReserveToCollateral {
        token_id: TokenId,
        counterparty: EntityId,
        amount: u128,
    },
    /// Co-signed cooperative settlement.
    Settlement(SettlementOp),
    /// Open a dispute with the counterparty-signed proof.
    DisputeStart(FinalDisputeProof),
    /// Close a dispute whose timeout has passed.
    DisputeFinalize(DisputeFinalization),
    /// Publish a hashlock secret.
    Reveal { secret: Hash },
}

impl BatchOp {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Self::ReserveToReserve { .. } => 1,
            Self::ReserveToCollateral { .. } => 2,
            Self::Settlement(_) => 3,
            Self::DisputeStart(_) => 4,
            Self::DisputeFinalize(_) => 5,
            Self::Reveal { .. } => 6,
        }
    }
}

impl fmt::Display for BatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReserveToReserve { token_id, to, amount } => {
                write!(f, "r2r {} of token {} to {}", amount, token_id, to)
            }
            Self::ReserveToCollateral {
                token_id,
                counterparty,
                amount,
            } => write!(f, "r2c {} of token {} with {}", amount, token_id, counterparty),
            Self::Settlement(s) => write!(f, "settle {}/{} nonce {}", s.left, s.right, s.nonce),
            Self::DisputeStart(d) => write!(
                f,
                "dispute {}/{} nonce {}",
                d.proof.left, d.proof.right, d.proof.nonce
            ),
            Self::DisputeFinalize(d) => {
                write!(f, "finalize dispute {}/{} nonce {}", d.left, d.right, d.nonce)
            }
            Self::Reveal { .. } => write!(f, "reveal secret"),
        }
    }
}
