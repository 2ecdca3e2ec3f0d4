use serde::{Deserialize, Serialize};
use xln_account::TokenSettlement;
use xln_core::{EntityId, Hash, TokenId};

/// On-chain facts for one account after a processed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettlement {
    pub left: EntityId,
    pub right: EntityId,
    pub tokens: Vec<TokenSettlement>,
    /// Account nonce on-chain after the operation.
    pub nonce: u64,
    /// Hash of the dispute open on-chain, if any.
    #[serde(default)]
    pub dispute: Option<Hash>,
}

/// Events emitted by a jurisdiction adapter.
///
/// They re-enter entity consensus as transactions; nothing reads them directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JurisdictionEvent {
    /// `submit_tx` accepted the batch; records the transaction hash.
    BatchSubmitted {
        entity: EntityId,
        batch_hash: Hash,
        tx_hash: String,
    },
    BatchProcessed {
        entity: EntityId,
        batch_hash: Hash,
        tx_hash: String,
        success: bool,
        block_number: u64,
        gas_used: u64,
    },
    AccountSettled { settlements: Vec<AccountSettlement> },
    ReserveUpdated {
        entity: EntityId,
        token_id: TokenId,
        reserve: u128,
    },
}

impl JurisdictionEvent {
    /// Entities that must learn about this event.
    pub fn recipients(&self) -> Vec<EntityId> {
        match self {
            Self::BatchSubmitted { entity, .. }
            | Self::BatchProcessed { entity, .. }
            | Self::ReserveUpdated { entity, .. } => vec![entity.clone()],
            Self::AccountSettled { settlements } => {
                let mut out: Vec<EntityId> = settlements
                    .iter()
                    .flat_map(|s| [s.left.clone(), s.right.clone()])
                    .collect();
                out.sort();
                out.dedup();
                out
            }
        }
    }
}

/// How an archived batch ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOutcome {
    Confirmed { block_number: u64, gas_used: u64 },
    Failed { attempts: u32 },
}

/// Terminal batch kept in the bounded history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedBatch {
    pub batch_hash: Hash,
    pub tx_hash: Option<String>,
    pub entity_nonce: u64,
    pub op_count: usize,
    pub outcome: BatchOutcome,
    /// Frame timestamp (ms) at which the batch was archived.
    pub closed_at: u64,
}
