use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xln_account::AccountMachine;
use xln_batch::BatchState;
use xln_core::{EntityId, Encoder, Hash, TokenId};
use xln_crypto::{hash, PublicKey};

use crate::error::{EntityError, TxError};

const STATE_HASH_DOMAIN: &str = "xln/entity-state/v1";

/// Replicated state of one entity. Identical on every validator at a given height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: EntityId,
    /// Height of the last committed frame (0 before the first one).
    pub height: u64,
    /// Timestamp of the last committed frame (ms).
    pub timestamp: u64,
    /// Key the entity signs bilateral messages with (its proposer's key).
    pub account_key: PublicKey,
    pub accounts: BTreeMap<EntityId, AccountMachine>,
    /// Mirror of on-chain reserves, learned from jurisdiction events.
    pub reserves: BTreeMap<TokenId, u128>,
    pub batch: BatchState,
}

impl EntityState {
    pub fn new(entity_id: EntityId, account_key: PublicKey) -> Self {
        Self {
            entity_id,
            height: 0,
            timestamp: 0,
            account_key,
            accounts: BTreeMap::new(),
            reserves: BTreeMap::new(),
            batch: BatchState::new(),
        }
    }

    pub fn account(&self, counterparty: &EntityId) -> Result<&AccountMachine, TxError> {
        self.accounts
            .get(counterparty)
            .ok_or_else(|| TxError::UnknownAccount(counterparty.clone()))
    }

    pub fn account_mut(&mut self, counterparty: &EntityId) -> Result<&mut AccountMachine, TxError> {
        self.accounts
            .get_mut(counterparty)
            .ok_or_else(|| TxError::UnknownAccount(counterparty.clone()))
    }

    pub fn reserve(&self, token_id: TokenId) -> u128 {
        self.reserves.get(&token_id).copied().unwrap_or(0)
    }

    /// Digest every validator must reproduce after executing a frame.
    ///
    /// All maps are ordered, so the JSON rendering is canonical.
    pub fn state_hash(&self) -> Result<Hash, EntityError> {
        let body = serde_json::to_vec(self)?;
        let mut enc = Encoder::with_domain(STATE_HASH_DOMAIN);
        enc.put_bytes(&body);
        Ok(hash(enc.as_bytes()))
    }
}
