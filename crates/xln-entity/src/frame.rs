use serde::{Deserialize, Serialize};
use xln_core::{short_hex, EngineConfig, Encoder, Hash};
use xln_crypto::{hash, merkle_root};

use crate::error::EntityError;
use crate::handlers::{apply_tx, housekeeping, rejection_output};
use crate::state::EntityState;
use crate::tx::{EntityTx, FrameContext, TxOutcome};

const FRAME_HASH_DOMAIN: &str = "xln/frame/v1";
const TX_HASH_DOMAIN: &str = "xln/entity-tx/v1";

/// An ordered, hashed bundle of transactions for one consensus round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub height: u64,
    pub timestamp: u64,
    pub prev_frame_hash: Hash,
    pub transactions: Vec<EntityTx>,
    /// Hash of the entity state after executing the frame.
    pub state_hash: Hash,
    pub hash: Hash,
}

/// Committed-chain entry kept once the transactions are no longer needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub height: u64,
    pub timestamp: u64,
    pub prev_frame_hash: Hash,
    pub state_hash: Hash,
    pub hash: Hash,
    pub tx_count: usize,
}

impl Frame {
    /// `H(domain || height || timestamp || prev || merkle(tx hashes) || state_hash)`.
    pub fn compute_hash(
        height: u64,
        timestamp: u64,
        prev_frame_hash: &Hash,
        transactions: &[EntityTx],
        state_hash: &Hash,
    ) -> Result<Hash, EntityError> {
        let tx_hashes = transactions
            .iter()
            .map(tx_hash)
            .collect::<Result<Vec<_>, _>>()?;
        let mut enc = Encoder::with_domain(FRAME_HASH_DOMAIN);
        enc.put_u64(height)
            .put_u64(timestamp)
            .put_hash(prev_frame_hash)
            .put_hash(&merkle_root(&tx_hashes))
            .put_hash(state_hash);
        Ok(hash(enc.as_bytes()))
    }

    /// Recompute the hash and compare it with the carried one.
    pub fn check_hash(&self) -> Result<(), EntityError> {
        let expected = Self::compute_hash(
            self.height,
            self.timestamp,
            &self.prev_frame_hash,
            &self.transactions,
            &self.state_hash,
        )?;
        if expected != self.hash {
            return Err(EntityError::ConsensusDivergence {
                height: self.height,
                expected: short_hex(&self.hash),
                got: short_hex(&expected),
            });
        }
        Ok(())
    }

    pub fn context(&self) -> FrameContext {
        FrameContext {
            height: self.height,
            timestamp: self.timestamp,
        }
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            height: self.height,
            timestamp: self.timestamp,
            prev_frame_hash: self.prev_frame_hash,
            state_hash: self.state_hash,
            hash: self.hash,
            tx_count: self.transactions.len(),
        }
    }
}

pub fn tx_hash(tx: &EntityTx) -> Result<Hash, EntityError> {
    let body = serde_json::to_vec(tx)?;
    let mut enc = Encoder::with_domain(TX_HASH_DOMAIN);
    enc.put_bytes(&body);
    Ok(hash(enc.as_bytes()))
}

/// Result of running a frame's transactions against the committed state.
#[derive(Debug, Clone)]
pub struct FrameExecution {
    pub state: EntityState,
    pub outcome: TxOutcome,
    /// Index and reason of every rejected transaction.
    pub rejected: Vec<(usize, String)>,
}

/// Execute `transactions` in order. Rejected transactions are skipped; the
/// frame itself never fails because of one.
pub fn execute_frame(
    prev: &EntityState,
    transactions: &[EntityTx],
    ctx: &FrameContext,
    config: &EngineConfig,
) -> FrameExecution {
    let mut state = prev.clone();
    housekeeping(&mut state, ctx, config);

    let mut outcome = TxOutcome::default();
    let mut rejected = Vec::new();
    for (index, tx) in transactions.iter().enumerate() {
        match apply_tx(&state, tx, ctx, config) {
            Ok((next, out)) => {
                state = next;
                outcome.merge(out);
            }
            Err(e) => {
                tracing::warn!(
                    entity = %state.entity_id,
                    height = ctx.height,
                    tx = tx.name(),
                    error = %e,
                    "transaction rejected"
                );
                outcome.outputs.extend(rejection_output(&state, tx));
                rejected.push((index, e.to_string()));
            }
        }
    }
    state.height = ctx.height;
    state.timestamp = ctx.timestamp;

    FrameExecution {
        state,
        outcome,
        rejected,
    }
}

/// Execute and hash a new frame on top of `prev`.
pub fn build_frame(
    prev: &EntityState,
    prev_frame_hash: Hash,
    transactions: Vec<EntityTx>,
    ctx: &FrameContext,
    config: &EngineConfig,
) -> Result<(Frame, FrameExecution), EntityError> {
    let execution = execute_frame(prev, &transactions, ctx, config);
    let state_hash = execution.state.state_hash()?;
    let hash = Frame::compute_hash(ctx.height, ctx.timestamp, &prev_frame_hash, &transactions, &state_hash)?;
    let frame = Frame {
        height: ctx.height,
        timestamp: ctx.timestamp,
        prev_frame_hash,
        transactions,
        state_hash,
        hash,
    };
    Ok((frame, execution))
}
