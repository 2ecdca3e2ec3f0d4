use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use xln_core::{short_hex, Hash, HashToSign, HashType, JurisdictionConfig};

use crate::codec::{batch_hash, encode_batch};
use crate::error::BatchError;
use crate::ops::BatchOp;
use crate::status::{BatchEvent, BatchStateMachine, BatchStatus};
use crate::types::{BatchOutcome, CompletedBatch};

/// What a `BatchProcessed` event did to the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedOutcome {
    Confirmed,
    Failed,
    /// Already handled; nothing changed.
    Duplicate,
    /// From a submission other than the one recorded; ignored.
    Stale,
}

/// An entity's single in-progress batch plus its bounded history.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchState {
    pub status: BatchStatus,
    pub ops: Vec<BatchOp>,
    /// Frozen payload, set on broadcast.
    pub encoded_batch: Option<Vec<u8>>,
    pub batch_hash: Option<Hash>,
    pub broadcasted_at: Option<u64>,
    pub tx_hash: Option<String>,
    /// On-chain entity nonce the frozen batch is bound to.
    pub entity_nonce: u64,
    pub failed_attempts: u32,
    /// Protocol ops produced while a batch was in flight.
    pub deferred_ops: Vec<BatchOp>,
    pub history: VecDeque<CompletedBatch>,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a user-requested op. Fails with `BatchInFlight` while frozen.
    pub fn append(&mut self, op: BatchOp) -> Result<(), BatchError> {
        if self.status.is_in_flight() {
            return Err(BatchError::BatchInFlight(self.status));
        }
        self.status = BatchStateMachine::transition(self.status, BatchEvent::Append)?;
        self.ops.push(op);
        Ok(())
    }

    /// Queue a protocol-generated op, deferring it while a batch is in flight.
    ///
    /// Returns `true` when the op went into the current batch.
    pub fn push_protocol_op(&mut self, op: BatchOp) -> Result<bool, BatchError> {
        if self.status.is_in_flight() {
            tracing::debug!(op = %op, status = %self.status, "deferring protocol op");
            self.deferred_ops.push(op);
            return Ok(false);
        }
        self.append(op)?;
        Ok(true)
    }

    /// Freeze the batch and return the hash the quorum must sign.
    pub fn broadcast(
        &mut self,
        jurisdiction: &JurisdictionConfig,
        timestamp: u64,
    ) -> Result<HashToSign, BatchError> {
        if self.ops.is_empty() && !self.status.is_in_flight() {
            return Err(BatchError::EmptyBatch);
        }
        let next = BatchStateMachine::transition(self.status, BatchEvent::Broadcast)?;
        let encoded = encode_batch(&self.ops);
        let hash = batch_hash(jurisdiction, &encoded, self.entity_nonce)?;

        self.status = next;
        self.encoded_batch = Some(encoded);
        self.batch_hash = Some(hash);
        self.broadcasted_at = Some(timestamp);
        self.tx_hash = None;
        self.failed_attempts = 0;

        tracing::info!(
            batch = %short_hex(&hash),
            nonce = self.entity_nonce,
            ops = self.ops.len(),
            "batch frozen for signing"
        );
        Ok(self.hash_to_sign(hash))
    }

    /// Record the transaction hash returned by the jurisdiction.
    pub fn on_submitted(&mut self, batch_hash: &Hash, tx_hash: &str) -> bool {
        if self.batch_hash.as_ref() != Some(batch_hash) || !self.status.is_in_flight() {
            tracing::debug!(batch = %short_hex(batch_hash), "submission for a batch no longer in flight");
            return false;
        }
        self.tx_hash = Some(tx_hash.to_string());
        true
    }

    /// Apply a `BatchProcessed` event.
    ///
    /// Repeated events for a batch already archived are ignored, as are
    /// events whose `tx_hash` differs from the submission last recorded.
    #[allow(clippy::too_many_arguments)]
    pub fn on_processed(
        &mut self,
        batch_hash: &Hash,
        tx_hash: &str,
        success: bool,
        block_number: u64,
        gas_used: u64,
        timestamp: u64,
        history_cap: usize,
    ) -> Result<ProcessedOutcome, BatchError> {
        let current = self.batch_hash.as_ref() == Some(batch_hash) && self.status.is_in_flight();
        if !current {
            if self.history.iter().any(|b| &b.batch_hash == batch_hash) {
                tracing::debug!(batch = %short_hex(batch_hash), "duplicate batch outcome ignored");
                return Ok(ProcessedOutcome::Duplicate);
            }
            return Err(BatchError::UnknownBatch(hex::encode(batch_hash)));
        }
        if self.status == BatchStatus::Sent {
            if let Some(recorded) = self.tx_hash.as_deref().filter(|r| *r != tx_hash) {
                tracing::debug!(
                    batch = %short_hex(batch_hash),
                    recorded,
                    observed = tx_hash,
                    "outcome for a superseded submission ignored"
                );
                return Ok(ProcessedOutcome::Stale);
            }
        }

        if success {
            self.status = BatchStateMachine::transition(self.status, BatchEvent::Confirmed)?;
            self.tx_hash = Some(tx_hash.to_string());
            self.archive(
                BatchOutcome::Confirmed {
                    block_number,
                    gas_used,
                },
                timestamp,
                history_cap,
            );
            self.entity_nonce += 1;
            self.reset();
            tracing::info!(
                batch = %short_hex(batch_hash),
                block_number,
                gas_used,
                next_nonce = self.entity_nonce,
                "batch confirmed"
            );
            return Ok(ProcessedOutcome::Confirmed);
        }

        if self.status == BatchStatus::Failed {
            return Ok(ProcessedOutcome::Duplicate);
        }
        self.status = BatchStateMachine::transition(self.status, BatchEvent::Failed)?;
        self.tx_hash = Some(tx_hash.to_string());
        self.failed_attempts += 1;
        tracing::warn!(
            batch = %short_hex(batch_hash),
            attempts = self.failed_attempts,
            "batch failed on-chain"
        );
        Ok(ProcessedOutcome::Failed)
    }

    /// Mark a `Sent` batch older than `max_age_ms` as failed.
    pub fn expire(&mut self, now: u64, max_age_ms: u64) -> bool {
        if self.status != BatchStatus::Sent {
            return false;
        }
        let sent_at = self.broadcasted_at.unwrap_or(0);
        if now.saturating_sub(sent_at) < max_age_ms {
            return false;
        }
        match BatchStateMachine::transition(self.status, BatchEvent::Expired) {
            Ok(next) => {
                self.status = next;
                self.failed_attempts += 1;
                tracing::warn!(nonce = self.entity_nonce, sent_at, now, "batch expired without confirmation");
                true
            }
            Err(_) => false,
        }
    }

    /// Re-send a failed batch with the same frozen payload and hash.
    pub fn retry(&mut self, timestamp: u64) -> Result<HashToSign, BatchError> {
        let next = BatchStateMachine::transition(self.status, BatchEvent::Retry)?;
        let hash = self
            .batch_hash
            .ok_or_else(|| BatchError::UnknownBatch("no frozen batch".into()))?;
        self.status = next;
        self.broadcasted_at = Some(timestamp);
        self.tx_hash = None;
        tracing::info!(batch = %short_hex(&hash), attempts = self.failed_attempts, "retrying batch");
        Ok(self.hash_to_sign(hash))
    }

    /// Re-request the quorum signature for a `Sent` batch.
    pub fn resign(&mut self) -> Result<HashToSign, BatchError> {
        let next = BatchStateMachine::transition(self.status, BatchEvent::Resign)?;
        let hash = self
            .batch_hash
            .ok_or_else(|| BatchError::UnknownBatch("no frozen batch".into()))?;
        self.status = next;
        Ok(self.hash_to_sign(hash))
    }

    /// Drop an accumulating batch or archive a failed one.
    ///
    /// Returns the number of ops discarded.
    pub fn clear(&mut self, timestamp: u64, history_cap: usize) -> Result<usize, BatchError> {
        let was = self.status;
        self.status = BatchStateMachine::transition(self.status, BatchEvent::Clear)?;
        let dropped = self.ops.len();
        if was == BatchStatus::Failed {
            self.archive(
                BatchOutcome::Failed {
                    attempts: self.failed_attempts,
                },
                timestamp,
                history_cap,
            );
        }
        self.reset();
        tracing::info!(from = %was, dropped, "batch cleared");
        Ok(dropped)
    }

    fn hash_to_sign(&self, hash: Hash) -> HashToSign {
        HashToSign::new(
            hash,
            HashType::Batch,
            format!("batch nonce {}", self.entity_nonce),
        )
    }

    fn archive(&mut self, outcome: BatchOutcome, closed_at: u64, history_cap: usize) {
        let Some(batch_hash) = self.batch_hash else {
            return;
        };
        self.history.push_front(CompletedBatch {
            batch_hash,
            tx_hash: self.tx_hash.clone(),
            entity_nonce: self.entity_nonce,
            op_count: self.ops.len(),
            outcome,
            closed_at,
        });
        self.history.truncate(history_cap.max(1));
    }

    /// Back to `Empty`, then promote any deferred protocol ops.
    fn reset(&mut self) {
        self.status = BatchStatus::Empty;
        self.ops.clear();
        self.encoded_batch = None;
        self.batch_hash = None;
        self.broadcasted_at = None;
        self.tx_hash = None;
        self.failed_attempts = 0;
        if !self.deferred_ops.is_empty() {
            self.ops = std::mem::take(&mut self.deferred_ops);
            self.status = BatchStatus::Accumulating;
        }
    }
}
