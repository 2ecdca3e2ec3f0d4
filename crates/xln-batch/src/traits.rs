use async_trait::async_trait;
use tokio::sync::broadcast;
use xln_core::EntityId;

use crate::error::BatchError;
use crate::types::JurisdictionEvent;

/// Jurisdiction adapter interface.
///
/// Each implementation bridges entity batches to a concrete depository
/// (an EVM contract, an in-memory ledger for tests and local runs).
#[async_trait]
pub trait Jurisdiction: Send + Sync {
    /// Submit a frozen batch with the entity's aggregate signature (hanko bytes).
    ///
    /// Returns the transaction hash. The outcome arrives later as a
    /// `BatchProcessed` event.
    async fn submit_tx(
        &self,
        encoded_batch: &[u8],
        provider: &EntityId,
        aggregate_signature: &[u8],
        entity_nonce: u64,
    ) -> Result<String, BatchError>;

    /// Subscribe to events emitted after this call.
    fn subscribe(&self) -> broadcast::Receiver<JurisdictionEvent>;

    /// Unique identifier of this adapter (e.g. "jurisdiction-internal").
    fn jurisdiction_id(&self) -> &str;
}
