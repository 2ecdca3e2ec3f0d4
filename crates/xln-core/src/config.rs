use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Address;

/// Statically agreed engine parameters.
///
/// Every validator of an entity must run with the same values; they are part
/// of the deterministic path and are never read from a live source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a proposed round may wait for quorum before it is abandoned (ms).
    pub round_timeout_ms: u64,
    /// Age after which a `Sent` batch without confirmation is marked failed (ms).
    pub batch_max_age_ms: u64,
    /// Number of terminal batches kept in the batch history.
    pub batch_history_cap: usize,
    /// Time a dispute must stay open before it can be finalized (ms).
    pub dispute_timeout_ms: u64,
    /// Maximum number of transactions taken into one frame.
    pub max_frame_txs: usize,
    /// Jurisdiction parameters that enter the batch hash.
    pub jurisdiction: JurisdictionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round_timeout_ms: 5_000,
            batch_max_age_ms: 600_000,
            batch_history_cap: 20,
            dispute_timeout_ms: 86_400_000,
            max_frame_txs: 256,
            jurisdiction: JurisdictionConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.batch_history_cap == 0 {
            return Err(CoreError::InvalidConfig("batch_history_cap must be at least 1".into()));
        }
        if self.max_frame_txs == 0 {
            return Err(CoreError::InvalidConfig("max_frame_txs must be at least 1".into()));
        }
        if self.round_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig("round_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Identity of the on-chain jurisdiction a batch is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JurisdictionConfig {
    /// EVM chain id.
    pub chain_id: u64,
    /// Depository contract address, hex encoded (with or without `0x`).
    pub depository_address: String,
}

impl Default for JurisdictionConfig {
    fn default() -> Self {
        Self {
            chain_id: 31337,
            depository_address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".into(),
        }
    }
}

impl JurisdictionConfig {
    /// Parse the depository address into its 20 raw bytes.
    pub fn depository(&self) -> Result<Address, CoreError> {
        let trimmed = self
            .depository_address
            .strip_prefix("0x")
            .unwrap_or(&self.depository_address);
        let bytes = hex::decode(trimmed)
            .map_err(|e| CoreError::InvalidConfig(format!("depository address: {}", e)))?;
        bytes.as_slice().try_into().map_err(|_| {
            CoreError::InvalidConfig(format!(
                "depository address must be 20 bytes, got {}",
                bytes.len()
            ))
        })
    }
}
