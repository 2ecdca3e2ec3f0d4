//! Node configuration loading and management.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use xln_core::{EngineConfig, EntityId, Quorum, TokenId, ValidatorId};
use xln_crypto::{KeyPair, PublicKey};

/// Full configuration for the XLN node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct XlnConfig {
    /// Engine parameters shared by every validator of an entity.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Runtime loop settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Entities hosted by this node, with every validator's signing seed.
    #[serde(default)]
    pub entities: Vec<EntityConfig>,

    /// Initial reserves credited on the in-memory jurisdiction.
    #[serde(default)]
    pub funding: Vec<FundingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Whether replica snapshots are written after every step.
    #[serde(default = "default_true")]
    pub persist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interval between runtime steps (ms).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub id: String,
    pub threshold: u64,
    /// Validators in proposer order; the first one proposes.
    pub validators: Vec<ValidatorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub id: String,
    #[serde(default = "default_weight")]
    pub weight: u64,
    /// Hex-encoded 32-byte ed25519 seed.
    pub seed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingConfig {
    pub entity: String,
    pub token_id: TokenId,
    pub amount: u128,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_tick_interval_ms() -> u64 {
    250
}
fn default_weight() -> u64 {
    1
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl EntityConfig {
    pub fn entity_id(&self) -> EntityId {
        EntityId::from(self.id.as_str())
    }

    pub fn quorum(&self) -> anyhow::Result<Quorum> {
        let members = self
            .validators
            .iter()
            .map(|v| (ValidatorId::from(v.id.as_str()), v.weight))
            .collect();
        Quorum::new(members, self.threshold).with_context(|| format!("entity {}", self.id))
    }

    pub fn keypair(&self, validator: &ValidatorConfig) -> anyhow::Result<KeyPair> {
        KeyPair::from_hex_seed(&validator.seed)
            .with_context(|| format!("seed of validator {} in entity {}", validator.id, self.id))
    }

    pub fn validator_keys(&self) -> anyhow::Result<Vec<(ValidatorId, PublicKey)>> {
        self.validators
            .iter()
            .map(|v| Ok((ValidatorId::from(v.id.as_str()), self.keypair(v)?.public_key())))
            .collect()
    }
}

impl XlnConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: XlnConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Starter config with two single-signer entities and fresh random seeds.
    pub fn template() -> Self {
        let entity = |name: &str| EntityConfig {
            id: name.into(),
            threshold: 1,
            validators: vec![ValidatorConfig {
                id: format!("{}-v0", name),
                weight: 1,
                seed: hex::encode(rand::random::<[u8; 32]>()),
            }],
        };
        Self {
            entities: vec![entity("alice"), entity("bob")],
            funding: vec![FundingConfig {
                entity: "alice".into(),
                token_id: 1,
                amount: 1_000_000,
            }],
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.engine.validate()?;
        self.engine.jurisdiction.depository()?;
        if self.runtime.tick_interval_ms == 0 {
            anyhow::bail!("runtime.tick_interval_ms must be positive");
        }
        let mut seen = std::collections::BTreeSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.id.as_str()) {
                anyhow::bail!("entity {} configured twice", entity.id);
            }
            entity.quorum()?;
            entity.validator_keys()?;
        }
        for fund in &self.funding {
            if !seen.contains(fund.entity.as_str()) {
                anyhow::bail!("funding for unknown entity {}", fund.entity);
            }
        }
        Ok(())
    }
}
