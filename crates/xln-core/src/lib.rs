pub mod codec;
pub mod config;
pub mod error;
pub mod types;

pub use codec::{Decoder, Encoder};
pub use config::{EngineConfig, JurisdictionConfig};
pub use error::CoreError;
pub use types::{
    canonical_pair, short_hex, Address, EntityId, Hash, HashToSign, HashType, Quorum,
    QuorumMember, Side, TokenId, ValidatorId, ZERO_HASH,
};
