//! XLN Batch Layer
//!
//! Accumulates an entity's on-chain operations into a jurisdiction batch,
//! drives the batch through its lifecycle (accumulate, sign, submit, confirm
//! or fail, retry) and defines the pluggable jurisdiction adapters that
//! execute batches.

pub mod adapters;
pub mod codec;
pub mod error;
pub mod ops;
pub mod state;
pub mod status;
pub mod traits;
pub mod types;

pub use adapters::InternalJurisdiction;
pub use codec::{batch_hash, decode_batch, encode_batch, BATCH_CODEC_VERSION};
pub use error::BatchError;
pub use ops::BatchOp;
pub use state::{BatchState, ProcessedOutcome};
pub use status::{BatchEvent, BatchStateMachine, BatchStatus};
pub use traits::Jurisdiction;
pub use types::{AccountSettlement, BatchOutcome, CompletedBatch, JurisdictionEvent};
