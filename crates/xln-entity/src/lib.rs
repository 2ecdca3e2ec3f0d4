//! XLN Entity Consensus
//!
//! An entity is a quorum of weighted validators that agree, frame by frame,
//! on a deterministic state: its bilateral accounts, its reserve mirror and
//! its jurisdiction batch. This crate holds the transaction set, frame
//! execution and the per-validator replica that runs consensus rounds.

pub mod error;
pub mod frame;
pub mod handlers;
pub mod replica;
pub mod round;
pub mod state;
pub mod tx;

pub use error::{EntityError, TxError};
pub use frame::{build_frame, execute_frame, tx_hash, Frame, FrameExecution, FrameHeader};
pub use handlers::{apply_tx, housekeeping, rejection_output};
pub use replica::{Replica, ReplicaAction, ReplicaMessage, ReplicaSnapshot, Submission, FRAME_CHAIN_CAP};
pub use round::{RoundEvent, RoundPhase, RoundStateMachine};
pub use state::EntityState;
pub use tx::{BatchSubmission, EntityOutput, EntityTx, FrameContext, TxOutcome};
