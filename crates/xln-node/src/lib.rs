//! XLN Node
//!
//! Hosts entity replicas in one process, routes their consensus traffic,
//! feeds jurisdiction events back into entity consensus and persists
//! replica snapshots in RocksDB.

pub mod config;
pub mod node;
pub mod runtime;
pub mod storage;

pub use config::XlnConfig;
pub use node::XlnNode;
pub use runtime::{Runtime, StepReport};
pub use storage::Storage;
