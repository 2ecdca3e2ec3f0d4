pub mod error;
pub mod hanko;
pub mod hashing;
pub mod keys;
pub mod signing;

pub use error::CryptoError;
pub use hanko::{ClaimProof, Hanko, HankoBuilder, HankoClaim, SignerDirectory, SignerResolver};
pub use hashing::{hash, merkle_root};
pub use keys::{KeyPair, PublicKey};
pub use signing::{sign, sign_hash, verify, verify_hash, Signature};
