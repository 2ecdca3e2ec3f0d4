use ed25519_dalek::Signer;
use ed25519_dalek::Verifier;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use xln_core::{Hash, HashType};

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};

/// Ed25519 signature (64 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }

    /// Create from raw bytes (64 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_arr: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidInput(format!("signature must be 64 bytes, got {}", bytes.len()))
        })?;
        let inner = ed25519_dalek::Signature::from_bytes(&bytes_arr);
        Ok(Self { inner })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Sign a message using Ed25519.
pub fn sign(message: &[u8], keypair: &KeyPair) -> Signature {
    let sig = keypair.signing_key().sign(message);
    Signature { inner: sig }
}

/// Verify an Ed25519 signature.
pub fn verify(message: &[u8], signature: &Signature, pubkey: &PublicKey) -> Result<(), CryptoError> {
    pubkey
        .verifying_key()
        .verify(message, &signature.inner)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

/// Domain-separated signing payload: `"xln/" || kind || hash`.
fn hash_payload(kind: HashType, hash: &Hash) -> Vec<u8> {
    let tag = kind.as_str().as_bytes();
    let mut payload = Vec::with_capacity(4 + tag.len() + 1 + 32);
    payload.extend_from_slice(b"xln/");
    payload.extend_from_slice(tag);
    payload.push(b'/');
    payload.extend_from_slice(hash);
    payload
}

/// Sign a hash of the given kind. A signature for one kind never verifies as another.
pub fn sign_hash(kind: HashType, hash: &Hash, keypair: &KeyPair) -> Signature {
    sign(&hash_payload(kind, hash), keypair)
}

/// Verify a signature produced by [`sign_hash`].
pub fn verify_hash(
    kind: HashType,
    hash: &Hash,
    signature: &Signature,
    pubkey: &PublicKey,
) -> Result<(), CryptoError> {
    verify(&hash_payload(kind, hash), signature, pubkey)
}
