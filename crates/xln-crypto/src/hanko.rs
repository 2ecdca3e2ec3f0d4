//! Hanko: weighted, hierarchical aggregate signatures.
//!
//! A hanko proves that a set of quorum members whose summed weight reaches the
//! quorum threshold approved one `(kind, hash)` pair. A member may itself be
//! an entity, in which case its approval is a nested hanko checked against
//! that entity's own quorum.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use xln_core::{short_hex, Decoder, Encoder, Hash, HashType, Quorum, ValidatorId};

use crate::error::CryptoError;
use crate::keys::PublicKey;
use crate::signing::{verify_hash, Signature};

/// Maximum depth of nested entity approvals.
pub const MAX_HANKO_DEPTH: usize = 4;

const HANKO_ENCODING_VERSION: u8 = 1;
const PROOF_SIGNATURE: u8 = 0;
const PROOF_NESTED: u8 = 1;

/// Resolves signer identities during hanko verification.
pub trait SignerResolver {
    /// Public key of a signer that is a plain validator.
    fn public_key(&self, signer: &ValidatorId) -> Option<PublicKey>;

    /// Quorum of a signer that is itself an entity.
    fn entity_quorum(&self, signer: &ValidatorId) -> Option<Quorum>;
}

/// In-memory directory of validator keys and entity quorums.
#[derive(Debug, Clone, Default)]
pub struct SignerDirectory {
    keys: BTreeMap<ValidatorId, PublicKey>,
    entities: BTreeMap<ValidatorId, Quorum>,
}

impl SignerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&mut self, validator: ValidatorId, key: PublicKey) {
        self.keys.insert(validator, key);
    }

    /// Register an entity that can appear as a member of other quorums.
    pub fn insert_entity(&mut self, signer: ValidatorId, quorum: Quorum) {
        self.entities.insert(signer, quorum);
    }

    pub fn key(&self, validator: &ValidatorId) -> Option<&PublicKey> {
        self.keys.get(validator)
    }
}

impl SignerResolver for SignerDirectory {
    fn public_key(&self, signer: &ValidatorId) -> Option<PublicKey> {
        self.keys.get(signer).cloned()
    }

    fn entity_quorum(&self, signer: &ValidatorId) -> Option<Quorum> {
        self.entities.get(signer).cloned()
    }
}

/// Evidence that one quorum member approved the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimProof {
    Signature(Signature),
    Nested(Box<Hanko>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HankoClaim {
    pub signer: ValidatorId,
    pub proof: ClaimProof,
}

/// Aggregate approval of `(kind, hash)` by a weight-satisfying signer set.
/// Claims are kept sorted by signer so the encoding is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hanko {
    pub hash: Hash,
    pub kind: HashType,
    pub claims: Vec<HankoClaim>,
}

impl Hanko {
    pub fn signers(&self) -> impl Iterator<Item = &ValidatorId> {
        self.claims.iter().map(|c| &c.signer)
    }

    /// Verify against `quorum`, returning the accumulated signer weight.
    pub fn verify(&self, quorum: &Quorum, resolver: &dyn SignerResolver) -> Result<u64, CryptoError> {
        self.verify_at_depth(quorum, resolver, 0)
    }

    fn verify_at_depth(
        &self,
        quorum: &Quorum,
        resolver: &dyn SignerResolver,
        depth: usize,
    ) -> Result<u64, CryptoError> {
        if depth > MAX_HANKO_DEPTH {
            return Err(CryptoError::NestingTooDeep(MAX_HANKO_DEPTH));
        }

        let mut seen = BTreeSet::new();
        let mut weight: u64 = 0;
        for claim in &self.claims {
            if !seen.insert(&claim.signer) {
                return Err(CryptoError::DuplicateSigner(claim.signer.clone()));
            }
            let member_weight = quorum
                .weight_of(&claim.signer)
                .ok_or_else(|| CryptoError::UnknownSigner(claim.signer.clone()))?;
            verify_claim(&self.kind, &self.hash, claim, resolver, depth)?;
            weight = weight.saturating_add(member_weight);
        }

        if weight < quorum.threshold() {
            return Err(CryptoError::InsufficientWeight {
                have: weight,
                need: quorum.threshold(),
            });
        }
        Ok(weight)
    }

    /// Canonical byte encoding, used as the on-chain aggregate signature.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u8(HANKO_ENCODING_VERSION);
        self.encode_into(&mut enc);
        enc.finish()
    }

    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_hash(&self.hash)
            .put_u8(self.kind.tag())
            .put_u32(self.claims.len() as u32);
        for claim in &self.claims {
            enc.put_str(claim.signer.as_str());
            match &claim.proof {
                ClaimProof::Signature(sig) => {
                    enc.put_u8(PROOF_SIGNATURE).put_bytes(&sig.to_bytes());
                }
                ClaimProof::Nested(inner) => {
                    enc.put_u8(PROOF_NESTED);
                    inner.encode_into(enc);
                }
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut dec = Decoder::new(bytes);
        let version = dec.u8()?;
        if version != HANKO_ENCODING_VERSION {
            return Err(CryptoError::InvalidInput(format!(
                "unsupported hanko encoding version {}",
                version
            )));
        }
        let hanko = Self::decode_from(&mut dec, 0)?;
        dec.finish()?;
        Ok(hanko)
    }

    fn decode_from(dec: &mut Decoder<'_>, depth: usize) -> Result<Self, CryptoError> {
        if depth > MAX_HANKO_DEPTH {
            return Err(CryptoError::NestingTooDeep(MAX_HANKO_DEPTH));
        }
        let hash = dec.hash()?;
        let kind = HashType::from_tag(dec.u8()?)?;
        let count = dec.u32()?;
        let mut claims = Vec::new();
        for _ in 0..count {
            let signer = ValidatorId(dec.string()?);
            let proof = match dec.u8()? {
                PROOF_SIGNATURE => ClaimProof::Signature(Signature::from_bytes(&dec.bytes()?)?),
                PROOF_NESTED => ClaimProof::Nested(Box::new(Self::decode_from(dec, depth + 1)?)),
                other => {
                    return Err(CryptoError::InvalidInput(format!(
                        "unknown hanko proof tag {}",
                        other
                    )))
                }
            };
            claims.push(HankoClaim { signer, proof });
        }
        Ok(Self { hash, kind, claims })
    }
}

fn verify_claim(
    kind: &HashType,
    hash: &Hash,
    claim: &HankoClaim,
    resolver: &dyn SignerResolver,
    depth: usize,
) -> Result<(), CryptoError> {
    match &claim.proof {
        ClaimProof::Signature(sig) => {
            let key = resolver
                .public_key(&claim.signer)
                .ok_or_else(|| CryptoError::MissingKey(claim.signer.clone()))?;
            verify_hash(*kind, hash, sig, &key)
        }
        ClaimProof::Nested(inner) => {
            if inner.kind != *kind {
                return Err(CryptoError::HashMismatch {
                    expected_kind: *kind,
                    found_kind: inner.kind,
                });
            }
            if inner.hash != *hash {
                return Err(CryptoError::InvalidInput(format!(
                    "nested hanko of {} covers {}, expected {}",
                    claim.signer,
                    short_hex(&inner.hash),
                    short_hex(hash)
                )));
            }
            let nested_quorum = resolver
                .entity_quorum(&claim.signer)
                .ok_or_else(|| CryptoError::UnknownSigner(claim.signer.clone()))?;
            inner.verify_at_depth(&nested_quorum, resolver, depth + 1)?;
            Ok(())
        }
    }
}

/// Collects approvals for one hash until the quorum threshold is met.
#[derive(Debug, Clone)]
pub struct HankoBuilder {
    kind: HashType,
    hash: Hash,
    claims: BTreeMap<ValidatorId, ClaimProof>,
}

impl HankoBuilder {
    pub fn new(kind: HashType, hash: Hash) -> Self {
        Self {
            kind,
            hash,
            claims: BTreeMap::new(),
        }
    }

    /// Add a validator signature. Re-adding a signer replaces its previous claim.
    pub fn add_signature(&mut self, signer: ValidatorId, signature: Signature) {
        self.claims.insert(signer, ClaimProof::Signature(signature));
    }

    /// Add the approval of a member that is itself an entity.
    pub fn add_nested(&mut self, signer: ValidatorId, hanko: Hanko) {
        self.claims.insert(signer, ClaimProof::Nested(Box::new(hanko)));
    }

    /// Assemble and fully verify the hanko.
    pub fn build(&self, quorum: &Quorum, resolver: &dyn SignerResolver) -> Result<Hanko, CryptoError> {
        let hanko = Hanko {
            hash: self.hash,
            kind: self.kind,
            claims: self
                .claims
                .iter()
                .map(|(signer, proof)| HankoClaim {
                    signer: signer.clone(),
                    proof: proof.clone(),
                })
                .collect(),
        };
        let weight = hanko.verify(quorum, resolver)?;
        tracing::debug!(
            kind = %self.kind,
            hash = %short_hex(&self.hash),
            weight,
            threshold = quorum.threshold(),
            "hanko built"
        );
        Ok(hanko)
    }
}
