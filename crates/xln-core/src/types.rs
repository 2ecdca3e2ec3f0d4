use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// BLAKE3 digest (32 bytes).
pub type Hash = [u8; 32];

/// On-chain token identifier.
pub type TokenId = u32;

/// 20-byte on-chain address (depository contract, providers).
pub type Address = [u8; 20];

/// The all-zero hash, used as the predecessor of the first frame.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Stable identifier of an entity (account holder, business, multisig group).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    /// Create a new entity id. Empty ids are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::MissingField("entity_id".into()));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of one validator (signer) in an entity's quorum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidatorId(pub String);

impl ValidatorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ValidatorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Side of a bilateral account. The entity with the smaller id is always `Left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// The opposite side.
    pub fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// Wire tag used by the deterministic encoder.
    pub fn tag(self) -> u8 {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    /// Which side `me` occupies in the account between `me` and `other`.
    pub fn of(me: &EntityId, other: &EntityId) -> Self {
        if me < other {
            Self::Left
        } else {
            Self::Right
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Order a pair of entities into canonical `(left, right)` form.
pub fn canonical_pair(a: &EntityId, b: &EntityId) -> (EntityId, EntityId) {
    if a < b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Kind of every signable artifact. Signatures are domain-separated by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HashType {
    Frame,
    AccountFrame,
    Dispute,
    Settlement,
    Profile,
    Batch,
}

impl HashType {
    pub const ALL: [HashType; 6] = [
        Self::Frame,
        Self::AccountFrame,
        Self::Dispute,
        Self::Settlement,
        Self::Profile,
        Self::Batch,
    ];

    /// Canonical name, also used as the signing domain tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::AccountFrame => "accountFrame",
            Self::Dispute => "dispute",
            Self::Settlement => "settlement",
            Self::Profile => "profile",
            Self::Batch => "batch",
        }
    }

    /// Wire tag used by the deterministic encoder.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Frame => 1,
            Self::AccountFrame => 2,
            Self::Dispute => 3,
            Self::Settlement => 4,
            Self::Profile => 5,
            Self::Batch => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| CoreError::UnknownHashType(format!("tag {}", tag)))
    }
}

impl FromStr for HashType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownHashType(s.to_string()))
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A hash that needs quorum approval in the same round as the frame carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashToSign {
    pub hash: Hash,
    pub kind: HashType,
    /// Free-form description for logs (e.g. "batch nonce 3").
    pub context: String,
}

impl HashToSign {
    pub fn new(hash: Hash, kind: HashType, context: impl Into<String>) -> Self {
        Self {
            hash,
            kind,
            context: context.into(),
        }
    }
}

/// One weighted member of a quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumMember {
    pub validator: ValidatorId,
    pub weight: u64,
}

/// Weighted validator set of an entity.
///
/// Invariant: `0 < threshold <= sum(weights)`, no duplicate or zero-weight members.
/// The first member is the entity's proposer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quorum {
    members: Vec<QuorumMember>,
    threshold: u64,
}

impl Quorum {
    /// Build a quorum, validating the weight invariant.
    pub fn new(members: Vec<(ValidatorId, u64)>, threshold: u64) -> Result<Self, CoreError> {
        if members.is_empty() {
            return Err(CoreError::InvalidQuorum("quorum has no validators".into()));
        }
        if threshold == 0 {
            return Err(CoreError::InvalidQuorum("threshold must be greater than zero".into()));
        }

        let mut seen = BTreeSet::new();
        let mut total: u64 = 0;
        for (validator, weight) in &members {
            if *weight == 0 {
                return Err(CoreError::InvalidQuorum(format!(
                    "validator {} has zero weight",
                    validator
                )));
            }
            if !seen.insert(validator.clone()) {
                return Err(CoreError::InvalidQuorum(format!(
                    "duplicate validator {}",
                    validator
                )));
            }
            total = total
                .checked_add(*weight)
                .ok_or_else(|| CoreError::InvalidQuorum("total weight overflows u64".into()))?;
        }
        if threshold > total {
            return Err(CoreError::InvalidQuorum(format!(
                "threshold {} exceeds total weight {}",
                threshold, total
            )));
        }

        Ok(Self {
            members: members
                .into_iter()
                .map(|(validator, weight)| QuorumMember { validator, weight })
                .collect(),
            threshold,
        })
    }

    /// Single-validator quorum with threshold 1.
    pub fn single(validator: ValidatorId) -> Self {
        Self {
            members: vec![QuorumMember {
                validator,
                weight: 1,
            }],
            threshold: 1,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn members(&self) -> &[QuorumMember] {
        &self.members
    }

    pub fn validators(&self) -> impl Iterator<Item = &ValidatorId> {
        self.members.iter().map(|m| &m.validator)
    }

    /// The proposer is the first listed validator.
    pub fn proposer(&self) -> &ValidatorId {
        &self.members[0].validator
    }

    /// Weight of a validator, `None` when it is not a member.
    pub fn weight_of(&self, validator: &ValidatorId) -> Option<u64> {
        self.members
            .iter()
            .find(|m| &m.validator == validator)
            .map(|m| m.weight)
    }

    pub fn contains(&self, validator: &ValidatorId) -> bool {
        self.weight_of(validator).is_some()
    }

    pub fn total_weight(&self) -> u64 {
        self.members.iter().map(|m| m.weight).sum()
    }

    /// Sum the weight of a set of signers. Unknown signers contribute nothing
    /// and duplicates are counted once.
    pub fn weight_of_set<'a>(&self, signers: impl IntoIterator<Item = &'a ValidatorId>) -> u64 {
        let unique: BTreeSet<&ValidatorId> = signers.into_iter().collect();
        unique.into_iter().filter_map(|v| self.weight_of(v)).sum()
    }

    pub fn is_satisfied_by<'a>(&self, signers: impl IntoIterator<Item = &'a ValidatorId>) -> bool {
        self.weight_of_set(signers) >= self.threshold
    }

    pub fn is_single_signer(&self) -> bool {
        self.members.len() == 1
    }
}

/// Render a hash as short hex for logs.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..6])
}
