//! Signed artifacts exchanged between the two sides of an account.

use serde::{Deserialize, Serialize};
use xln_core::{Encoder, EntityId, Hash, HashType, Side, TokenId};
use xln_crypto::{hash, sign_hash, verify_hash, CryptoError, KeyPair, PublicKey, Signature};

use crate::delta::Delta;

/// Which counter a proposal consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalKind {
    /// Off-chain account frame; sequence is the account `height`.
    Frame,
    /// Cooperative settlement; sequence is the unified `nonce`.
    Settlement,
}

impl ProposalKind {
    /// Hash kind the proposer and co-signer sign the proposal under.
    pub fn signing_kind(self) -> HashType {
        match self {
            Self::Frame => HashType::AccountFrame,
            Self::Settlement => HashType::Settlement,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Frame => 1,
            Self::Settlement => 2,
        }
    }
}

/// Per-token change carried by a cooperative settlement.
///
/// Conservation: `left_reserve_diff + right_reserve_diff + collateral_diff == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDiff {
    pub token_id: TokenId,
    pub left_reserve_diff: i128,
    pub right_reserve_diff: i128,
    pub collateral_diff: i128,
    pub offdelta_diff: i128,
}

impl SettlementDiff {
    pub fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u32(self.token_id)
            .put_i128(self.left_reserve_diff)
            .put_i128(self.right_reserve_diff)
            .put_i128(self.collateral_diff)
            .put_i128(self.offdelta_diff);
    }
}

/// A single change to shared account state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountOp {
    /// `side` sets the credit it extends to the other side.
    SetCreditLimit { token_id: TokenId, side: Side, limit: u128 },
    /// `from` pays `amount` to the other side off-chain.
    Payment { token_id: TokenId, from: Side, amount: u128 },
    /// Hand the settlement executor role to `side`.
    SetExecutor { side: Side },
    /// Record a rebalance request; zero clears it.
    RequestRebalance { token_id: TokenId, amount: u128 },
    /// Cooperative settlement diffs (settlement proposals only).
    Settle { diffs: Vec<SettlementDiff> },
}

impl AccountOp {
    pub fn is_settlement(&self) -> bool {
        matches!(self, Self::Settle { .. })
    }

    fn encode_into(&self, enc: &mut Encoder) {
        match self {
            Self::SetCreditLimit { token_id, side, limit } => {
                enc.put_u8(1).put_u32(*token_id).put_u8(side.tag()).put_u128(*limit);
            }
            Self::Payment { token_id, from, amount } => {
                enc.put_u8(2).put_u32(*token_id).put_u8(from.tag()).put_u128(*amount);
            }
            Self::SetExecutor { side } => {
                enc.put_u8(3).put_u8(side.tag());
            }
            Self::RequestRebalance { token_id, amount } => {
                enc.put_u8(4).put_u32(*token_id).put_u128(*amount);
            }
            Self::Settle { diffs } => {
                enc.put_u8(5).put_u32(diffs.len() as u32);
                for diff in diffs {
                    diff.encode_into(enc);
                }
            }
        }
    }
}

/// A proposed transition of shared account state at a given sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProposal {
    pub left: EntityId,
    pub right: EntityId,
    pub kind: ProposalKind,
    /// Must equal the account's current `height` (frames) or `nonce` (settlements).
    pub sequence: u64,
    pub proposer: Side,
    pub ops: Vec<AccountOp>,
}

impl AccountProposal {
    pub fn hash(&self) -> Hash {
        let mut enc = Encoder::with_domain("xln/account-proposal/v1");
        enc.put_entity(&self.left)
            .put_entity(&self.right)
            .put_u8(self.kind.tag())
            .put_u64(self.sequence)
            .put_u8(self.proposer.tag())
            .put_u32(self.ops.len() as u32);
        for op in &self.ops {
            op.encode_into(&mut enc);
        }
        hash(enc.as_bytes())
    }

    /// All settlement diffs carried by the proposal, in order.
    pub fn settlement_diffs(&self) -> Vec<SettlementDiff> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                AccountOp::Settle { diffs } => Some(diffs.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Proposal plus the proposer's signatures over it and over the resulting state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal: AccountProposal,
    pub signature: Signature,
    /// Proposer's dispute signature over the post-transition state.
    pub dispute_signature: Signature,
}

impl SignedProposal {
    pub fn sign(proposal: AccountProposal, post_state: &Hash, keypair: &KeyPair) -> Self {
        let signature = sign_hash(proposal.kind.signing_kind(), &proposal.hash(), keypair);
        let dispute_signature = sign_hash(HashType::Dispute, post_state, keypair);
        Self {
            proposal,
            signature,
            dispute_signature,
        }
    }

    pub fn verify_proposal(&self, key: &PublicKey) -> Result<(), CryptoError> {
        verify_hash(
            self.proposal.kind.signing_kind(),
            &self.proposal.hash(),
            &self.signature,
            key,
        )
    }
}

/// Counterparty's single signature accepting a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cosignature {
    pub proposal_hash: Hash,
    pub kind: ProposalKind,
    pub signature: Signature,
    /// Co-signer's dispute signature over the post-transition state.
    pub dispute_signature: Signature,
}

impl Cosignature {
    pub fn sign(proposal: &AccountProposal, post_state: &Hash, keypair: &KeyPair) -> Self {
        let proposal_hash = proposal.hash();
        Self {
            proposal_hash,
            kind: proposal.kind,
            signature: sign_hash(proposal.kind.signing_kind(), &proposal_hash, keypair),
            dispute_signature: sign_hash(HashType::Dispute, post_state, keypair),
        }
    }
}

/// Counterparty's signed refusal of a proposal it could not co-sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub proposal_hash: Hash,
    pub kind: ProposalKind,
    pub signature: Signature,
}

impl Rejection {
    pub fn sign(proposal: &AccountProposal, keypair: &KeyPair) -> Self {
        let proposal_hash = proposal.hash();
        Self {
            proposal_hash,
            kind: proposal.kind,
            signature: sign_hash(proposal.kind.signing_kind(), &rejection_hash(&proposal_hash), keypair),
        }
    }

    pub fn verify(&self, key: &PublicKey) -> Result<(), CryptoError> {
        verify_hash(
            self.kind.signing_kind(),
            &rejection_hash(&self.proposal_hash),
            &self.signature,
            key,
        )
    }
}

/// Domain-separated from the proposal hash itself.
fn rejection_hash(proposal_hash: &Hash) -> Hash {
    let mut enc = Encoder::with_domain("xln/account-reject/v1");
    enc.put_hash(proposal_hash);
    hash(enc.as_bytes())
}

/// Snapshot of shared account state that either side can take on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeProof {
    pub left: EntityId,
    pub right: EntityId,
    pub nonce: u64,
    pub height: u64,
    pub deltas: Vec<Delta>,
}

impl DisputeProof {
    pub fn hash(&self) -> Hash {
        let mut enc = Encoder::with_domain("xln/dispute-proof/v1");
        enc.put_entity(&self.left)
            .put_entity(&self.right)
            .put_u64(self.nonce)
            .put_u64(self.height)
            .put_u32(self.deltas.len() as u32);
        for delta in &self.deltas {
            delta.encode_into(&mut enc);
        }
        hash(enc.as_bytes())
    }

    pub fn encode_into(&self, enc: &mut Encoder) {
        enc.put_entity(&self.left)
            .put_entity(&self.right)
            .put_u64(self.nonce)
            .put_u64(self.height)
            .put_u32(self.deltas.len() as u32);
        for delta in &self.deltas {
            delta.encode_into(enc);
        }
    }
}

/// Dispute proof with the counterparty's signature, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalDisputeProof {
    pub proof: DisputeProof,
    /// Side whose signature is attached (the counterparty of the submitter).
    pub signer: Side,
    pub signature: Signature,
}

/// Co-signed settlement ready to be included in the executor's batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOp {
    pub left: EntityId,
    pub right: EntityId,
    pub nonce: u64,
    pub diffs: Vec<SettlementDiff>,
    pub counterparty_signature: Signature,
}

impl SettlementOp {
    /// The co-signed proposal this op was committed from, as seen by a verifier
    /// that knows which side submitted it.
    pub fn proposal(&self, proposer: Side) -> AccountProposal {
        AccountProposal {
            left: self.left.clone(),
            right: self.right.clone(),
            kind: ProposalKind::Settlement,
            sequence: self.nonce,
            proposer,
            ops: vec![AccountOp::Settle {
                diffs: self.diffs.clone(),
            }],
        }
    }
}

/// Request to close a dispute after its timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeFinalization {
    pub left: EntityId,
    pub right: EntityId,
    pub nonce: u64,
    pub dispute_hash: Hash,
}

/// Per-token on-chain facts reported for a settled account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSettlement {
    pub token_id: TokenId,
    pub left_reserve: u128,
    pub right_reserve: u128,
    pub collateral: u128,
    pub ondelta: i128,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(sequence: u64) -> AccountProposal {
        AccountProposal {
            left: EntityId::from("alice"),
            right: EntityId::from("bob"),
            kind: ProposalKind::Settlement,
            sequence,
            proposer: Side::Left,
            ops: vec![AccountOp::Settle {
                diffs: vec![SettlementDiff {
                    token_id: 1,
                    left_reserve_diff: -600,
                    right_reserve_diff: 0,
                    collateral_diff: 600,
                    offdelta_diff: 600,
                }],
            }],
        }
    }

    #[test]
    fn test_proposal_hash_covers_sequence() {
        assert_eq!(proposal(0).hash(), proposal(0).hash());
        assert_ne!(proposal(0).hash(), proposal(1).hash());
    }

    #[test]
    fn test_proposal_hash_covers_kind() {
        let mut frame = proposal(0);
        frame.kind = ProposalKind::Frame;
        assert_ne!(frame.hash(), proposal(0).hash());
    }

    #[test]
    fn test_signed_proposal_verifies() {
        let kp = KeyPair::from_seed(&[1u8; 32]);
        let signed = SignedProposal::sign(proposal(0), &[0u8; 32], &kp);
        assert!(signed.verify_proposal(&kp.public_key()).is_ok());
        let other = KeyPair::from_seed(&[2u8; 32]);
        assert!(signed.verify_proposal(&other.public_key()).is_err());
    }

    #[test]
    fn test_settlement_diffs_flatten() {
        assert_eq!(proposal(0).settlement_diffs().len(), 1);
    }

    #[test]
    fn test_dispute_proof_hash_covers_deltas() {
        let mut proof = DisputeProof {
            left: EntityId::from("alice"),
            right: EntityId::from("bob"),
            nonce: 1,
            height: 2,
            deltas: vec![Delta::new(1)],
        };
        let before = proof.hash();
        proof.deltas[0].offdelta = 5;
        assert_ne!(before, proof.hash());
    }
}
