use serde::{Deserialize, Serialize};
use xln_account::{AccountOp, AccountProposal, Cosignature, ProposalKind, Rejection, SignedProposal};
use xln_batch::{BatchOp, JurisdictionEvent};
use xln_core::{EntityId, Hash, HashToSign};
use xln_crypto::{KeyPair, PublicKey};

/// Every transaction an entity can order into a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityTx {
    /// Open a bilateral account. `counterparty_key` is the key the
    /// counterparty signs bilateral messages with.
    AccountOpen {
        counterparty: EntityId,
        counterparty_key: PublicKey,
    },
    /// Propose a bilateral transition: an account frame (credit limits,
    /// payments, executor changes, rebalance requests) or a settlement.
    SettlementPropose {
        counterparty: EntityId,
        kind: ProposalKind,
        ops: Vec<AccountOp>,
    },
    /// The counterparty's signed proposal, to be co-signed.
    SettlementCosign {
        from: EntityId,
        signed: SignedProposal,
    },
    /// The counterparty's co-signature of our pending proposal.
    SettlementCommit {
        from: EntityId,
        cosignature: Cosignature,
    },
    /// The counterparty refused to co-sign our pending proposal.
    SettlementReject {
        from: EntityId,
        rejection: Rejection,
    },
    DisputeStart {
        counterparty: EntityId,
    },
    DisputeFinalize {
        counterparty: EntityId,
    },
    BatchAppendOp {
        op: BatchOp,
    },
    BatchBroadcast,
    /// Re-submit a failed batch, or re-request the hanko of a sent one.
    BatchRetry,
    BatchClear,
    /// An on-chain event observed by the jurisdiction adapter.
    Jurisdiction(JurisdictionEvent),
}

impl EntityTx {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AccountOpen { .. } => "account_open",
            Self::SettlementPropose { .. } => "settlement_propose",
            Self::SettlementCosign { .. } => "settlement_cosign",
            Self::SettlementCommit { .. } => "settlement_commit",
            Self::SettlementReject { .. } => "settlement_reject",
            Self::DisputeStart { .. } => "dispute_start",
            Self::DisputeFinalize { .. } => "dispute_finalize",
            Self::BatchAppendOp { .. } => "batch_append_op",
            Self::BatchBroadcast => "batch_broadcast",
            Self::BatchRetry => "batch_retry",
            Self::BatchClear => "batch_clear",
            Self::Jurisdiction(_) => "jurisdiction_event",
        }
    }
}

/// Replicated inputs a handler may read besides the state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    pub height: u64,
    /// Proposer-chosen frame timestamp (ms).
    pub timestamp: u64,
}

/// Unsigned bilateral message. The proposer replica signs it with the
/// entity account key after the frame commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityOutput {
    Proposal {
        to: EntityId,
        proposal: AccountProposal,
        post_state: Hash,
    },
    Cosignature {
        to: EntityId,
        proposal: AccountProposal,
        post_state: Hash,
    },
    /// A proposal from `to` that could not be co-signed.
    Rejection {
        to: EntityId,
        proposal: AccountProposal,
    },
}

impl EntityOutput {

    /// Sign with the sending entity's account key, producing the
    /// transaction the recipient orders into its own frame.
    pub fn sign(self, from: &EntityId, keypair: &KeyPair) -> (EntityId, EntityTx) {
        match self {
            Self::Proposal {
                to,
                proposal,
                post_state,
            } => (
                to,
                EntityTx::SettlementCosign {
                    from: from.clone(),
                    signed: SignedProposal::sign(proposal, &post_state, keypair),
                },
            ),
            Self::Cosignature {
                to,
                proposal,
                post_state,
            } => (
                to,
                EntityTx::SettlementCommit {
                    from: from.clone(),
                    cosignature: Cosignature::sign(&proposal, &post_state, keypair),
                },
            ),
            Self::Rejection { to, proposal } => (
                to,
                EntityTx::SettlementReject {
                    from: from.clone(),
                    rejection: Rejection::sign(&proposal, keypair),
                },
            ),
        }
    }
}

/// A frozen batch waiting for its hanko before submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub batch_hash: Hash,
    pub encoded_batch: Vec<u8>,
    pub entity_nonce: u64,
}

/// Side effects of one transaction, collected across a frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub outputs: Vec<EntityOutput>,
    pub jurisdiction_outputs: Vec<BatchSubmission>,
    pub hashes_to_sign: Vec<HashToSign>,
}

impl TxOutcome {
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty() && self.jurisdiction_outputs.is_empty() && self.hashes_to_sign.is_empty()
    }

    /// Append another outcome, keeping each hash to sign once.
    pub fn merge(&mut self, other: TxOutcome) {
        self.outputs.extend(other.outputs);
        self.jurisdiction_outputs.extend(other.jurisdiction_outputs);
        for h in other.hashes_to_sign {
            if !self.hashes_to_sign.iter().any(|x| x.hash == h.hash && x.kind == h.kind) {
                self.hashes_to_sign.push(h);
            }
        }
    }
}
