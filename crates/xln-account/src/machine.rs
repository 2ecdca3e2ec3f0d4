use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xln_core::{canonical_pair, short_hex, EntityId, Hash, HashType, Side, TokenId};
use xln_crypto::{verify_hash, PublicKey, Signature};

use crate::delta::{to_i128, Delta};
use crate::error::AccountError;
use crate::proposal::{
    AccountOp, AccountProposal, Cosignature, DisputeFinalization, DisputeProof, FinalDisputeProof,
    ProposalKind, Rejection, SettlementDiff, SettlementOp, SignedProposal, TokenSettlement,
};

/// Proposal awaiting the counterparty's co-signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingProposal {
    pub proposal: AccountProposal,
    /// Dispute-proof hash of the state the proposal leads to.
    pub post_state: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveDispute {
    pub dispute_hash: Hash,
    /// Earliest timestamp (ms) at which the dispute may be finalized.
    pub dispute_timeout: u64,
    /// Nonce carried by the submitted proof.
    pub nonce: u64,
    pub finalize_requested: bool,
}

/// Last on-chain facts observed for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainState {
    pub ondelta: i128,
    pub settled_nonce: u64,
}

/// One entity's copy of a bilateral account.
///
/// Both parties store the account in canonical left/right form, so the two
/// copies of an account compare equal apart from `side` and the local
/// bookkeeping fields (`pending`, `counterparty_key`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMachine {
    pub left: EntityId,
    pub right: EntityId,
    /// Side occupied by the entity holding this copy.
    pub side: Side,
    pub counterparty_key: PublicKey,
    /// Off-chain account-frame counter.
    pub height: u64,
    /// Unified on-chain proof counter (settlements and disputes).
    pub nonce: u64,
    pub deltas: BTreeMap<TokenId, Delta>,
    pub executor: Side,
    pub requested_rebalance: BTreeMap<TokenId, u128>,
    pub pending: Option<PendingProposal>,
    /// Counterparty's dispute signature over the current state.
    pub counterparty_dispute_signature: Option<Signature>,
    pub dispute: Option<ActiveDispute>,
    pub onchain: BTreeMap<TokenId, OnchainState>,
}

impl AccountMachine {
    pub fn open(
        owner: &EntityId,
        counterparty: &EntityId,
        counterparty_key: PublicKey,
    ) -> Result<Self, AccountError> {
        if owner == counterparty {
            return Err(AccountError::SelfAccount);
        }
        let (left, right) = canonical_pair(owner, counterparty);
        Ok(Self {
            left,
            right,
            side: Side::of(owner, counterparty),
            counterparty_key,
            height: 0,
            nonce: 0,
            deltas: BTreeMap::new(),
            executor: Side::Left,
            requested_rebalance: BTreeMap::new(),
            pending: None,
            counterparty_dispute_signature: None,
            dispute: None,
            onchain: BTreeMap::new(),
        })
    }

    pub fn owner(&self) -> &EntityId {
        match self.side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn counterparty(&self) -> &EntityId {
        match self.side {
            Side::Left => &self.right,
            Side::Right => &self.left,
        }
    }

    pub fn delta(&self, token_id: TokenId) -> Option<&Delta> {
        self.deltas.get(&token_id)
    }

    /// Counter the given proposal kind consumes.
    pub fn counter(&self, kind: ProposalKind) -> u64 {
        match kind {
            ProposalKind::Frame => self.height,
            ProposalKind::Settlement => self.nonce,
        }
    }

    pub fn dispute_proof(&self) -> DisputeProof {
        DisputeProof {
            left: self.left.clone(),
            right: self.right.clone(),
            nonce: self.nonce,
            height: self.height,
            deltas: self.deltas.values().cloned().collect(),
        }
    }

    /// Build a proposal from this side at the current counter.
    ///
    /// Returns the proposal and the dispute-proof hash of the state it leads
    /// to; both get signed by the entity's account key before sending.
    pub fn propose(
        &mut self,
        kind: ProposalKind,
        ops: Vec<AccountOp>,
    ) -> Result<(AccountProposal, Hash), AccountError> {
        if self.dispute.is_some() {
            return Err(AccountError::AccountInDispute);
        }
        if self.pending.is_some() {
            return Err(AccountError::ProposalPending);
        }
        if kind == ProposalKind::Settlement && self.side != self.executor {
            return Err(AccountError::Unauthorized {
                side: self.side,
                action: "propose a settlement".into(),
            });
        }

        let proposal = AccountProposal {
            left: self.left.clone(),
            right: self.right.clone(),
            kind,
            sequence: self.counter(kind),
            proposer: self.side,
            ops,
        };
        let post_state = self.apply_proposal(&proposal)?.dispute_proof().hash();

        tracing::debug!(
            left = %self.left,
            right = %self.right,
            kind = ?kind,
            sequence = proposal.sequence,
            "account proposal created"
        );
        self.pending = Some(PendingProposal {
            proposal: proposal.clone(),
            post_state,
        });
        Ok((proposal, post_state))
    }

    /// Drop this side's pending proposal, if any.
    pub fn cancel_pending(&mut self) -> Option<AccountProposal> {
        self.pending.take().map(|p| p.proposal)
    }

    /// Drop the pending proposal the counterparty refused to co-sign.
    pub fn reject_pending(&mut self, rejection: &Rejection) -> Result<AccountProposal, AccountError> {
        let pending = self.pending.as_ref().ok_or(AccountError::NoPendingProposal)?;
        if rejection.proposal_hash != pending.proposal.hash() || rejection.kind != pending.proposal.kind {
            return Err(AccountError::ProposalMismatch);
        }
        rejection.verify(&self.counterparty_key)?;
        let dropped = self.cancel_pending().ok_or(AccountError::NoPendingProposal)?;
        tracing::info!(
            left = %self.left,
            right = %self.right,
            kind = ?dropped.kind,
            sequence = dropped.sequence,
            "pending proposal rejected by counterparty"
        );
        Ok(dropped)
    }

    /// Accept the counterparty's signed proposal.
    ///
    /// Returns the dispute-proof hash of the new state, which the caller
    /// signs into the [`Cosignature`] sent back to the proposer.
    pub fn cosign(&mut self, signed: &SignedProposal) -> Result<Hash, AccountError> {
        let proposal = &signed.proposal;
        if self.dispute.is_some() {
            return Err(AccountError::AccountInDispute);
        }
        if proposal.proposer != self.side.other() {
            return Err(AccountError::Unauthorized {
                side: proposal.proposer,
                action: "co-sign its own proposal".into(),
            });
        }
        self.check_sequence(proposal)?;
        if self.pending.is_some() && self.side == Side::Left {
            return Err(AccountError::ProposalConflict);
        }
        signed.verify_proposal(&self.counterparty_key)?;

        let mut next = self.apply_proposal(proposal)?;
        let post_state = next.dispute_proof().hash();
        verify_hash(
            HashType::Dispute,
            &post_state,
            &signed.dispute_signature,
            &self.counterparty_key,
        )?;

        if let Some(dropped) = next.pending.take() {
            tracing::info!(
                left = %self.left,
                right = %self.right,
                sequence = dropped.proposal.sequence,
                "dropping own proposal in favour of left side"
            );
        }
        next.counterparty_dispute_signature = Some(signed.dispute_signature.clone());
        *self = next;

        tracing::debug!(
            left = %self.left,
            right = %self.right,
            height = self.height,
            nonce = self.nonce,
            state = %short_hex(&post_state),
            "account proposal co-signed"
        );
        Ok(post_state)
    }

    /// Apply the pending proposal once the counterparty has co-signed it.
    ///
    /// A settlement commit yields the [`SettlementOp`] the executor puts in
    /// its batch.
    pub fn commit(&mut self, cosig: &Cosignature) -> Result<Option<SettlementOp>, AccountError> {
        let pending = self.pending.as_ref().ok_or(AccountError::NoPendingProposal)?;
        let proposal_hash = pending.proposal.hash();
        if cosig.proposal_hash != proposal_hash || cosig.kind != pending.proposal.kind {
            return Err(AccountError::ProposalMismatch);
        }
        verify_hash(
            pending.proposal.kind.signing_kind(),
            &proposal_hash,
            &cosig.signature,
            &self.counterparty_key,
        )?;
        verify_hash(
            HashType::Dispute,
            &pending.post_state,
            &cosig.dispute_signature,
            &self.counterparty_key,
        )?;

        let proposal = pending.proposal.clone();
        let mut next = self.apply_proposal(&proposal)?;
        next.pending = None;
        next.counterparty_dispute_signature = Some(cosig.dispute_signature.clone());
        *self = next;

        tracing::info!(
            left = %self.left,
            right = %self.right,
            kind = ?proposal.kind,
            height = self.height,
            nonce = self.nonce,
            "account proposal committed"
        );

        if proposal.kind == ProposalKind::Settlement && self.side == self.executor {
            return Ok(Some(SettlementOp {
                left: self.left.clone(),
                right: self.right.clone(),
                nonce: proposal.sequence,
                diffs: proposal.settlement_diffs(),
                counterparty_signature: cosig.signature.clone(),
            }));
        }
        Ok(None)
    }

    /// Take the latest co-signed state on-chain.
    pub fn start_dispute(
        &mut self,
        now: u64,
        timeout_ms: u64,
    ) -> Result<FinalDisputeProof, AccountError> {
        if self.dispute.is_some() {
            return Err(AccountError::AccountInDispute);
        }
        let signature = self
            .counterparty_dispute_signature
            .clone()
            .ok_or(AccountError::NoDisputeProof)?;
        let proof = self.dispute_proof();
        let dispute_hash = proof.hash();

        self.dispute = Some(ActiveDispute {
            dispute_hash,
            dispute_timeout: now.saturating_add(timeout_ms),
            nonce: proof.nonce,
            finalize_requested: false,
        });
        self.nonce += 1;
        self.pending = None;

        tracing::warn!(
            left = %self.left,
            right = %self.right,
            nonce = proof.nonce,
            dispute = %short_hex(&dispute_hash),
            "dispute started"
        );
        Ok(FinalDisputeProof {
            proof,
            signer: self.side.other(),
            signature,
        })
    }

    pub fn finalize_dispute(&mut self, now: u64) -> Result<DisputeFinalization, AccountError> {
        let dispute = self.dispute.as_mut().ok_or(AccountError::NoActiveDispute)?;
        if dispute.finalize_requested {
            return Err(AccountError::DisputeFinalizing);
        }
        if now < dispute.dispute_timeout {
            return Err(AccountError::DisputeNotExpired {
                now,
                timeout: dispute.dispute_timeout,
            });
        }
        dispute.finalize_requested = true;
        Ok(DisputeFinalization {
            left: self.left.clone(),
            right: self.right.clone(),
            nonce: dispute.nonce,
            dispute_hash: dispute.dispute_hash,
        })
    }

    /// Apply on-chain facts reported for this account.
    ///
    /// `nonce` is the account's on-chain nonce after the reported operation.
    pub fn observe_settlement(&mut self, tokens: &[TokenSettlement], nonce: u64) {
        self.record_onchain(tokens, nonce);
        if self.dispute.as_ref().is_some_and(|d| nonce > d.nonce) {
            tracing::info!(left = %self.left, right = %self.right, nonce, "dispute resolved on-chain");
            self.dispute = None;
        }
    }

    /// Apply on-chain facts for an account the counterparty took to dispute.
    ///
    /// `nonce` is the on-chain nonce after the dispute opened, one past the
    /// nonce of the submitted proof.
    pub fn observe_dispute(
        &mut self,
        tokens: &[TokenSettlement],
        dispute_hash: Hash,
        nonce: u64,
        now: u64,
        timeout_ms: u64,
    ) {
        self.record_onchain(tokens, nonce);
        if self.dispute.as_ref().is_some_and(|d| d.dispute_hash == dispute_hash) {
            return;
        }
        self.dispute = Some(ActiveDispute {
            dispute_hash,
            dispute_timeout: now.saturating_add(timeout_ms),
            nonce: nonce.saturating_sub(1),
            finalize_requested: false,
        });
        self.pending = None;
        tracing::warn!(
            left = %self.left,
            right = %self.right,
            nonce,
            dispute = %short_hex(&dispute_hash),
            "counterparty started a dispute"
        );
    }

    fn record_onchain(&mut self, tokens: &[TokenSettlement], nonce: u64) {
        for token in tokens {
            self.onchain.insert(
                token.token_id,
                OnchainState {
                    ondelta: token.ondelta,
                    settled_nonce: nonce,
                },
            );
            let delta = self
                .deltas
                .entry(token.token_id)
                .or_insert_with(|| Delta::new(token.token_id));
            let mut candidate = delta.clone();
            candidate.collateral = token.collateral;
            match candidate.check() {
                Ok(()) => *delta = candidate,
                Err(e) => tracing::warn!(
                    left = %self.left,
                    right = %self.right,
                    token_id = token.token_id,
                    error = %e,
                    "ignoring on-chain collateral that breaks the credit line"
                ),
            }
        }

        if nonce > self.nonce {
            self.nonce = nonce;
        }
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.proposal.kind == ProposalKind::Settlement && p.proposal.sequence < self.nonce)
        {
            self.pending = None;
        }
    }

    /// The state this account would be in after `proposal`. Never mutates.
    pub fn apply_proposal(&self, proposal: &AccountProposal) -> Result<AccountMachine, AccountError> {
        if proposal.left != self.left || proposal.right != self.right {
            return Err(AccountError::WrongAccount(format!(
                "{}/{}",
                proposal.left, proposal.right
            )));
        }
        self.check_sequence(proposal)?;
        check_ops_match_kind(proposal)?;

        let mut next = self.clone();
        for op in &proposal.ops {
            next.apply_op(proposal.proposer, op)?;
        }
        for delta in next.deltas.values() {
            delta.check()?;
        }
        match proposal.kind {
            ProposalKind::Frame => next.height = proposal.sequence + 1,
            ProposalKind::Settlement => next.nonce = proposal.sequence + 1,
        }
        Ok(next)
    }

    fn check_sequence(&self, proposal: &AccountProposal) -> Result<(), AccountError> {
        let expected = self.counter(proposal.kind);
        if proposal.sequence != expected {
            return Err(AccountError::InvalidNonce {
                expected,
                got: proposal.sequence,
            });
        }
        Ok(())
    }

    fn delta_mut(&mut self, token_id: TokenId) -> &mut Delta {
        self.deltas
            .entry(token_id)
            .or_insert_with(|| Delta::new(token_id))
    }

    fn apply_op(&mut self, proposer: Side, op: &AccountOp) -> Result<(), AccountError> {
        match op {
            AccountOp::SetCreditLimit { token_id, side, limit } => {
                if *side != proposer {
                    return Err(AccountError::Unauthorized {
                        side: proposer,
                        action: "set the other side's credit limit".into(),
                    });
                }
                let delta = self.delta_mut(*token_id);
                match side {
                    Side::Left => delta.left_credit_limit = *limit,
                    Side::Right => delta.right_credit_limit = *limit,
                }
            }
            AccountOp::Payment { token_id, from, amount } => {
                if *amount == 0 {
                    return Err(AccountError::InvalidOp("payment amount must be positive".into()));
                }
                if *from != proposer {
                    return Err(AccountError::Unauthorized {
                        side: proposer,
                        action: "pay on behalf of the other side".into(),
                    });
                }
                let amount = to_i128(*token_id, *amount)?;
                let delta = self.delta_mut(*token_id);
                match from {
                    Side::Left => delta.shift(amount)?,
                    Side::Right => delta.shift(-amount)?,
                }
            }
            AccountOp::SetExecutor { side } => self.executor = *side,
            AccountOp::RequestRebalance { token_id, amount } => {
                if *amount == 0 {
                    self.requested_rebalance.remove(token_id);
                } else {
                    self.requested_rebalance.insert(*token_id, *amount);
                }
            }
            AccountOp::Settle { diffs } => {
                if proposer != self.executor {
                    return Err(AccountError::Unauthorized {
                        side: proposer,
                        action: "settle".into(),
                    });
                }
                for diff in diffs {
                    self.apply_settlement_diff(diff)?;
                }
            }
        }
        Ok(())
    }

    fn apply_settlement_diff(&mut self, diff: &SettlementDiff) -> Result<(), AccountError> {
        let token_id = diff.token_id;
        let sum = diff
            .left_reserve_diff
            .checked_add(diff.right_reserve_diff)
            .and_then(|s| s.checked_add(diff.collateral_diff))
            .ok_or(AccountError::Overflow(token_id))?;
        if sum != 0 {
            return Err(AccountError::ConservationViolation(token_id));
        }

        let delta = self.delta_mut(token_id);
        let collateral = to_i128(token_id, delta.collateral)?
            .checked_add(diff.collateral_diff)
            .ok_or(AccountError::Overflow(token_id))?;
        if collateral < 0 {
            return Err(AccountError::NegativeCollateral(token_id));
        }
        delta.collateral = collateral as u128;
        delta.shift(diff.offdelta_diff)
    }
}

fn check_ops_match_kind(proposal: &AccountProposal) -> Result<(), AccountError> {
    if proposal.ops.is_empty() {
        return Err(AccountError::InvalidOp("proposal carries no operations".into()));
    }
    let any_settle = proposal.ops.iter().any(AccountOp::is_settlement);
    match proposal.kind {
        ProposalKind::Settlement if proposal.ops.len() != 1 || !any_settle => Err(
            AccountError::InvalidOp("settlement proposals carry exactly one settle operation".into()),
        ),
        ProposalKind::Frame if any_settle => Err(AccountError::InvalidOp(
            "settle operations need a settlement proposal".into(),
        )),
        _ => Ok(()),
    }
}
