//! Transaction handlers.
//!
//! Every handler is a pure function of the prior state, the transaction, the
//! replicated frame context and the static engine config. It works on a
//! scratch copy; a rejected transaction leaves the caller's state untouched.

use xln_account::AccountMachine;
use xln_batch::{BatchError, BatchOp, BatchStatus, JurisdictionEvent};
use xln_core::{short_hex, EngineConfig};

use crate::error::TxError;
use crate::state::EntityState;
use crate::tx::{BatchSubmission, EntityOutput, EntityTx, FrameContext, TxOutcome};

/// Apply one transaction, returning the new state and its side effects.
pub fn apply_tx(
    state: &EntityState,
    tx: &EntityTx,
    ctx: &FrameContext,
    config: &EngineConfig,
) -> Result<(EntityState, TxOutcome), TxError> {
    let mut next = state.clone();
    let mut out = TxOutcome::default();

    match tx {
        EntityTx::AccountOpen {
            counterparty,
            counterparty_key,
        } => {
            if next.accounts.contains_key(counterparty) {
                return Err(TxError::AccountExists(counterparty.clone()));
            }
            let account = AccountMachine::open(&next.entity_id, counterparty, counterparty_key.clone())?;
            next.accounts.insert(counterparty.clone(), account);
            tracing::info!(entity = %next.entity_id, counterparty = %counterparty, "account opened");
        }

        EntityTx::SettlementPropose {
            counterparty,
            kind,
            ops,
        } => {
            let (proposal, post_state) = next.account_mut(counterparty)?.propose(*kind, ops.clone())?;
            out.outputs.push(EntityOutput::Proposal {
                to: counterparty.clone(),
                proposal,
                post_state,
            });
        }

        EntityTx::SettlementCosign { from, signed } => {
            let post_state = next.account_mut(from)?.cosign(signed)?;
            out.outputs.push(EntityOutput::Cosignature {
                to: from.clone(),
                proposal: signed.proposal.clone(),
                post_state,
            });
        }

        EntityTx::SettlementCommit { from, cosignature } => {
            let settlement = next.account_mut(from)?.commit(cosignature)?;
            if let Some(op) = settlement {
                let queued = next.batch.push_protocol_op(BatchOp::Settlement(op))?;
                tracing::info!(entity = %next.entity_id, counterparty = %from, queued, "settlement ready for batch");
            }
        }

        EntityTx::SettlementReject { from, rejection } => {
            next.account_mut(from)?.reject_pending(rejection)?;
        }

        EntityTx::DisputeStart { counterparty } => {
            let proof = next
                .account_mut(counterparty)?
                .start_dispute(ctx.timestamp, config.dispute_timeout_ms)?;
            next.batch.push_protocol_op(BatchOp::DisputeStart(proof))?;
        }

        EntityTx::DisputeFinalize { counterparty } => {
            let finalization = next.account_mut(counterparty)?.finalize_dispute(ctx.timestamp)?;
            next.batch.push_protocol_op(BatchOp::DisputeFinalize(finalization))?;
        }

        EntityTx::BatchAppendOp { op } => next.batch.append(op.clone())?,

        EntityTx::BatchBroadcast => {
            let to_sign = next.batch.broadcast(&config.jurisdiction, ctx.timestamp)?;
            out.hashes_to_sign.push(to_sign);
            out.jurisdiction_outputs.push(submission(&next)?);
        }

        EntityTx::BatchRetry => {
            let to_sign = if next.batch.status == BatchStatus::Sent {
                next.batch.resign()?
            } else {
                next.batch.retry(ctx.timestamp)?
            };
            out.hashes_to_sign.push(to_sign);
            out.jurisdiction_outputs.push(submission(&next)?);
        }

        EntityTx::BatchClear => {
            next.batch.clear(ctx.timestamp, config.batch_history_cap)?;
        }

        EntityTx::Jurisdiction(event) => apply_jurisdiction_event(&mut next, event, ctx, config)?,
    }

    tracing::debug!(
        entity = %next.entity_id,
        height = ctx.height,
        tx = tx.name(),
        "transaction applied"
    );
    Ok((next, out))
}

/// Refusal to send back when a `SettlementCosign` from a known account fails,
/// so the proposer can drop its pending proposal.
pub fn rejection_output(state: &EntityState, tx: &EntityTx) -> Option<EntityOutput> {
    match tx {
        EntityTx::SettlementCosign { from, signed } if state.accounts.contains_key(from) => {
            Some(EntityOutput::Rejection {
                to: from.clone(),
                proposal: signed.proposal.clone(),
            })
        }
        _ => None,
    }
}

/// Deterministic work done at the start of every frame.
pub fn housekeeping(state: &mut EntityState, ctx: &FrameContext, config: &EngineConfig) {
    if state.batch.expire(ctx.timestamp, config.batch_max_age_ms) {
        tracing::warn!(entity = %state.entity_id, height = ctx.height, "sent batch expired");
    }
}

fn apply_jurisdiction_event(
    state: &mut EntityState,
    event: &JurisdictionEvent,
    ctx: &FrameContext,
    config: &EngineConfig,
) -> Result<(), TxError> {
    let me = state.entity_id.clone();
    match event {
        JurisdictionEvent::BatchSubmitted {
            entity,
            batch_hash,
            tx_hash,
        } if entity == &me => {
            state.batch.on_submitted(batch_hash, tx_hash);
        }
        JurisdictionEvent::BatchProcessed {
            entity,
            batch_hash,
            tx_hash,
            success,
            block_number,
            gas_used,
        } if entity == &me => {
            let outcome = state.batch.on_processed(
                batch_hash,
                tx_hash,
                *success,
                *block_number,
                *gas_used,
                ctx.timestamp,
                config.batch_history_cap,
            )?;
            tracing::info!(
                entity = %me,
                batch = %short_hex(batch_hash),
                outcome = ?outcome,
                "batch outcome observed"
            );
        }
        JurisdictionEvent::AccountSettled { settlements } => {
            for settlement in settlements.iter().filter(|s| s.left == me || s.right == me) {
                let counterparty = if settlement.left == me {
                    &settlement.right
                } else {
                    &settlement.left
                };
                for token in &settlement.tokens {
                    let reserve = if settlement.left == me {
                        token.left_reserve
                    } else {
                        token.right_reserve
                    };
                    state.reserves.insert(token.token_id, reserve);
                }
                let Some(account) = state.accounts.get_mut(counterparty) else {
                    tracing::debug!(entity = %me, counterparty = %counterparty, "settlement for unknown account");
                    continue;
                };
                match settlement.dispute {
                    Some(dispute_hash) => account.observe_dispute(
                        &settlement.tokens,
                        dispute_hash,
                        settlement.nonce,
                        ctx.timestamp,
                        config.dispute_timeout_ms,
                    ),
                    None => account.observe_settlement(&settlement.tokens, settlement.nonce),
                }
            }
        }
        JurisdictionEvent::ReserveUpdated {
            entity,
            token_id,
            reserve,
        } if entity == &me => {
            state.reserves.insert(*token_id, *reserve);
        }
        _ => tracing::debug!(entity = %me, "jurisdiction event for another entity ignored"),
    }
    Ok(())
}

fn submission(state: &EntityState) -> Result<BatchSubmission, TxError> {
    let batch = &state.batch;
    match (&batch.encoded_batch, batch.batch_hash) {
        (Some(encoded), Some(batch_hash)) => Ok(BatchSubmission {
            batch_hash,
            encoded_batch: encoded.clone(),
            entity_nonce: batch.entity_nonce,
        }),
        _ => Err(BatchError::UnknownBatch("no frozen batch".into()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xln_account::{AccountError, AccountOp, ProposalKind, SettlementDiff};
    use xln_batch::BatchOutcome;
    use xln_core::{EntityId, Hash, HashType, Side};
    use xln_crypto::KeyPair;

    use crate::frame::execute_frame;

    struct Party {
        state: EntityState,
        key: KeyPair,
    }

    impl Party {
        fn new(name: &str, seed: u8) -> Self {
            let key = KeyPair::from_seed(&[seed; 32]);
            Self {
                state: EntityState::new(EntityId::from(name), key.public_key()),
                key,
            }
        }

        fn id(&self) -> EntityId {
            self.state.entity_id.clone()
        }

        fn run_at(&mut self, tx: EntityTx, timestamp: u64) -> Result<TxOutcome, TxError> {
            let ctx = FrameContext {
                height: self.state.height + 1,
                timestamp,
            };
            let (next, out) = apply_tx(&self.state, &tx, &ctx, &EngineConfig::default())?;
            self.state = next;
            Ok(out)
        }

        fn run(&mut self, tx: EntityTx) -> Result<TxOutcome, TxError> {
            self.run_at(tx, 1_000)
        }
    }

    fn opened() -> (Party, Party) {
        let mut alice = Party::new("alice", 1);
        let mut bob = Party::new("bob", 2);
        alice
            .run(EntityTx::AccountOpen {
                counterparty: bob.id(),
                counterparty_key: bob.key.public_key(),
            })
            .unwrap();
        bob.run(EntityTx::AccountOpen {
            counterparty: alice.id(),
            counterparty_key: alice.key.public_key(),
        })
        .unwrap();
        (alice, bob)
    }

    /// Full propose / co-sign / commit round trip. Returns the co-sign tx.
    fn exchange(proposer: &mut Party, cosigner: &mut Party, kind: ProposalKind, ops: Vec<AccountOp>) -> EntityTx {
        let out = proposer
            .run(EntityTx::SettlementPropose {
                counterparty: cosigner.id(),
                kind,
                ops,
            })
            .unwrap();
        let (to, cosign_tx) = out.outputs[0].clone().sign(&proposer.id(), &proposer.key);
        assert_eq!(to, cosigner.id());
        let out = cosigner.run(cosign_tx.clone()).unwrap();
        let (to, commit_tx) = out.outputs[0].clone().sign(&cosigner.id(), &cosigner.key);
        assert_eq!(to, proposer.id());
        proposer.run(commit_tx).unwrap();
        cosign_tx
    }

    fn settle_600() -> Vec<AccountOp> {
        vec![AccountOp::Settle {
            diffs: vec![SettlementDiff {
                token_id: 1,
                left_reserve_diff: -600,
                right_reserve_diff: 0,
                collateral_diff: 600,
                offdelta_diff: 600,
            }],
        }]
    }

    fn credit_and_spend(alice: &mut Party, bob: &mut Party) {
        exchange(
            alice,
            bob,
            ProposalKind::Frame,
            vec![AccountOp::SetCreditLimit {
                token_id: 1,
                side: Side::Left,
                limit: 1_000,
            }],
        );
        exchange(
            bob,
            alice,
            ProposalKind::Frame,
            vec![AccountOp::Payment {
                token_id: 1,
                from: Side::Right,
                amount: 600,
            }],
        );
    }

    fn r2r(amount: u128) -> EntityTx {
        EntityTx::BatchAppendOp {
            op: BatchOp::ReserveToReserve {
                token_id: 1,
                to: EntityId::from("carol"),
                amount,
            },
        }
    }

    fn processed(party: &Party, success: bool) -> EntityTx {
        EntityTx::Jurisdiction(JurisdictionEvent::BatchProcessed {
            entity: party.id(),
            batch_hash: party.state.batch.batch_hash.unwrap(),
            tx_hash: "0x01".into(),
            success,
            block_number: 7,
            gas_used: 51_000,
        })
    }

    #[test]
    fn test_account_open_twice_rejected() {
        let (mut alice, bob) = opened();
        let result = alice.run(EntityTx::AccountOpen {
            counterparty: bob.id(),
            counterparty_key: bob.key.public_key(),
        });
        assert!(matches!(result, Err(TxError::AccountExists(_))));
    }

    #[test]
    fn test_unknown_account_rejected() {
        let mut alice = Party::new("alice", 1);
        let result = alice.run(EntityTx::DisputeStart {
            counterparty: EntityId::from("nobody"),
        });
        assert!(matches!(result, Err(TxError::UnknownAccount(_))));
    }

    #[test]
    fn test_basic_settlement_queues_batch_op() {
        let (mut alice, mut bob) = opened();
        credit_and_spend(&mut alice, &mut bob);
        assert_eq!(alice.state.accounts[&bob.id()].deltas[&1].offdelta, -600);

        exchange(&mut alice, &mut bob, ProposalKind::Settlement, settle_600());

        let a = &alice.state.accounts[&bob.id()];
        let b = &bob.state.accounts[&alice.id()];
        assert_eq!(a.deltas, b.deltas);
        assert_eq!((a.nonce, b.nonce), (1, 1));
        assert_eq!(a.deltas[&1].offdelta, 0);
        assert_eq!(a.deltas[&1].collateral, 600);
        assert_eq!(alice.state.batch.status, BatchStatus::Accumulating);
        assert!(matches!(alice.state.batch.ops[0], BatchOp::Settlement(ref op) if op.nonce == 0));
        assert!(bob.state.batch.ops.is_empty());
    }

    #[test]
    fn test_stale_settlement_replay_rejected() {
        let (mut alice, mut bob) = opened();
        credit_and_spend(&mut alice, &mut bob);
        let cosign_tx = exchange(&mut alice, &mut bob, ProposalKind::Settlement, settle_600());

        let before = bob.state.clone();
        let result = bob.run(cosign_tx);
        assert!(matches!(
            result,
            Err(TxError::Account(AccountError::InvalidNonce { expected: 1, got: 0 }))
        ));
        assert_eq!(bob.state, before);
    }

    #[test]
    fn test_broadcast_emits_hash_and_submission() {
        let mut alice = Party::new("alice", 1);
        alice.run(r2r(10)).unwrap();
        let out = alice.run(EntityTx::BatchBroadcast).unwrap();

        assert_eq!(out.hashes_to_sign.len(), 1);
        assert_eq!(out.hashes_to_sign[0].kind, HashType::Batch);
        assert_eq!(out.jurisdiction_outputs[0].batch_hash, out.hashes_to_sign[0].hash);
        assert_eq!(alice.state.batch.status, BatchStatus::Sent);

        assert!(matches!(
            alice.run(r2r(5)),
            Err(TxError::Batch(BatchError::BatchInFlight(BatchStatus::Sent)))
        ));
    }

    #[test]
    fn test_empty_broadcast_rejected() {
        let mut alice = Party::new("alice", 1);
        assert!(matches!(
            alice.run(EntityTx::BatchBroadcast),
            Err(TxError::Batch(BatchError::EmptyBatch))
        ));
    }

    #[test]
    fn test_duplicate_confirmation_archives_once() {
        let mut alice = Party::new("alice", 1);
        alice.run(r2r(10)).unwrap();
        alice.run(EntityTx::BatchBroadcast).unwrap();
        let confirm = processed(&alice, true);
        alice.run(confirm.clone()).unwrap();
        alice.run(confirm).unwrap();

        assert_eq!(alice.state.batch.history.len(), 1);
        assert_eq!(alice.state.batch.entity_nonce, 1);
        assert_eq!(alice.state.batch.status, BatchStatus::Empty);
        assert!(matches!(
            alice.state.batch.history[0].outcome,
            BatchOutcome::Confirmed { block_number: 7, .. }
        ));
    }

    #[test]
    fn test_retry_keeps_frozen_hash() {
        let mut alice = Party::new("alice", 1);
        alice.run(r2r(10)).unwrap();
        let first = alice.run(EntityTx::BatchBroadcast).unwrap().hashes_to_sign[0].hash;

        let resigned = alice.run(EntityTx::BatchRetry).unwrap();
        assert_eq!(resigned.hashes_to_sign[0].hash, first);
        assert_eq!(alice.state.batch.status, BatchStatus::Sent);

        let event = processed(&alice, false);
        alice.run(event).unwrap();
        assert_eq!(alice.state.batch.status, BatchStatus::Failed);
        assert_eq!(alice.state.batch.failed_attempts, 1);

        let retried = alice.run(EntityTx::BatchRetry).unwrap();
        assert_eq!(retried.hashes_to_sign[0].hash, first);
        assert_eq!(retried.jurisdiction_outputs[0].entity_nonce, 0);
        assert_eq!(alice.state.batch.status, BatchStatus::Sent);
    }

    #[test]
    fn test_clear_failed_batch_archives_it() {
        let mut alice = Party::new("alice", 1);
        alice.run(r2r(10)).unwrap();
        alice.run(EntityTx::BatchBroadcast).unwrap();
        assert!(alice.run(EntityTx::BatchClear).is_err());
        let event = processed(&alice, false);
        alice.run(event).unwrap();
        alice.run(EntityTx::BatchClear).unwrap();
        assert_eq!(alice.state.batch.status, BatchStatus::Empty);
        assert!(matches!(
            alice.state.batch.history[0].outcome,
            BatchOutcome::Failed { attempts: 1 }
        ));
        assert_eq!(alice.state.batch.entity_nonce, 0);
    }

    #[test]
    fn test_housekeeping_expires_sent_batch() {
        let config = EngineConfig::default();
        let mut alice = Party::new("alice", 1);
        alice.run(r2r(10)).unwrap();
        alice.run(EntityTx::BatchBroadcast).unwrap();

        let early = FrameContext {
            height: 5,
            timestamp: 1_000 + config.batch_max_age_ms - 1,
        };
        housekeeping(&mut alice.state, &early, &config);
        assert_eq!(alice.state.batch.status, BatchStatus::Sent);

        let late = FrameContext {
            height: 6,
            timestamp: 1_000 + config.batch_max_age_ms,
        };
        housekeeping(&mut alice.state, &late, &config);
        assert_eq!(alice.state.batch.status, BatchStatus::Failed);
    }

    #[test]
    fn test_settlement_deferred_while_batch_in_flight() {
        let (mut alice, mut bob) = opened();
        credit_and_spend(&mut alice, &mut bob);
        alice.run(r2r(10)).unwrap();
        alice.run(EntityTx::BatchBroadcast).unwrap();

        exchange(&mut alice, &mut bob, ProposalKind::Settlement, settle_600());
        assert_eq!(alice.state.batch.ops.len(), 1);
        assert_eq!(alice.state.batch.deferred_ops.len(), 1);

        let event = processed(&alice, true);
        alice.run(event).unwrap();
        assert_eq!(alice.state.batch.status, BatchStatus::Accumulating);
        assert!(matches!(alice.state.batch.ops[0], BatchOp::Settlement(_)));
        assert!(alice.state.batch.deferred_ops.is_empty());
    }

    #[test]
    fn test_account_settled_updates_mirror() {
        let (mut alice, mut bob) = opened();
        credit_and_spend(&mut alice, &mut bob);
        exchange(&mut alice, &mut bob, ProposalKind::Settlement, settle_600());

        let event = EntityTx::Jurisdiction(JurisdictionEvent::AccountSettled {
            settlements: vec![xln_batch::AccountSettlement {
                left: alice.id(),
                right: bob.id(),
                tokens: vec![xln_account::TokenSettlement {
                    token_id: 1,
                    left_reserve: 400,
                    right_reserve: 0,
                    collateral: 600,
                    ondelta: -600,
                }],
                nonce: 1,
                dispute: None,
            }],
        });
        alice.run(event.clone()).unwrap();
        bob.run(event).unwrap();

        assert_eq!(alice.state.reserve(1), 400);
        assert_eq!(bob.state.reserve(1), 0);
        let a = &alice.state.accounts[&bob.id()];
        let b = &bob.state.accounts[&alice.id()];
        assert_eq!(a.deltas, b.deltas);
        assert_eq!(a.onchain[&1].ondelta, -600);
        assert_eq!(a.nonce, 1);
    }

    #[test]
    fn test_dispute_start_and_early_finalize() {
        let (mut alice, mut bob) = opened();
        credit_and_spend(&mut alice, &mut bob);

        alice
            .run(EntityTx::DisputeStart {
                counterparty: bob.id(),
            })
            .unwrap();
        assert!(matches!(alice.state.batch.ops[0], BatchOp::DisputeStart(_)));
        assert_eq!(alice.state.accounts[&bob.id()].nonce, 1);

        let result = alice.run_at(
            EntityTx::DisputeFinalize {
                counterparty: bob.id(),
            },
            1_001,
        );
        assert!(matches!(
            result,
            Err(TxError::Account(AccountError::DisputeNotExpired { .. }))
        ));

        let timeout = EngineConfig::default().dispute_timeout_ms;
        alice
            .run_at(
                EntityTx::DisputeFinalize {
                    counterparty: bob.id(),
                },
                1_000 + timeout,
            )
            .unwrap();
        assert!(matches!(alice.state.batch.ops[1], BatchOp::DisputeFinalize(_)));
    }

    fn settled(alice: &Party, bob: &Party, collateral: u128, nonce: u64, dispute: Option<Hash>) -> EntityTx {
        EntityTx::Jurisdiction(JurisdictionEvent::AccountSettled {
            settlements: vec![xln_batch::AccountSettlement {
                left: alice.id(),
                right: bob.id(),
                tokens: vec![xln_account::TokenSettlement {
                    token_id: 1,
                    left_reserve: 0,
                    right_reserve: 0,
                    collateral,
                    ondelta: 0,
                }],
                nonce,
                dispute,
            }],
        })
    }

    #[test]
    fn test_refused_proposal_is_rejected_back() {
        let (mut alice, mut bob) = opened();
        // only alice has seen the collateral so far
        alice.run(settled(&alice, &bob, 50, 0, None)).unwrap();
        let out = alice
            .run(EntityTx::SettlementPropose {
                counterparty: bob.id(),
                kind: ProposalKind::Frame,
                ops: vec![AccountOp::Payment {
                    token_id: 1,
                    from: Side::Left,
                    amount: 30,
                }],
            })
            .unwrap();
        let (_, cosign_tx) = out.outputs[0].clone().sign(&alice.id(), &alice.key);

        let ctx = FrameContext {
            height: bob.state.height + 1,
            timestamp: 1_000,
        };
        let execution = execute_frame(&bob.state, &[cosign_tx], &ctx, &EngineConfig::default());
        assert_eq!(execution.rejected.len(), 1);
        assert_eq!(execution.outcome.outputs.len(), 1);
        let (to, reject_tx) = execution.outcome.outputs[0].clone().sign(&bob.id(), &bob.key);
        assert_eq!(to, alice.id());
        assert!(matches!(reject_tx, EntityTx::SettlementReject { .. }));

        assert!(alice.state.accounts[&bob.id()].pending.is_some());
        alice.run(reject_tx.clone()).unwrap();
        assert!(alice.state.accounts[&bob.id()].pending.is_none());
        assert!(matches!(
            alice.run(reject_tx),
            Err(TxError::Account(AccountError::NoPendingProposal))
        ));

        bob.run(settled(&alice, &bob, 50, 0, None)).unwrap();
        exchange(
            &mut alice,
            &mut bob,
            ProposalKind::Frame,
            vec![AccountOp::Payment {
                token_id: 1,
                from: Side::Left,
                amount: 30,
            }],
        );
        assert_eq!(
            alice.state.accounts[&bob.id()].deltas,
            bob.state.accounts[&alice.id()].deltas
        );
    }

    #[test]
    fn test_cosign_from_unknown_account_gets_no_rejection() {
        let (mut alice, bob) = opened();
        let out = alice
            .run(EntityTx::SettlementPropose {
                counterparty: bob.id(),
                kind: ProposalKind::Frame,
                ops: vec![AccountOp::SetCreditLimit {
                    token_id: 1,
                    side: Side::Left,
                    limit: 5,
                }],
            })
            .unwrap();
        let (_, cosign_tx) = out.outputs[0].clone().sign(&alice.id(), &alice.key);
        let stranger = Party::new("carol", 3);
        assert!(rejection_output(&stranger.state, &cosign_tx).is_none());
        assert!(rejection_output(&bob.state, &EntityTx::BatchBroadcast).is_none());
    }

    #[test]
    fn test_counterparty_learns_of_dispute_onchain() {
        let (mut alice, mut bob) = opened();
        credit_and_spend(&mut alice, &mut bob);
        alice
            .run(EntityTx::DisputeStart {
                counterparty: bob.id(),
            })
            .unwrap();
        let dispute_hash = alice.state.accounts[&bob.id()].dispute.as_ref().unwrap().dispute_hash;

        let started = settled(&alice, &bob, 0, 1, Some(dispute_hash));
        alice.run_at(started.clone(), 2_000).unwrap();
        bob.run_at(started, 2_000).unwrap();
        let a = &alice.state.accounts[&bob.id()];
        let b = &bob.state.accounts[&alice.id()];
        assert_eq!(b.nonce, a.nonce);
        assert_eq!(b.dispute.as_ref().unwrap().dispute_hash, dispute_hash);
        assert_eq!(
            b.dispute.as_ref().unwrap().dispute_timeout,
            2_000 + EngineConfig::default().dispute_timeout_ms
        );
        assert_eq!(a.dispute.as_ref().unwrap().dispute_timeout, 1_000 + EngineConfig::default().dispute_timeout_ms);

        let finalized = settled(&alice, &bob, 0, 1, None);
        alice.run(finalized.clone()).unwrap();
        bob.run(finalized).unwrap();
        let a = &alice.state.accounts[&bob.id()];
        let b = &bob.state.accounts[&alice.id()];
        assert!(a.dispute.is_none());
        assert!(b.dispute.is_none());
        assert_eq!(a.deltas, b.deltas);
        assert_eq!(a.nonce, b.nonce);
    }

    #[test]
    fn test_events_for_other_entities_ignored() {
        let mut alice = Party::new("alice", 1);
        let before = alice.state.clone();
        alice
            .run(EntityTx::Jurisdiction(JurisdictionEvent::ReserveUpdated {
                entity: EntityId::from("bob"),
                token_id: 1,
                reserve: 99,
            }))
            .unwrap();
        assert_eq!(alice.state, before);
    }
}
