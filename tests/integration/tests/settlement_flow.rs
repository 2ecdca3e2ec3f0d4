//! Integration test: bilateral credit, cooperative settlement and on-chain
//! execution across the account, entity, batch and node crates.

use xln_account::{AccountOp, AccountProposal, ProposalKind, SettlementDiff, SignedProposal};
use xln_batch::{batch_hash, encode_batch, BatchOp, BatchStatus, Jurisdiction};
use xln_core::{EntityId, HashType, Side};
use xln_crypto::{sign_hash, HankoBuilder};
use xln_entity::EntityTx;
use xln_integration_tests::{Network, TOKEN};

fn settle_600() -> Vec<AccountOp> {
    vec![AccountOp::Settle {
        diffs: vec![SettlementDiff {
            token_id: TOKEN,
            left_reserve_diff: -600,
            right_reserve_diff: 0,
            collateral_diff: 600,
            offdelta_diff: 600,
        }],
    }]
}

/// alice (left, funded with 1000) and bob with an open account where bob owes
/// alice 600 off-chain.
async fn indebted_pair() -> (Network, EntityId, EntityId) {
    let mut net = Network::new();
    let alice = net.add_entity("alice", 1, 1, 1);
    let bob = net.add_entity("bob", 1, 1, 2);
    net.jurisdiction.fund(&alice, TOKEN, 1_000);
    net.open_account(&alice, &bob).await;

    net.exchange(
        &alice,
        &bob,
        ProposalKind::Frame,
        vec![AccountOp::SetCreditLimit {
            token_id: TOKEN,
            side: Side::Left,
            limit: 1_000,
        }],
    )
    .await;
    net.exchange(
        &bob,
        &alice,
        ProposalKind::Frame,
        vec![AccountOp::Payment {
            token_id: TOKEN,
            from: Side::Right,
            amount: 600,
        }],
    )
    .await;
    (net, alice, bob)
}

#[tokio::test]
async fn test_offchain_frames_agree() {
    let (net, alice, bob) = indebted_pair().await;
    let a = net.account(&alice, &bob);
    let b = net.account(&bob, &alice);

    assert_eq!(a.height, 2);
    assert_eq!(a.deltas, b.deltas);
    assert_eq!(a.deltas[&TOKEN].offdelta, -600);
    assert_eq!(net.state(&alice).reserve(TOKEN), 1_000);
}

#[tokio::test]
async fn test_cooperative_settlement_end_to_end() {
    let (mut net, alice, bob) = indebted_pair().await;

    net.exchange(&alice, &bob, ProposalKind::Settlement, settle_600()).await;
    {
        let batch = &net.state(&alice).batch;
        assert_eq!(batch.status, BatchStatus::Accumulating);
        assert!(matches!(batch.ops[0], BatchOp::Settlement(ref op) if op.nonce == 0));
        assert!(net.state(&bob).batch.ops.is_empty());
    }

    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;

    // on-chain
    assert_eq!(net.jurisdiction.collateral(&alice, &bob, TOKEN), 600);
    assert_eq!(net.jurisdiction.reserve(&alice, TOKEN), 400);
    assert_eq!(net.jurisdiction.account_nonce(&alice, &bob), 1);
    assert_eq!(net.jurisdiction.entity_nonce(&alice), 1);

    // both off-chain copies observed the same settlement
    let a = net.account(&alice, &bob);
    let b = net.account(&bob, &alice);
    assert_eq!((a.nonce, b.nonce), (1, 1));
    assert_eq!(a.deltas, b.deltas);
    assert_eq!(a.deltas[&TOKEN].collateral, 600);
    assert_eq!(a.deltas[&TOKEN].offdelta, 0);
    assert_eq!(a.onchain, b.onchain);
    assert_eq!(a.onchain[&TOKEN].ondelta, -600);
    assert_eq!(a.onchain[&TOKEN].settled_nonce, 1);

    assert_eq!(net.state(&alice).reserve(TOKEN), 400);
    assert_eq!(net.state(&alice).batch.status, BatchStatus::Empty);
    assert_eq!(net.state(&alice).batch.entity_nonce, 1);
}

#[tokio::test]
async fn test_stale_settlement_proposal_rejected_offchain() {
    let (mut net, alice, bob) = indebted_pair().await;
    net.exchange(&alice, &bob, ProposalKind::Settlement, settle_600()).await;
    let before = net.account(&bob, &alice).clone();

    // replay a proposal for the already used settlement nonce
    let stale = AccountProposal {
        left: alice.clone(),
        right: bob.clone(),
        kind: ProposalKind::Settlement,
        sequence: 0,
        proposer: Side::Left,
        ops: settle_600(),
    };
    let signed = SignedProposal::sign(stale, &[0u8; 32], &net.entities[&alice].keypair(0));
    net.submit(
        &bob,
        EntityTx::SettlementCosign {
            from: alice.clone(),
            signed,
        },
    );
    net.settle().await;

    assert_eq!(net.account(&bob, &alice), &before);
    assert!(net.state(&alice).batch.ops.len() == 1);
}

#[tokio::test]
async fn test_stale_settlement_rejected_onchain() {
    let (mut net, alice, bob) = indebted_pair().await;
    net.exchange(&alice, &bob, ProposalKind::Settlement, settle_600()).await;
    let settlement = net.state(&alice).batch.ops[0].clone();

    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;
    assert_eq!(net.jurisdiction.account_nonce(&alice, &bob), 1);

    // resubmit the same co-signed settlement under the next entity nonce
    let encoded = encode_batch(&[settlement]);
    let hash = batch_hash(&net.config.jurisdiction, &encoded, 1).unwrap();
    let setup = &net.entities[&alice];
    let mut builder = HankoBuilder::new(HashType::Batch, hash);
    builder.add_signature(setup.validator(0), sign_hash(HashType::Batch, &hash, &setup.keypair(0)));
    let hanko = builder.build(&setup.quorum, net.jurisdiction.as_ref()).unwrap();

    let mut events = net.jurisdiction.subscribe();
    net.jurisdiction
        .submit_tx(&encoded, &alice, &hanko.to_bytes(), 1)
        .await
        .unwrap();

    let mut reverted = false;
    while let Ok(event) = events.try_recv() {
        if let xln_batch::JurisdictionEvent::BatchProcessed { success, .. } = event {
            reverted = !success;
        }
    }
    assert!(reverted);
    assert_eq!(net.jurisdiction.collateral(&alice, &bob, TOKEN), 600);
    assert_eq!(net.jurisdiction.reserve(&alice, TOKEN), 400);
    assert_eq!(net.jurisdiction.account_nonce(&alice, &bob), 1);
    assert_eq!(net.jurisdiction.entity_nonce(&alice), 1);
}

#[tokio::test]
async fn test_dispute_started_onchain_after_timeout() {
    let (mut net, alice, bob) = indebted_pair().await;

    net.submit(&alice, EntityTx::DisputeStart { counterparty: bob.clone() });
    net.settle().await;
    assert!(matches!(net.state(&alice).batch.ops[0], BatchOp::DisputeStart(_)));

    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;
    assert!(net.jurisdiction.in_dispute(&alice, &bob));
    assert_eq!(net.state(&alice).batch.entity_nonce, 1);

    // bob learns of the dispute from the chain
    let onchain_nonce = net.jurisdiction.account_nonce(&alice, &bob);
    let a = net.account(&alice, &bob);
    let b = net.account(&bob, &alice);
    assert_eq!(a.nonce, onchain_nonce);
    assert_eq!(b.nonce, onchain_nonce);
    let seen = b.dispute.clone().expect("bob sees the dispute");
    assert_eq!(seen.dispute_hash, a.dispute.as_ref().unwrap().dispute_hash);
    assert!(b.pending.is_none());

    net.advance(net.config.dispute_timeout_ms);
    net.submit(&alice, EntityTx::DisputeFinalize { counterparty: bob.clone() });
    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;

    assert!(!net.jurisdiction.in_dispute(&alice, &bob));
    assert_eq!(net.jurisdiction.entity_nonce(&alice), 2);
    let a = net.account(&alice, &bob);
    let b = net.account(&bob, &alice);
    assert!(a.dispute.is_none());
    assert!(b.dispute.is_none());
    assert_eq!(a.nonce, b.nonce);
    assert_eq!(a.deltas, b.deltas);
    assert_eq!(a.deltas[&TOKEN].collateral, net.jurisdiction.collateral(&alice, &bob, TOKEN));
    assert_eq!(a.onchain[&TOKEN].settled_nonce, onchain_nonce);
}

#[tokio::test]
async fn test_dispute_after_settlement_pays_out_collateral() {
    let (mut net, alice, bob) = indebted_pair().await;
    net.exchange(&alice, &bob, ProposalKind::Settlement, settle_600()).await;
    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;
    assert_eq!(net.jurisdiction.collateral(&alice, &bob, TOKEN), 600);
    assert_eq!(net.account(&bob, &alice).deltas[&TOKEN].collateral, 600);

    net.submit(&bob, EntityTx::DisputeStart { counterparty: alice.clone() });
    net.submit(&bob, EntityTx::BatchBroadcast);
    net.settle().await;
    assert!(net.jurisdiction.in_dispute(&alice, &bob));
    assert!(net.account(&alice, &bob).dispute.is_some());
    assert_eq!(net.account(&alice, &bob).nonce, net.account(&bob, &alice).nonce);

    net.advance(net.config.dispute_timeout_ms);
    net.submit(&bob, EntityTx::DisputeFinalize { counterparty: alice.clone() });
    net.submit(&bob, EntityTx::BatchBroadcast);
    net.settle().await;

    assert!(!net.jurisdiction.in_dispute(&alice, &bob));
    assert_eq!(net.jurisdiction.collateral(&alice, &bob, TOKEN), 0);
    assert_eq!(net.jurisdiction.reserve(&alice, TOKEN), 1_000);
    for (me, other) in [(&alice, &bob), (&bob, &alice)] {
        let account = net.account(me, other);
        assert!(account.dispute.is_none());
        assert_eq!(account.deltas[&TOKEN].collateral, 0);
    }
    assert_eq!(net.state(&alice).reserve(TOKEN), 1_000);
}
