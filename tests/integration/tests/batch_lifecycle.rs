//! Integration test: jurisdiction batch lifecycle driven through entity
//! consensus and the in-memory jurisdiction.

use xln_batch::{BatchOp, BatchOutcome, BatchStatus, Jurisdiction, JurisdictionEvent};
use xln_core::EntityId;
use xln_entity::EntityTx;
use xln_integration_tests::{Network, TOKEN};

fn r2r(to: &str, amount: u128) -> EntityTx {
    EntityTx::BatchAppendOp {
        op: BatchOp::ReserveToReserve {
            token_id: TOKEN,
            to: EntityId::from(to),
            amount,
        },
    }
}

async fn funded_alice() -> (Network, EntityId) {
    let mut net = Network::new();
    let alice = net.add_entity("alice", 1, 1, 1);
    net.jurisdiction.fund(&alice, TOKEN, 1_000);
    net.settle().await;
    (net, alice)
}

#[tokio::test]
async fn test_confirmed_batch_is_archived() {
    let (mut net, alice) = funded_alice().await;
    net.submit(&alice, r2r("bob", 100));
    net.submit(&alice, r2r("carol", 50));
    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;

    let batch = &net.state(&alice).batch;
    assert_eq!(batch.status, BatchStatus::Empty);
    assert_eq!(batch.entity_nonce, 1);
    assert_eq!(batch.history.len(), 1);
    assert_eq!(batch.history[0].op_count, 2);
    assert!(batch.history[0].tx_hash.as_deref().is_some_and(|h| h.starts_with("0x")));
    assert_eq!(
        batch.history[0].outcome,
        BatchOutcome::Confirmed {
            block_number: 1,
            gas_used: 21_000 + 2 * 30_000
        }
    );
    assert_eq!(net.state(&alice).reserve(TOKEN), 850);
}

#[tokio::test]
async fn test_failed_batch_retried_with_frozen_hash() {
    let (mut net, alice) = funded_alice().await;
    net.jurisdiction.fail_next_submission();
    net.submit(&alice, r2r("bob", 100));
    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;

    let frozen = net.state(&alice).batch.batch_hash.expect("frozen batch");
    assert_eq!(net.state(&alice).batch.status, BatchStatus::Failed);
    assert_eq!(net.state(&alice).batch.failed_attempts, 1);
    assert_eq!(net.jurisdiction.reserve(&alice, TOKEN), 1_000);

    // the batch cannot grow while a retry is pending
    net.submit(&alice, r2r("carol", 5));
    net.submit(&alice, EntityTx::BatchRetry);
    net.advance(1_000);
    net.settle().await;

    let batch = &net.state(&alice).batch;
    assert_eq!(batch.status, BatchStatus::Empty);
    assert_eq!(batch.history[0].batch_hash, frozen);
    assert_eq!(batch.history[0].op_count, 1);
    assert_eq!(net.jurisdiction.reserve(&alice, TOKEN), 900);
    assert_eq!(net.jurisdiction.reserve(&EntityId::from("carol"), TOKEN), 0);
}

#[tokio::test]
async fn test_failed_batch_cleared_and_nonce_reused() {
    let (mut net, alice) = funded_alice().await;
    net.jurisdiction.fail_next_submission();
    net.submit(&alice, r2r("bob", 100));
    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;

    net.submit(&alice, EntityTx::BatchClear);
    net.settle().await;
    {
        let batch = &net.state(&alice).batch;
        assert_eq!(batch.status, BatchStatus::Empty);
        assert_eq!(batch.history[0].outcome, BatchOutcome::Failed { attempts: 1 });
        assert_eq!(batch.entity_nonce, 0);
    }

    net.submit(&alice, r2r("bob", 10));
    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;
    let batch = &net.state(&alice).batch;
    assert_eq!(batch.entity_nonce, 1);
    assert_eq!(batch.history.len(), 2);
    assert!(matches!(batch.history[0].outcome, BatchOutcome::Confirmed { .. }));
    assert_eq!(net.jurisdiction.reserve(&EntityId::from("bob"), TOKEN), 10);
}

#[tokio::test]
async fn test_duplicate_confirmation_is_ignored() {
    let (mut net, alice) = funded_alice().await;
    let mut events = net.jurisdiction.subscribe();
    net.submit(&alice, r2r("bob", 100));
    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;

    let mut processed = None;
    while let Ok(event) = events.try_recv() {
        if matches!(event, JurisdictionEvent::BatchProcessed { .. }) {
            processed = Some(event);
        }
    }
    let before = net.state(&alice).batch.clone();
    net.submit(&alice, EntityTx::Jurisdiction(processed.expect("processed event")));
    net.settle().await;

    assert_eq!(net.state(&alice).batch, before);
    assert_eq!(net.state(&alice).batch.history.len(), 1);
}

#[tokio::test]
async fn test_unconfirmed_batch_expires() {
    let mut net = Network::new();
    // not registered: the jurisdiction rejects every submission
    let alice = net.add_entity_with("alice", 1, 1, 1, &[0], false);
    net.submit(&alice, r2r("bob", 100));
    net.submit(&alice, EntityTx::BatchBroadcast);
    net.settle().await;
    assert_eq!(net.state(&alice).batch.status, BatchStatus::Sent);

    net.advance(net.config.batch_max_age_ms - 1);
    net.submit(&alice, r2r("bob", 1));
    net.settle().await;
    assert_eq!(net.state(&alice).batch.status, BatchStatus::Sent);

    net.advance(1);
    net.submit(&alice, EntityTx::BatchClear);
    net.settle().await;
    let batch = &net.state(&alice).batch;
    assert_eq!(batch.status, BatchStatus::Empty);
    assert_eq!(batch.history[0].outcome, BatchOutcome::Failed { attempts: 1 });
}
