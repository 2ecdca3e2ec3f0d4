//! Integration test: multi-validator entities on the node runtime, round
//! timeouts and restart recovery through RocksDB snapshots.

use xln_account::{AccountOp, ProposalKind};
use xln_batch::{BatchOp, BatchStatus};
use xln_core::{EntityId, Side};
use xln_entity::{EntityTx, Replica};
use xln_integration_tests::{EntitySetup, Network, TOKEN};
use xln_node::{Runtime, Storage};

fn r2r(to: &str, amount: u128) -> EntityTx {
    EntityTx::BatchAppendOp {
        op: BatchOp::ReserveToReserve {
            token_id: TOKEN,
            to: EntityId::from(to),
            amount,
        },
    }
}

#[tokio::test]
async fn test_quorum_commits_with_validator_offline() {
    let mut net = Network::new();
    let dao = net.add_entity_with("dao", 3, 2, 10, &[0, 1], true);
    net.jurisdiction.fund(&dao, TOKEN, 500);
    net.submit(&dao, r2r("carol", 200));
    net.submit(&dao, EntityTx::BatchBroadcast);
    net.settle().await;

    assert_eq!(net.jurisdiction.reserve(&EntityId::from("carol"), TOKEN), 200);
    let replicas: Vec<&Replica> = net.runtime.replicas_of(&dao).collect();
    assert_eq!(replicas.len(), 2);
    assert_eq!(replicas[0].state, replicas[1].state);
    assert_eq!(replicas[0].last_frame_hash(), replicas[1].last_frame_hash());
    assert_eq!(replicas[0].state.batch.entity_nonce, 1);
}

#[tokio::test]
async fn test_round_retried_after_timeout() {
    let mut net = Network::new();
    let dao = net.add_entity_with("dao", 3, 3, 10, &[0, 1], true);
    net.submit(&dao, r2r("carol", 1));
    net.submit(&dao, r2r("carol", 2));
    net.settle().await;

    let proposer = net.runtime.proposer(&dao).unwrap();
    assert_eq!(proposer.state.height, 0);
    assert!(proposer.phase().in_round());

    // the missing validator comes online; the stuck round is abandoned and re-proposed
    let late = net.entities[&dao].replica(2, &net.config);
    net.runtime.add_replica(late);
    net.advance(net.config.round_timeout_ms);
    net.settle().await;

    for replica in net.runtime.replicas_of(&dao) {
        assert_eq!(replica.state.height, 1);
        assert_eq!(replica.state.batch.ops.len(), 2);
        assert_eq!(
            replica.state.batch.ops[0],
            BatchOp::ReserveToReserve {
                token_id: TOKEN,
                to: EntityId::from("carol"),
                amount: 1
            }
        );
    }
}

#[tokio::test]
async fn test_multisig_entity_runs_bilateral_account() {
    let mut net = Network::new();
    let alice = net.add_entity("alice", 1, 1, 1);
    let dao = net.add_entity("dao", 3, 2, 10);
    net.open_account(&alice, &dao).await;

    net.exchange(
        &dao,
        &alice,
        ProposalKind::Frame,
        vec![AccountOp::SetCreditLimit {
            token_id: TOKEN,
            side: Side::Right,
            limit: 300,
        }],
    )
    .await;

    let a = net.account(&alice, &dao);
    assert_eq!(a.height, 1);
    for replica in net.runtime.replicas_of(&dao) {
        assert_eq!(replica.state.accounts[&alice].deltas, a.deltas);
    }
}

#[tokio::test]
async fn test_restart_resubmits_sent_batch() {
    let dir = std::env::temp_dir().join(format!("xln-restart-{}", std::process::id()));
    let setup = EntitySetup::new("alice", 1, 1, 1);
    let alice = setup.id.clone();

    // first run: the jurisdiction does not know alice yet, the batch stays sent
    let frozen = {
        let mut net = Network::new();
        net.runtime = Runtime::new(net.jurisdiction.clone()).with_storage(Storage::open(&dir).unwrap());
        net.add_entity_with("alice", 1, 1, 1, &[0], false);
        net.submit(&alice, r2r("bob", 40));
        net.submit(&alice, EntityTx::BatchBroadcast);
        net.settle().await;
        assert_eq!(net.state(&alice).batch.status, BatchStatus::Sent);
        net.state(&alice).batch.batch_hash.unwrap()
    };

    // second run: restore from storage against a jurisdiction that knows alice
    let mut net = Network::new();
    net.register(&setup);
    net.jurisdiction.fund(&alice, TOKEN, 100);
    let snapshot = Storage::open(&dir)
        .unwrap()
        .get_snapshot(&alice, &setup.validator(0))
        .unwrap()
        .unwrap();
    let replica = Replica::restore(
        snapshot,
        setup.quorum.clone(),
        setup.keypair(0),
        setup.keys.clone(),
        net.config.clone(),
    )
    .unwrap();
    assert_eq!(replica.mempool.front(), Some(&EntityTx::BatchRetry));
    net.runtime.add_replica(replica);
    net.advance(1_000);
    net.settle().await;

    let batch = &net.state(&alice).batch;
    assert_eq!(batch.status, BatchStatus::Empty);
    assert_eq!(batch.history[0].batch_hash, frozen);
    assert_eq!(net.jurisdiction.reserve(&EntityId::from("bob"), TOKEN), 40);

    std::fs::remove_dir_all(&dir).ok();
}
