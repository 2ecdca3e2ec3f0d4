//! Shared harness: entities hosted on one runtime over the in-memory jurisdiction.

use std::collections::BTreeMap;
use std::sync::Arc;

use xln_account::{AccountMachine, AccountOp, ProposalKind};
use xln_batch::InternalJurisdiction;
use xln_core::{EngineConfig, EntityId, Quorum, TokenId, ValidatorId};
use xln_crypto::{KeyPair, PublicKey};
use xln_entity::{EntityState, EntityTx, Replica};
use xln_node::Runtime;

pub const START: u64 = 1_700_000_000_000;
pub const TOKEN: TokenId = 1;

/// Keys and quorum of one entity.
pub struct EntitySetup {
    pub id: EntityId,
    pub quorum: Quorum,
    pub keys: Vec<(ValidatorId, PublicKey)>,
    seed: u8,
}

impl EntitySetup {
    pub fn new(name: &str, validators: usize, threshold: u64, seed: u8) -> Self {
        let members: Vec<(ValidatorId, u64)> = (0..validators).map(|i| (validator_id(name, i), 1)).collect();
        let keys = (0..validators)
            .map(|i| (validator_id(name, i), keypair(seed, i).public_key()))
            .collect();
        Self {
            id: EntityId::from(name),
            quorum: Quorum::new(members, threshold).expect("valid quorum"),
            keys,
            seed,
        }
    }

    pub fn validator(&self, index: usize) -> ValidatorId {
        self.keys[index].0.clone()
    }

    pub fn keypair(&self, index: usize) -> KeyPair {
        keypair(self.seed, index)
    }

    pub fn replica(&self, index: usize, config: &EngineConfig) -> Replica {
        Replica::new(
            self.id.clone(),
            self.validator(index),
            self.quorum.clone(),
            self.keypair(index),
            self.keys.clone(),
            config.clone(),
        )
        .expect("replica")
    }
}

fn validator_id(name: &str, index: usize) -> ValidatorId {
    ValidatorId::from(format!("{}-v{}", name, index).as_str())
}

fn keypair(seed: u8, index: usize) -> KeyPair {
    KeyPair::from_seed(&[seed.wrapping_add(index as u8); 32])
}

pub struct Network {
    pub runtime: Runtime,
    pub jurisdiction: Arc<InternalJurisdiction>,
    pub entities: BTreeMap<EntityId, EntitySetup>,
    pub config: EngineConfig,
    pub now: u64,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let jurisdiction = Arc::new(InternalJurisdiction::new(config.jurisdiction.clone()));
        Self {
            runtime: Runtime::new(jurisdiction.clone()),
            jurisdiction,
            entities: BTreeMap::new(),
            config,
            now: START,
        }
    }

    /// Register an entity on the jurisdiction and host all of its replicas.
    pub fn add_entity(&mut self, name: &str, validators: usize, threshold: u64, seed: u8) -> EntityId {
        let hosted: Vec<usize> = (0..validators).collect();
        self.add_entity_with(name, validators, threshold, seed, &hosted, true)
    }

    /// Host only the replicas in `hosted`; optionally skip jurisdiction registration.
    pub fn add_entity_with(
        &mut self,
        name: &str,
        validators: usize,
        threshold: u64,
        seed: u8,
        hosted: &[usize],
        register: bool,
    ) -> EntityId {
        let setup = EntitySetup::new(name, validators, threshold, seed);
        if register {
            self.register(&setup);
        }
        for &index in hosted {
            self.runtime.add_replica(setup.replica(index, &self.config));
        }
        let id = setup.id.clone();
        self.entities.insert(id.clone(), setup);
        id
    }

    pub fn register(&self, setup: &EntitySetup) {
        self.jurisdiction
            .register_entity(setup.id.clone(), setup.quorum.clone(), setup.keys.clone());
    }

    pub fn submit(&mut self, entity: &EntityId, tx: EntityTx) {
        self.runtime.submit(entity, tx).expect("hosted entity");
    }

    /// Step the runtime until it is idle at the current time.
    pub async fn settle(&mut self) {
        self.runtime.run_until_idle(self.now, 50).await.expect("runtime step");
    }

    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }

    /// The proposer's view of `entity`.
    pub fn state(&self, entity: &EntityId) -> &EntityState {
        &self.runtime.proposer(entity).expect("hosted proposer").state
    }

    pub fn account(&self, entity: &EntityId, counterparty: &EntityId) -> &AccountMachine {
        &self.state(entity).accounts[counterparty]
    }

    /// Open the account on both sides.
    pub async fn open_account(&mut self, a: &EntityId, b: &EntityId) {
        let a_key = self.state(a).account_key.clone();
        let b_key = self.state(b).account_key.clone();
        self.submit(
            a,
            EntityTx::AccountOpen {
                counterparty: b.clone(),
                counterparty_key: b_key,
            },
        );
        self.submit(
            b,
            EntityTx::AccountOpen {
                counterparty: a.clone(),
                counterparty_key: a_key,
            },
        );
        self.settle().await;
    }

    /// Propose `ops` on the account and run until the counterparty's commit lands.
    pub async fn exchange(&mut self, proposer: &EntityId, counterparty: &EntityId, kind: ProposalKind, ops: Vec<AccountOp>) {
        self.submit(
            proposer,
            EntityTx::SettlementPropose {
                counterparty: counterparty.clone(),
                kind,
                ops,
            },
        );
        self.settle().await;
    }
}
