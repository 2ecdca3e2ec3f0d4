//! Single-process runtime hosting entity replicas.
//!
//! Each step drains jurisdiction events into the recipients' proposer
//! mempools, times out stale rounds, lets ready proposers open rounds and
//! then routes every resulting action FIFO until the queue is empty.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast::{self, error::TryRecvError};
use xln_batch::{Jurisdiction, JurisdictionEvent};
use xln_core::{EntityId, ValidatorId};
use xln_entity::{EntityTx, Replica, ReplicaAction, Submission};

use crate::storage::Storage;

/// What one [`Runtime::step`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub events: usize,
    pub timeouts: usize,
    pub proposed: usize,
    pub messages: usize,
    pub submissions: usize,
}

impl StepReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Runtime {
    replicas: BTreeMap<EntityId, BTreeMap<ValidatorId, Replica>>,
    jurisdiction: Arc<dyn Jurisdiction>,
    events: broadcast::Receiver<JurisdictionEvent>,
    storage: Option<Storage>,
    /// Height of the newest frame header written per entity.
    persisted_frames: BTreeMap<EntityId, u64>,
}

impl Runtime {
    /// Subscribes to the jurisdiction immediately; earlier events are not seen.
    pub fn new(jurisdiction: Arc<dyn Jurisdiction>) -> Self {
        let events = jurisdiction.subscribe();
        tracing::info!(jurisdiction = jurisdiction.jurisdiction_id(), "runtime attached");
        Self {
            replicas: BTreeMap::new(),
            jurisdiction,
            events,
            storage: None,
            persisted_frames: BTreeMap::new(),
        }
    }

    /// Persist replica snapshots to `storage` after every step.
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn add_replica(&mut self, replica: Replica) {
        tracing::info!(
            entity = %replica.entity_id(),
            validator = %replica.validator_id(),
            height = replica.state.height,
            proposer = replica.is_proposer(),
            "replica hosted"
        );
        self.replicas
            .entry(replica.entity_id().clone())
            .or_default()
            .insert(replica.validator_id().clone(), replica);
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityId> {
        self.replicas.keys()
    }

    pub fn replica(&self, entity: &EntityId, validator: &ValidatorId) -> Option<&Replica> {
        self.replicas.get(entity)?.get(validator)
    }

    pub fn replica_mut(&mut self, entity: &EntityId, validator: &ValidatorId) -> Option<&mut Replica> {
        self.replicas.get_mut(entity)?.get_mut(validator)
    }

    /// Every hosted replica of `entity`.
    pub fn replicas_of(&self, entity: &EntityId) -> impl Iterator<Item = &Replica> {
        self.replicas.get(entity).into_iter().flat_map(|v| v.values())
    }

    /// The hosted replica that proposes for `entity`.
    pub fn proposer(&self, entity: &EntityId) -> Option<&Replica> {
        self.replicas_of(entity).find(|r| r.is_proposer())
    }

    fn proposer_mut(&mut self, entity: &EntityId) -> Option<&mut Replica> {
        self.replicas
            .get_mut(entity)?
            .values_mut()
            .find(|r| r.is_proposer())
    }

    /// Queue a transaction in the proposer's mempool of `entity`.
    pub fn submit(&mut self, entity: &EntityId, tx: EntityTx) -> Result<()> {
        let proposer = self
            .proposer_mut(entity)
            .ok_or_else(|| anyhow::anyhow!("no local proposer for entity {}", entity))?;
        proposer.add_tx(tx);
        Ok(())
    }

    /// Run one step at wall-clock time `now` (ms).
    pub async fn step(&mut self, now: u64) -> Result<StepReport> {
        let mut report = StepReport {
            events: self.drain_events(),
            ..StepReport::default()
        };

        for replica in self.replicas.values_mut().flat_map(|v| v.values_mut()) {
            if replica.tick(now) {
                report.timeouts += 1;
            }
        }

        let mut queue = VecDeque::new();
        for replica in self.replicas.values_mut().flat_map(|v| v.values_mut()) {
            if !replica.ready_to_propose() {
                continue;
            }
            match replica.propose(now) {
                Ok(actions) => {
                    report.proposed += 1;
                    queue.extend(actions);
                }
                Err(e) => tracing::warn!(entity = %replica.entity_id(), error = %e, "propose failed"),
            }
        }

        while let Some(action) = queue.pop_front() {
            match action {
                ReplicaAction::ToValidator { to, message } => {
                    report.messages += 1;
                    let entity = message.entity().clone();
                    let Some(replica) = self.replica_mut(&entity, &to) else {
                        tracing::warn!(entity = %entity, validator = %to, "no local replica; message dropped");
                        continue;
                    };
                    match replica.handle(message) {
                        Ok(more) => queue.extend(more),
                        Err(e) => tracing::warn!(entity = %entity, validator = %to, error = %e, "message rejected"),
                    }
                }
                ReplicaAction::ToEntity { to, tx } => {
                    report.messages += 1;
                    if let Err(e) = self.submit(&to, tx) {
                        tracing::warn!(error = %e, "entity message dropped");
                    }
                }
                ReplicaAction::Submit(submission) => {
                    report.submissions += 1;
                    self.submit_batch(submission).await;
                }
            }
        }

        self.persist()?;
        Ok(report)
    }

    /// Step until nothing happens, at most `max_steps` times.
    ///
    /// Returns the number of steps that did work.
    pub async fn run_until_idle(&mut self, now: u64, max_steps: usize) -> Result<usize> {
        for step in 0..max_steps {
            if self.step(now).await?.is_idle() {
                return Ok(step);
            }
        }
        tracing::warn!(max_steps, "runtime still busy after step limit");
        Ok(max_steps)
    }

    /// Write a snapshot of every replica and the proposers' frame headers
    /// committed since the last call, if storage is attached.
    ///
    /// Returns the number of frame headers written.
    pub fn persist(&mut self) -> Result<usize> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };
        for replica in self.replicas.values().flat_map(|v| v.values()) {
            storage.put_snapshot(&replica.snapshot())?;
        }
        let mut written = 0;
        for (entity, replicas) in &self.replicas {
            let Some(proposer) = replicas.values().find(|r| r.is_proposer()) else {
                continue;
            };
            let last = self.persisted_frames.get(entity).copied();
            for header in proposer.frames().filter(|h| last.map_or(true, |l| h.height > l)) {
                storage.put_frame(entity, header)?;
                self.persisted_frames.insert(entity.clone(), header.height);
                written += 1;
            }
        }
        Ok(written)
    }

    fn drain_events(&mut self) -> usize {
        let mut count = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    count += 1;
                    for recipient in event.recipients() {
                        match self.proposer_mut(&recipient) {
                            Some(proposer) => proposer.add_tx(EntityTx::Jurisdiction(event.clone())),
                            None => tracing::trace!(entity = %recipient, "event for an entity hosted elsewhere"),
                        }
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "jurisdiction event receiver lagged");
                }
            }
        }
        count
    }

    /// A rejected submission leaves the batch `Sent` until it expires.
    async fn submit_batch(&self, submission: Submission) {
        let result = self
            .jurisdiction
            .submit_tx(
                &submission.encoded_batch,
                &submission.entity,
                &submission.aggregate_signature,
                submission.entity_nonce,
            )
            .await;
        match result {
            Ok(tx_hash) => tracing::info!(
                entity = %submission.entity,
                nonce = submission.entity_nonce,
                tx_hash = %tx_hash,
                "batch submitted"
            ),
            Err(e) => tracing::warn!(
                entity = %submission.entity,
                nonce = submission.entity_nonce,
                error = %e,
                "batch submission rejected"
            ),
        }
    }
}
