//! One validator's replica of an entity and its consensus round.
//!
//! Rounds follow PROPOSE -> PRECOMMIT -> COMMIT. Every input is an explicit
//! message and every side effect is returned as a [`ReplicaAction`] for the
//! runtime to deliver; a replica never touches another entity's state.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use xln_core::{
    short_hex, EngineConfig, EntityId, Hash, HashToSign, HashType, Quorum, ValidatorId, ZERO_HASH,
};
use xln_batch::BatchStatus;
use xln_crypto::{sign_hash, verify_hash, Hanko, HankoBuilder, KeyPair, PublicKey, Signature, SignerDirectory};

use crate::error::EntityError;
use crate::frame::{build_frame, execute_frame, Frame, FrameExecution, FrameHeader};
use crate::round::{RoundEvent, RoundPhase, RoundStateMachine};
use crate::state::EntityState;
use crate::tx::{EntityTx, FrameContext, TxOutcome};

/// Committed frame headers kept in memory.
pub const FRAME_CHAIN_CAP: usize = 1024;

/// Consensus traffic between validators of one entity.
///
/// `signatures` always hold the frame-hash signature first, followed by one
/// signature per hash to sign, in frame order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaMessage {
    Proposal {
        entity: EntityId,
        from: ValidatorId,
        frame: Frame,
        signatures: Vec<Signature>,
    },
    Precommit {
        entity: EntityId,
        from: ValidatorId,
        frame_hash: Hash,
        signatures: Vec<Signature>,
    },
    /// Frame hanko first, then one hanko per hash to sign.
    Commit {
        entity: EntityId,
        frame: Frame,
        hankos: Vec<Hanko>,
    },
}

impl ReplicaMessage {
    pub fn entity(&self) -> &EntityId {
        match self {
            Self::Proposal { entity, .. } | Self::Precommit { entity, .. } | Self::Commit { entity, .. } => entity,
        }
    }
}

/// A hanko-signed batch ready for the jurisdiction adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub entity: EntityId,
    pub batch_hash: Hash,
    pub encoded_batch: Vec<u8>,
    pub aggregate_signature: Vec<u8>,
    pub entity_nonce: u64,
}

/// Side effects a replica asks the runtime to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaAction {
    ToValidator {
        to: ValidatorId,
        message: ReplicaMessage,
    },
    /// A transaction for another entity's mempool.
    ToEntity { to: EntityId, tx: EntityTx },
    Submit(Submission),
}

#[derive(Debug, Clone)]
struct Round {
    frame: Frame,
    execution: FrameExecution,
    hashes: Vec<HashToSign>,
    started_at: u64,
    precommits: BTreeMap<ValidatorId, Vec<Signature>>,
}

/// Persisted form of a replica. Keys and in-flight rounds are not included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSnapshot {
    pub entity_id: EntityId,
    pub validator_id: ValidatorId,
    pub state: EntityState,
    pub frames: Vec<FrameHeader>,
    pub mempool: Vec<EntityTx>,
}

pub struct Replica {
    entity_id: EntityId,
    validator_id: ValidatorId,
    quorum: Quorum,
    keypair: KeyPair,
    directory: SignerDirectory,
    config: EngineConfig,
    pub state: EntityState,
    pub mempool: VecDeque<EntityTx>,
    phase: RoundPhase,
    round: Option<Round>,
    hanko_witness: BTreeMap<Hash, Hanko>,
    frames: VecDeque<FrameHeader>,
}

impl Replica {
    pub fn new(
        entity_id: EntityId,
        validator_id: ValidatorId,
        quorum: Quorum,
        keypair: KeyPair,
        validator_keys: impl IntoIterator<Item = (ValidatorId, PublicKey)>,
        config: EngineConfig,
    ) -> Result<Self, EntityError> {
        if !quorum.contains(&validator_id) {
            return Err(EntityError::UnknownValidator(validator_id));
        }
        let mut directory = SignerDirectory::new();
        for (validator, key) in validator_keys {
            directory.insert_key(validator, key);
        }
        let account_key = directory
            .key(quorum.proposer())
            .cloned()
            .ok_or_else(|| EntityError::UnknownValidator(quorum.proposer().clone()))?;

        Ok(Self {
            state: EntityState::new(entity_id.clone(), account_key),
            entity_id,
            validator_id,
            quorum,
            keypair,
            directory,
            config,
            mempool: VecDeque::new(),
            phase: RoundPhase::Idle,
            round: None,
            hanko_witness: BTreeMap::new(),
            frames: VecDeque::new(),
        })
    }

    /// Rebuild a replica from a snapshot.
    ///
    /// The proposer re-requests the hanko of a batch left `Sent`, since the
    /// witness did not survive the restart.
    pub fn restore(
        snapshot: ReplicaSnapshot,
        quorum: Quorum,
        keypair: KeyPair,
        validator_keys: impl IntoIterator<Item = (ValidatorId, PublicKey)>,
        config: EngineConfig,
    ) -> Result<Self, EntityError> {
        let mut replica = Self::new(
            snapshot.entity_id,
            snapshot.validator_id,
            quorum,
            keypair,
            validator_keys,
            config,
        )?;
        replica.state = snapshot.state;
        replica.frames = snapshot.frames.into();
        replica.mempool = snapshot.mempool.into();
        if !replica.frames.is_empty() {
            replica.phase = RoundPhase::Committed;
        }
        if replica.is_proposer() && replica.state.batch.status == BatchStatus::Sent {
            tracing::info!(
                entity = %replica.entity_id,
                nonce = replica.state.batch.entity_nonce,
                "recovering sent batch after restart"
            );
            replica.mempool.push_front(EntityTx::BatchRetry);
        }
        Ok(replica)
    }

    pub fn snapshot(&self) -> ReplicaSnapshot {
        ReplicaSnapshot {
            entity_id: self.entity_id.clone(),
            validator_id: self.validator_id.clone(),
            state: self.state.clone(),
            frames: self.frames.iter().cloned().collect(),
            mempool: self.mempool.iter().cloned().collect(),
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn validator_id(&self) -> &ValidatorId {
        &self.validator_id
    }

    pub fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_proposer(&self) -> bool {
        self.quorum.proposer() == &self.validator_id
    }

    pub fn frames(&self) -> impl Iterator<Item = &FrameHeader> {
        self.frames.iter()
    }

    pub fn last_frame_hash(&self) -> Hash {
        self.frames.back().map(|h| h.hash).unwrap_or(ZERO_HASH)
    }

    /// Hanko collected in the last committed round.
    pub fn hanko(&self, hash: &Hash) -> Option<&Hanko> {
        self.hanko_witness.get(hash)
    }

    pub fn add_tx(&mut self, tx: EntityTx) {
        self.mempool.push_back(tx);
    }

    /// Whether the runtime should call [`Replica::propose`].
    pub fn ready_to_propose(&self) -> bool {
        self.is_proposer() && !self.mempool.is_empty() && !self.phase.in_round()
    }

    pub fn handle(&mut self, message: ReplicaMessage) -> Result<Vec<ReplicaAction>, EntityError> {
        if message.entity() != &self.entity_id {
            return Err(EntityError::WrongEntity {
                expected: self.entity_id.clone(),
                got: message.entity().clone(),
            });
        }
        match message {
            ReplicaMessage::Proposal {
                from,
                frame,
                signatures,
                ..
            } => self.on_proposal(&from, frame, signatures),
            ReplicaMessage::Precommit {
                from,
                frame_hash,
                signatures,
                ..
            } => self.on_precommit(&from, &frame_hash, signatures),
            ReplicaMessage::Commit { frame, hankos, .. } => self.on_commit(frame, hankos),
        }
    }

    /// Order the mempool into a frame and open a round.
    pub fn propose(&mut self, timestamp: u64) -> Result<Vec<ReplicaAction>, EntityError> {
        if !self.is_proposer() {
            return Err(EntityError::NotProposer(self.validator_id.clone()));
        }
        if self.phase.in_round() {
            return Err(EntityError::RoundInProgress);
        }
        if self.mempool.is_empty() {
            return Err(EntityError::EmptyMempool);
        }

        let take = self.mempool.len().min(self.config.max_frame_txs);
        let transactions: Vec<EntityTx> = self.mempool.drain(..take).collect();
        let ctx = FrameContext {
            height: self.state.height + 1,
            timestamp: timestamp.max(self.state.timestamp),
        };
        let (frame, execution) =
            match build_frame(&self.state, self.last_frame_hash(), transactions.clone(), &ctx, &self.config) {
                Ok(built) => built,
                Err(e) => {
                    self.requeue(transactions);
                    return Err(e);
                }
            };

        let hashes = execution.outcome.hashes_to_sign.clone();
        let signatures = self.sign_round(&frame.hash, &hashes);
        self.phase = RoundStateMachine::transition(self.phase, RoundEvent::Propose)?;

        tracing::info!(
            entity = %self.entity_id,
            height = frame.height,
            frame = %short_hex(&frame.hash),
            txs = frame.transactions.len(),
            hashes = hashes.len(),
            "frame proposed"
        );

        let mut precommits = BTreeMap::new();
        precommits.insert(self.validator_id.clone(), signatures.clone());
        let message = ReplicaMessage::Proposal {
            entity: self.entity_id.clone(),
            from: self.validator_id.clone(),
            frame: frame.clone(),
            signatures,
        };
        self.round = Some(Round {
            frame,
            execution,
            hashes,
            started_at: ctx.timestamp,
            precommits,
        });

        if self.quorum.is_satisfied_by([&self.validator_id]) {
            return self.finalize_round();
        }
        Ok(self.broadcast(message))
    }

    /// Validator side: re-execute the proposed frame and precommit if it matches.
    pub fn on_proposal(
        &mut self,
        from: &ValidatorId,
        frame: Frame,
        signatures: Vec<Signature>,
    ) -> Result<Vec<ReplicaAction>, EntityError> {
        if from != self.quorum.proposer() {
            return Err(EntityError::NotProposer(from.clone()));
        }
        self.check_extends_chain(&frame)?;
        frame.check_hash()?;

        let execution = execute_frame(&self.state, &frame.transactions, &frame.context(), &self.config);
        let local = execution.state.state_hash()?;
        if local != frame.state_hash {
            let err = EntityError::ConsensusDivergence {
                height: frame.height,
                expected: short_hex(&frame.state_hash),
                got: short_hex(&local),
            };
            tracing::warn!(entity = %self.entity_id, error = %err, "dropping round");
            return Err(err);
        }
        let hashes = execution.outcome.hashes_to_sign.clone();
        self.verify_round_signatures(from, &frame.hash, &hashes, &signatures)?;

        if self.phase.in_round() {
            tracing::debug!(entity = %self.entity_id, height = frame.height, "replacing pending round");
            self.abandon_round();
        }
        let own = self.sign_round(&frame.hash, &hashes);
        self.phase = RoundStateMachine::transition(self.phase, RoundEvent::ProposalAccepted)?;

        let reply = ReplicaMessage::Precommit {
            entity: self.entity_id.clone(),
            from: self.validator_id.clone(),
            frame_hash: frame.hash,
            signatures: own,
        };
        tracing::debug!(
            entity = %self.entity_id,
            validator = %self.validator_id,
            height = frame.height,
            "frame precommitted"
        );
        self.round = Some(Round {
            started_at: frame.timestamp,
            frame,
            execution,
            hashes,
            precommits: BTreeMap::new(),
        });
        Ok(vec![ReplicaAction::ToValidator {
            to: from.clone(),
            message: reply,
        }])
    }

    /// Proposer side: collect a precommit and commit once the quorum is reached.
    pub fn on_precommit(
        &mut self,
        from: &ValidatorId,
        frame_hash: &Hash,
        signatures: Vec<Signature>,
    ) -> Result<Vec<ReplicaAction>, EntityError> {
        if !self.is_proposer() {
            return Err(EntityError::NotProposer(self.validator_id.clone()));
        }
        if !self.quorum.contains(from) {
            return Err(EntityError::UnknownValidator(from.clone()));
        }
        let round = self.round.as_ref().ok_or(EntityError::NoActiveRound)?;
        if &round.frame.hash != frame_hash {
            tracing::debug!(
                entity = %self.entity_id,
                from = %from,
                frame = %short_hex(frame_hash),
                "precommit for another frame ignored"
            );
            return Ok(Vec::new());
        }
        let (frame_hash, hashes) = (round.frame.hash, round.hashes.clone());
        self.verify_round_signatures(from, &frame_hash, &hashes, &signatures)?;

        self.phase = RoundStateMachine::transition(self.phase, RoundEvent::Precommit)?;
        let round = self.round.as_mut().ok_or(EntityError::NoActiveRound)?;
        round.precommits.insert(from.clone(), signatures);
        if self.quorum.is_satisfied_by(round.precommits.keys()) {
            return self.finalize_round();
        }
        Ok(Vec::new())
    }

    /// Validator side: verify the frame hanko and apply the frame.
    pub fn on_commit(&mut self, frame: Frame, hankos: Vec<Hanko>) -> Result<Vec<ReplicaAction>, EntityError> {
        self.check_extends_chain(&frame)?;
        if !hankos
            .iter()
            .any(|h| h.kind == HashType::Frame && h.hash == frame.hash)
        {
            return Err(EntityError::QuorumFailure {
                height: frame.height,
                have: 0,
                need: self.quorum.threshold(),
            });
        }
        for hanko in &hankos {
            hanko.verify(&self.quorum, &self.directory)?;
        }

        let execution = match self.round.take() {
            Some(round) if round.frame.hash == frame.hash => round.execution,
            _ => {
                frame.check_hash()?;
                let execution = execute_frame(&self.state, &frame.transactions, &frame.context(), &self.config);
                let local = execution.state.state_hash()?;
                if local != frame.state_hash {
                    self.phase = RoundPhase::Idle;
                    return Err(EntityError::ConsensusDivergence {
                        height: frame.height,
                        expected: short_hex(&frame.state_hash),
                        got: short_hex(&local),
                    });
                }
                execution
            }
        };
        if !self.phase.in_round() {
            // commit without a local round (missed proposal)
            self.phase = RoundPhase::Precommitting;
        }
        self.commit_frame(frame, execution.state, hankos)?;
        Ok(Vec::new())
    }

    /// Abandon a round that did not reach quorum within the timeout.
    ///
    /// The proposer puts the frame's transactions back at the front of the
    /// mempool. Returns whether a round was abandoned.
    pub fn tick(&mut self, now: u64) -> bool {
        let Some(round) = &self.round else {
            return false;
        };
        if now.saturating_sub(round.started_at) < self.config.round_timeout_ms {
            return false;
        }
        let failure = EntityError::QuorumFailure {
            height: round.frame.height,
            have: self.quorum.weight_of_set(round.precommits.keys()),
            need: self.quorum.threshold(),
        };
        tracing::warn!(entity = %self.entity_id, validator = %self.validator_id, error = %failure, "round timed out");
        self.abandon_round();
        true
    }

    fn abandon_round(&mut self) {
        if let Some(round) = self.round.take() {
            if self.is_proposer() {
                self.requeue(round.frame.transactions);
            }
        }
        self.phase = RoundStateMachine::transition(self.phase, RoundEvent::Abandon).unwrap_or(RoundPhase::Idle);
    }

    fn requeue(&mut self, transactions: Vec<EntityTx>) {
        for tx in transactions.into_iter().rev() {
            self.mempool.push_front(tx);
        }
    }

    fn finalize_round(&mut self) -> Result<Vec<ReplicaAction>, EntityError> {
        let round = self.round.as_ref().ok_or(EntityError::NoActiveRound)?;
        let mut hankos = Vec::with_capacity(round.hashes.len() + 1);
        let targets = std::iter::once((HashType::Frame, round.frame.hash))
            .chain(round.hashes.iter().map(|h| (h.kind, h.hash)));
        for (index, (kind, hash)) in targets.enumerate() {
            let mut builder = HankoBuilder::new(kind, hash);
            for (validator, signatures) in &round.precommits {
                if let Some(signature) = signatures.get(index) {
                    builder.add_signature(validator.clone(), signature.clone());
                }
            }
            hankos.push(builder.build(&self.quorum, &self.directory)?);
        }

        let Some(round) = self.round.take() else {
            return Err(EntityError::NoActiveRound);
        };
        let outcome = round.execution.outcome.clone();
        let commit = ReplicaMessage::Commit {
            entity: self.entity_id.clone(),
            frame: round.frame.clone(),
            hankos: hankos.clone(),
        };
        self.commit_frame(round.frame, round.execution.state, hankos)?;

        let mut actions = self.broadcast(commit);
        actions.extend(self.post_commit(&outcome));
        Ok(actions)
    }

    fn commit_frame(&mut self, frame: Frame, state: EntityState, hankos: Vec<Hanko>) -> Result<(), EntityError> {
        self.phase = RoundStateMachine::transition(self.phase, RoundEvent::Commit)?;
        self.state = state;
        self.hanko_witness = hankos.into_iter().map(|h| (h.hash, h)).collect();
        self.frames.push_back(frame.header());
        while self.frames.len() > FRAME_CHAIN_CAP {
            self.frames.pop_front();
        }
        tracing::info!(
            entity = %self.entity_id,
            validator = %self.validator_id,
            height = frame.height,
            frame = %short_hex(&frame.hash),
            txs = frame.transactions.len(),
            "frame committed"
        );
        Ok(())
    }

    /// Sign bilateral outputs and attach hankos to batch submissions.
    /// Runs on the proposer only.
    pub(crate) fn post_commit(&self, outcome: &TxOutcome) -> Vec<ReplicaAction> {
        if !self.is_proposer() {
            return Vec::new();
        }
        let mut actions = Vec::new();
        for output in &outcome.outputs {
            let (to, tx) = output.clone().sign(&self.entity_id, &self.keypair);
            actions.push(ReplicaAction::ToEntity { to, tx });
        }
        for submission in &outcome.jurisdiction_outputs {
            match self.hanko_witness.get(&submission.batch_hash) {
                Some(hanko) => actions.push(ReplicaAction::Submit(Submission {
                    entity: self.entity_id.clone(),
                    batch_hash: submission.batch_hash,
                    encoded_batch: submission.encoded_batch.clone(),
                    aggregate_signature: hanko.to_bytes(),
                    entity_nonce: submission.entity_nonce,
                })),
                None => tracing::warn!(
                    entity = %self.entity_id,
                    batch = %short_hex(&submission.batch_hash),
                    "no hanko for batch; leaving it sent"
                ),
            }
        }
        actions
    }

    fn check_extends_chain(&self, frame: &Frame) -> Result<(), EntityError> {
        let expected = self.state.height + 1;
        if frame.height != expected {
            return Err(EntityError::WrongHeight {
                expected,
                got: frame.height,
            });
        }
        if frame.prev_frame_hash != self.last_frame_hash() {
            return Err(EntityError::WrongPredecessor(frame.height));
        }
        if frame.timestamp < self.state.timestamp {
            return Err(EntityError::TimestampRegression {
                last: self.state.timestamp,
                got: frame.timestamp,
            });
        }
        Ok(())
    }

    fn sign_round(&self, frame_hash: &Hash, hashes: &[HashToSign]) -> Vec<Signature> {
        std::iter::once(sign_hash(HashType::Frame, frame_hash, &self.keypair))
            .chain(hashes.iter().map(|h| sign_hash(h.kind, &h.hash, &self.keypair)))
            .collect()
    }

    fn verify_round_signatures(
        &self,
        signer: &ValidatorId,
        frame_hash: &Hash,
        hashes: &[HashToSign],
        signatures: &[Signature],
    ) -> Result<(), EntityError> {
        if signatures.len() != hashes.len() + 1 {
            return Err(EntityError::SignatureCount {
                expected: hashes.len() + 1,
                got: signatures.len(),
            });
        }
        let key = self
            .directory
            .key(signer)
            .ok_or_else(|| EntityError::UnknownValidator(signer.clone()))?;
        verify_hash(HashType::Frame, frame_hash, &signatures[0], key)?;
        for (h, signature) in hashes.iter().zip(&signatures[1..]) {
            verify_hash(h.kind, &h.hash, signature, key)?;
        }
        Ok(())
    }

    fn broadcast(&self, message: ReplicaMessage) -> Vec<ReplicaAction> {
        self.quorum
            .validators()
            .filter(|v| *v != &self.validator_id)
            .map(|v| ReplicaAction::ToValidator {
                to: v.clone(),
                message: message.clone(),
            })
            .collect()
    }
}
