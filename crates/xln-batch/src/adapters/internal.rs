use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use xln_account::{DisputeProof, TokenSettlement};
use xln_core::{
    canonical_pair, short_hex, EntityId, Hash, HashType, JurisdictionConfig, Quorum, Side, TokenId,
    ValidatorId,
};
use xln_crypto::{hash, verify_hash, Hanko, PublicKey, SignerResolver};

use crate::codec::{batch_hash, decode_batch};
use crate::error::BatchError;
use crate::ops::BatchOp;
use crate::traits::Jurisdiction;
use crate::types::{AccountSettlement, JurisdictionEvent};

const EVENT_CAPACITY: usize = 1024;
const BASE_GAS: u64 = 21_000;
const GAS_PER_OP: u64 = 30_000;

/// On-chain view of one bilateral account.
#[derive(Debug, Clone, Default)]
struct AccountLedger {
    nonce: u64,
    collateral: BTreeMap<TokenId, u128>,
    ondelta: BTreeMap<TokenId, i128>,
    dispute: Option<OnchainDispute>,
}

#[derive(Debug, Clone)]
struct OnchainDispute {
    dispute_hash: Hash,
    proof: DisputeProof,
}

/// In-memory depository.
///
/// Verifies the entity nonce and the hanko against registered quorums,
/// executes the batch atomically against a DashMap ledger of reserves and
/// account collateral, and broadcasts the resulting events. Useful for tests
/// and local runs that do not need a real chain.
pub struct InternalJurisdiction {
    config: JurisdictionConfig,
    quorums: DashMap<EntityId, Quorum>,
    keys: DashMap<ValidatorId, PublicKey>,
    entity_nonces: DashMap<EntityId, u64>,
    reserves: DashMap<(EntityId, TokenId), u128>,
    accounts: DashMap<(EntityId, EntityId), AccountLedger>,
    revealed: DashMap<Hash, u64>,
    block_number: AtomicU64,
    fail_next: AtomicBool,
    events: broadcast::Sender<JurisdictionEvent>,
}

impl InternalJurisdiction {
    pub fn new(config: JurisdictionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            quorums: DashMap::new(),
            keys: DashMap::new(),
            entity_nonces: DashMap::new(),
            reserves: DashMap::new(),
            accounts: DashMap::new(),
            revealed: DashMap::new(),
            block_number: AtomicU64::new(0),
            fail_next: AtomicBool::new(false),
            events,
        }
    }

    /// Register an entity's quorum and its validators' public keys.
    pub fn register_entity(
        &self,
        entity: EntityId,
        quorum: Quorum,
        keys: impl IntoIterator<Item = (ValidatorId, PublicKey)>,
    ) {
        for (validator, key) in keys {
            self.keys.insert(validator, key);
        }
        tracing::info!(entity = %entity, threshold = quorum.threshold(), "entity registered with jurisdiction");
        self.quorums.insert(entity, quorum);
    }

    /// Credit reserve out of thin air (test faucet) and announce the new balance.
    pub fn fund(&self, entity: &EntityId, token_id: TokenId, amount: u128) {
        let reserve = {
            let mut entry = self.reserves.entry((entity.clone(), token_id)).or_insert(0);
            *entry = entry.saturating_add(amount);
            *entry
        };
        self.emit(JurisdictionEvent::ReserveUpdated {
            entity: entity.clone(),
            token_id,
            reserve,
        });
    }

    pub fn reserve(&self, entity: &EntityId, token_id: TokenId) -> u128 {
        self.reserves
            .get(&(entity.clone(), token_id))
            .map(|r| *r)
            .unwrap_or(0)
    }

    pub fn collateral(&self, a: &EntityId, b: &EntityId, token_id: TokenId) -> u128 {
        self.accounts
            .get(&canonical_pair(a, b))
            .and_then(|acct| acct.collateral.get(&token_id).copied())
            .unwrap_or(0)
    }

    pub fn account_nonce(&self, a: &EntityId, b: &EntityId) -> u64 {
        self.accounts
            .get(&canonical_pair(a, b))
            .map(|acct| acct.nonce)
            .unwrap_or(0)
    }

    pub fn in_dispute(&self, a: &EntityId, b: &EntityId) -> bool {
        self.accounts
            .get(&canonical_pair(a, b))
            .is_some_and(|acct| acct.dispute.is_some())
    }

    pub fn entity_nonce(&self, entity: &EntityId) -> u64 {
        self.entity_nonces.get(entity).map(|n| *n).unwrap_or(0)
    }

    pub fn is_revealed(&self, secret: &Hash) -> bool {
        self.revealed.contains_key(secret)
    }

    /// Make the next submission revert on-chain.
    pub fn fail_next_submission(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Key an entity signs bilateral messages with (its proposer's key).
    fn account_key(&self, entity: &EntityId) -> Result<PublicKey, BatchError> {
        let quorum = self
            .quorums
            .get(entity)
            .ok_or_else(|| BatchError::Rejected(format!("unknown entity {}", entity)))?;
        self.keys
            .get(quorum.proposer())
            .map(|k| k.clone())
            .ok_or_else(|| BatchError::Rejected(format!("no key for proposer of {}", entity)))
    }

    fn emit(&self, event: JurisdictionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl SignerResolver for InternalJurisdiction {
    fn public_key(&self, signer: &ValidatorId) -> Option<PublicKey> {
        self.keys.get(signer).map(|k| k.clone())
    }

    fn entity_quorum(&self, signer: &ValidatorId) -> Option<Quorum> {
        self.quorums
            .get(&EntityId(signer.0.clone()))
            .map(|q| q.clone())
    }
}

/// Staged ledger changes for one batch; written back only if every op succeeds.
struct Execution<'a> {
    chain: &'a InternalJurisdiction,
    provider: EntityId,
    reserves: BTreeMap<(EntityId, TokenId), u128>,
    accounts: BTreeMap<(EntityId, EntityId), AccountLedger>,
    settled: BTreeSet<(EntityId, EntityId)>,
    revealed: Vec<Hash>,
}

impl<'a> Execution<'a> {
    fn new(chain: &'a InternalJurisdiction, provider: EntityId) -> Self {
        Self {
            chain,
            provider,
            reserves: BTreeMap::new(),
            accounts: BTreeMap::new(),
            settled: BTreeSet::new(),
            revealed: Vec::new(),
        }
    }

    fn reserve(&self, entity: &EntityId, token_id: TokenId) -> u128 {
        self.reserves
            .get(&(entity.clone(), token_id))
            .copied()
            .unwrap_or_else(|| self.chain.reserve(entity, token_id))
    }

    fn set_reserve(&mut self, entity: &EntityId, token_id: TokenId, value: u128) {
        self.reserves.insert((entity.clone(), token_id), value);
    }

    fn shift_reserve(&mut self, entity: &EntityId, token_id: TokenId, diff: i128) -> Result<(), BatchError> {
        let current = self.reserve(entity, token_id);
        let next = apply_diff(current, diff).ok_or(BatchError::InsufficientReserve {
            token_id,
            available: current,
            required: diff.unsigned_abs(),
        })?;
        self.set_reserve(entity, token_id, next);
        Ok(())
    }

    fn account(&mut self, left: &EntityId, right: &EntityId) -> &mut AccountLedger {
        let chain = self.chain;
        self.accounts
            .entry((left.clone(), right.clone()))
            .or_insert_with(|| {
                chain
                    .accounts
                    .get(&(left.clone(), right.clone()))
                    .map(|a| a.clone())
                    .unwrap_or_default()
            })
    }

    /// The other party of an account the provider belongs to.
    fn counterparty_of(&self, left: &EntityId, right: &EntityId) -> Result<EntityId, BatchError> {
        if &self.provider == left {
            Ok(right.clone())
        } else if &self.provider == right {
            Ok(left.clone())
        } else {
            Err(BatchError::Rejected(format!(
                "{} is not a party of {}/{}",
                self.provider, left, right
            )))
        }
    }

    fn apply(&mut self, op: &BatchOp) -> Result<(), BatchError> {
        let provider = self.provider.clone();
        match op {
            BatchOp::ReserveToReserve { token_id, to, amount } => {
                let amount = to_signed(*amount)?;
                self.shift_reserve(&provider, *token_id, -amount)?;
                self.shift_reserve(to, *token_id, amount)?;
            }
            BatchOp::ReserveToCollateral {
                token_id,
                counterparty,
                amount,
            } => {
                let signed = to_signed(*amount)?;
                self.shift_reserve(&provider, *token_id, -signed)?;
                let (left, right) = canonical_pair(&provider, counterparty);
                let provider_is_left = provider == left;
                let acct = self.account(&left, &right);
                if acct.dispute.is_some() {
                    return Err(BatchError::Rejected("account is in dispute".into()));
                }
                let collateral = acct.collateral.entry(*token_id).or_insert(0);
                *collateral = collateral
                    .checked_add(*amount)
                    .ok_or_else(|| BatchError::Rejected("collateral overflow".into()))?;
                if provider_is_left {
                    *acct.ondelta.entry(*token_id).or_insert(0) += signed;
                }
                self.settled.insert((left, right));
            }
            BatchOp::Settlement(s) => {
                let counterparty = self.counterparty_of(&s.left, &s.right)?;
                let proposer = Side::of(&provider, &counterparty);
                let key = self.chain.account_key(&counterparty)?;
                verify_hash(
                    HashType::Settlement,
                    &s.proposal(proposer).hash(),
                    &s.counterparty_signature,
                    &key,
                )?;

                let acct = self.account(&s.left, &s.right);
                if acct.dispute.is_some() {
                    return Err(BatchError::Rejected("account is in dispute".into()));
                }
                if s.nonce != acct.nonce {
                    return Err(BatchError::Rejected(format!(
                        "stale settlement: nonce {} but account is at {}",
                        s.nonce, acct.nonce
                    )));
                }
                for diff in &s.diffs {
                    let acct = self.account(&s.left, &s.right);
                    let current = acct.collateral.get(&diff.token_id).copied().unwrap_or(0);
                    let collateral = apply_diff(current, diff.collateral_diff)
                        .ok_or_else(|| BatchError::Rejected("collateral would go negative".into()))?;
                    acct.collateral.insert(diff.token_id, collateral);
                    // ondelta + offdelta is unchanged by a settlement
                    *acct.ondelta.entry(diff.token_id).or_insert(0) -= diff.offdelta_diff;
                    self.shift_reserve(&s.left, diff.token_id, diff.left_reserve_diff)?;
                    self.shift_reserve(&s.right, diff.token_id, diff.right_reserve_diff)?;
                }
                self.account(&s.left, &s.right).nonce = s.nonce + 1;
                self.settled.insert((s.left.clone(), s.right.clone()));
            }
            BatchOp::DisputeStart(d) => {
                let proof = &d.proof;
                let counterparty = self.counterparty_of(&proof.left, &proof.right)?;
                if d.signer != Side::of(&counterparty, &provider) {
                    return Err(BatchError::Rejected(
                        "dispute proof must carry the counterparty's signature".into(),
                    ));
                }
                let key = self.chain.account_key(&counterparty)?;
                let dispute_hash = proof.hash();
                verify_hash(HashType::Dispute, &dispute_hash, &d.signature, &key)?;

                let acct = self.account(&proof.left, &proof.right);
                if acct.dispute.is_some() {
                    return Err(BatchError::Rejected("account is already in dispute".into()));
                }
                if proof.nonce < acct.nonce {
                    return Err(BatchError::Rejected(format!(
                        "stale dispute proof: nonce {} but account is at {}",
                        proof.nonce, acct.nonce
                    )));
                }
                acct.nonce = proof.nonce + 1;
                acct.dispute = Some(OnchainDispute {
                    dispute_hash,
                    proof: proof.clone(),
                });
                self.settled.insert((proof.left.clone(), proof.right.clone()));
            }
            BatchOp::DisputeFinalize(f) => {
                self.counterparty_of(&f.left, &f.right)?;
                let acct = self.account(&f.left, &f.right);
                let dispute = match acct.dispute.take() {
                    Some(d) if d.dispute_hash == f.dispute_hash => d,
                    _ => {
                        return Err(BatchError::Rejected(format!(
                            "no dispute {} on {}/{}",
                            short_hex(&f.dispute_hash),
                            f.left,
                            f.right
                        )))
                    }
                };
                // Split collateral by the disputed offdelta: right is owed the
                // positive part, left keeps the rest.
                let mut payouts = Vec::new();
                for delta in &dispute.proof.deltas {
                    // zeroed rather than removed so the settlement event reports them
                    let collateral = acct.collateral.insert(delta.token_id, 0).unwrap_or(0);
                    acct.ondelta.insert(delta.token_id, 0);
                    let owed_right = delta.offdelta.clamp(0, i128::MAX) as u128;
                    let to_right = owed_right.min(collateral);
                    payouts.push((delta.token_id, collateral - to_right, to_right));
                }
                for (token_id, to_left, to_right) in payouts {
                    self.shift_reserve(&f.left, token_id, to_signed(to_left)?)?;
                    self.shift_reserve(&f.right, token_id, to_signed(to_right)?)?;
                }
                self.settled.insert((f.left.clone(), f.right.clone()));
            }
            BatchOp::Reveal { secret } => self.revealed.push(*secret),
        }
        Ok(())
    }

    fn settlements(&self) -> Vec<AccountSettlement> {
        self.settled
            .iter()
            .filter_map(|(left, right)| {
                let acct = self.accounts.get(&(left.clone(), right.clone()))?;
                let tokens: BTreeSet<TokenId> = acct
                    .collateral
                    .keys()
                    .chain(acct.ondelta.keys())
                    .copied()
                    .collect();
                Some(AccountSettlement {
                    left: left.clone(),
                    right: right.clone(),
                    tokens: tokens
                        .into_iter()
                        .map(|token_id| TokenSettlement {
                            token_id,
                            left_reserve: self.reserve(left, token_id),
                            right_reserve: self.reserve(right, token_id),
                            collateral: acct.collateral.get(&token_id).copied().unwrap_or(0),
                            ondelta: acct.ondelta.get(&token_id).copied().unwrap_or(0),
                        })
                        .collect(),
                    nonce: acct.nonce,
                    dispute: acct.dispute.as_ref().map(|d| d.dispute_hash),
                })
            })
            .collect()
    }

    fn commit(self, block_number: u64) -> (Vec<AccountSettlement>, Vec<JurisdictionEvent>) {
        let settlements = self.settlements();
        let mut reserve_events = Vec::new();
        for ((entity, token_id), value) in self.reserves {
            self.chain.reserves.insert((entity.clone(), token_id), value);
            reserve_events.push(JurisdictionEvent::ReserveUpdated {
                entity,
                token_id,
                reserve: value,
            });
        }
        for (key, acct) in self.accounts {
            self.chain.accounts.insert(key, acct);
        }
        for secret in self.revealed {
            self.chain.revealed.insert(secret, block_number);
        }
        (settlements, reserve_events)
    }
}

fn apply_diff(current: u128, diff: i128) -> Option<u128> {
    if diff >= 0 {
        current.checked_add(diff as u128)
    } else {
        current.checked_sub(diff.unsigned_abs())
    }
}

fn to_signed(amount: u128) -> Result<i128, BatchError> {
    i128::try_from(amount).map_err(|_| BatchError::Rejected(format!("amount {} too large", amount)))
}

#[async_trait]
impl Jurisdiction for InternalJurisdiction {
    async fn submit_tx(
        &self,
        encoded_batch: &[u8],
        provider: &EntityId,
        aggregate_signature: &[u8],
        entity_nonce: u64,
    ) -> Result<String, BatchError> {
        let quorum = self
            .quorums
            .get(provider)
            .map(|q| q.clone())
            .ok_or_else(|| BatchError::Rejected(format!("unknown entity {}", provider)))?;

        let expected = self.entity_nonce(provider);
        if entity_nonce != expected {
            return Err(BatchError::NonceMismatch {
                expected,
                got: entity_nonce,
            });
        }

        let hash_of_batch = batch_hash(&self.config, encoded_batch, entity_nonce)?;
        let hanko = Hanko::from_bytes(aggregate_signature)?;
        if hanko.kind != HashType::Batch || hanko.hash != hash_of_batch {
            return Err(BatchError::Rejected(format!(
                "hanko covers {} {}, expected batch {}",
                hanko.kind,
                short_hex(&hanko.hash),
                short_hex(&hash_of_batch)
            )));
        }
        hanko.verify(&quorum, self)?;
        let ops = decode_batch(encoded_batch)?;

        let block_number = self.block_number.fetch_add(1, Ordering::SeqCst) + 1;
        let mut seed = hash_of_batch.to_vec();
        seed.extend_from_slice(&block_number.to_be_bytes());
        let tx_hash = format!("0x{}", hex::encode(hash(&seed)));
        let gas_used = BASE_GAS + GAS_PER_OP * ops.len() as u64;

        self.emit(JurisdictionEvent::BatchSubmitted {
            entity: provider.clone(),
            batch_hash: hash_of_batch,
            tx_hash: tx_hash.clone(),
        });

        let outcome = if self.fail_next.swap(false, Ordering::SeqCst) {
            Err(BatchError::Rejected("forced failure".into()))
        } else {
            let mut exec = Execution::new(self, provider.clone());
            ops.iter().try_for_each(|op| exec.apply(op)).map(|_| exec)
        };

        match outcome {
            Ok(exec) => {
                let (settlements, reserve_events) = exec.commit(block_number);
                self.entity_nonces.insert(provider.clone(), entity_nonce + 1);
                tracing::info!(
                    entity = %provider,
                    batch = %short_hex(&hash_of_batch),
                    block_number,
                    ops = ops.len(),
                    "batch executed"
                );
                for event in reserve_events {
                    self.emit(event);
                }
                if !settlements.is_empty() {
                    self.emit(JurisdictionEvent::AccountSettled { settlements });
                }
                self.emit(JurisdictionEvent::BatchProcessed {
                    entity: provider.clone(),
                    batch_hash: hash_of_batch,
                    tx_hash: tx_hash.clone(),
                    success: true,
                    block_number,
                    gas_used,
                });
            }
            Err(e) => {
                tracing::warn!(
                    entity = %provider,
                    batch = %short_hex(&hash_of_batch),
                    error = %e,
                    "batch reverted"
                );
                self.emit(JurisdictionEvent::BatchProcessed {
                    entity: provider.clone(),
                    batch_hash: hash_of_batch,
                    tx_hash: tx_hash.clone(),
                    success: false,
                    block_number,
                    gas_used: BASE_GAS,
                });
            }
        }
        Ok(tx_hash)
    }

    fn subscribe(&self) -> broadcast::Receiver<JurisdictionEvent> {
        self.events.subscribe()
    }

    fn jurisdiction_id(&self) -> &str {
        "jurisdiction-internal"
    }
}
