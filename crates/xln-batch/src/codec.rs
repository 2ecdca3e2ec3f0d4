//! Versioned binary encoding of batches and the batch hash.
//!
//! Integers are big-endian, variable-length fields carry a `u32` length
//! prefix and every op starts with one tag byte. Both directions are pure.

use xln_account::{
    Delta, DisputeFinalization, DisputeProof, FinalDisputeProof, SettlementDiff, SettlementOp,
};
use xln_core::{CoreError, Decoder, Encoder, Hash, JurisdictionConfig, Side};
use xln_crypto::{hash, Signature};

use crate::error::BatchError;
use crate::ops::BatchOp;

pub const BATCH_CODEC_VERSION: u8 = 1;

const BATCH_HASH_DOMAIN: &str = "xln/batch/v1";

pub fn encode_batch(ops: &[BatchOp]) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.put_u8(BATCH_CODEC_VERSION).put_u32(ops.len() as u32);
    for op in ops {
        encode_op(&mut enc, op);
    }
    enc.finish()
}

pub fn decode_batch(bytes: &[u8]) -> Result<Vec<BatchOp>, BatchError> {
    let mut dec = Decoder::new(bytes);
    let version = dec.u8()?;
    if version != BATCH_CODEC_VERSION {
        return Err(BatchError::UnsupportedVersion(version));
    }
    let count = dec.u32()? as usize;
    let mut ops = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        ops.push(decode_op(&mut dec)?);
    }
    dec.finish()?;
    Ok(ops)
}

/// `H("xln/batch/v1" || chain_id || depository || len || encoded || entity_nonce)`.
pub fn batch_hash(
    jurisdiction: &JurisdictionConfig,
    encoded: &[u8],
    entity_nonce: u64,
) -> Result<Hash, BatchError> {
    let mut enc = Encoder::with_domain(BATCH_HASH_DOMAIN);
    enc.put_u64(jurisdiction.chain_id)
        .put_address(&jurisdiction.depository()?)
        .put_bytes(encoded)
        .put_u64(entity_nonce);
    Ok(hash(enc.as_bytes()))
}

fn encode_op(enc: &mut Encoder, op: &BatchOp) {
    enc.put_u8(op.tag());
    match op {
        BatchOp::ReserveToReserve { token_id, to, amount } => {
            enc.put_u32(*token_id).put_entity(to).put_u128(*amount);
        }
        BatchOp::ReserveToCollateral {
            token_id,
            counterparty,
            amount,
        } => {
            enc.put_u32(*token_id).put_entity(counterparty).put_u128(*amount);
        }
        BatchOp::Settlement(s) => {
            enc.put_entity(&s.left)
                .put_entity(&s.right)
                .put_u64(s.nonce)
                .put_u32(s.diffs.len() as u32);
            for diff in &s.diffs {
                diff.encode_into(enc);
            }
            enc.put_bytes(&s.counterparty_signature.to_bytes());
        }
        BatchOp::DisputeStart(d) => {
            d.proof.encode_into(enc);
            enc.put_u8(d.signer.tag()).put_bytes(&d.signature.to_bytes());
        }
        BatchOp::DisputeFinalize(d) => {
            enc.put_entity(&d.left)
                .put_entity(&d.right)
                .put_u64(d.nonce)
                .put_hash(&d.dispute_hash);
        }
        BatchOp::Reveal { secret } => {
            enc.put_hash(secret);
        }
    }
}

fn decode_op(dec: &mut Decoder<'_>) -> Result<BatchOp, BatchError> {
    let op = match dec.u8()? {
        1 => BatchOp::ReserveToReserve {
            token_id: dec.u32()?,
            to: dec.entity()?,
            amount: dec.u128()?,
        },
        2 => BatchOp::ReserveToCollateral {
            token_id: dec.u32()?,
            counterparty: dec.entity()?,
            amount: dec.u128()?,
        },
        3 => {
            let left = dec.entity()?;
            let right = dec.entity()?;
            let nonce = dec.u64()?;
            let count = dec.u32()? as usize;
            let mut diffs = Vec::with_capacity(count.min(256));
            for _ in 0..count {
                diffs.push(SettlementDiff {
                    token_id: dec.u32()?,
                    left_reserve_diff: dec.i128()?,
                    right_reserve_diff: dec.i128()?,
                    collateral_diff: dec.i128()?,
                    offdelta_diff: dec.i128()?,
                });
            }
            BatchOp::Settlement(SettlementOp {
                left,
                right,
                nonce,
                diffs,
                counterparty_signature: Signature::from_bytes(&dec.bytes()?)?,
            })
        }
        4 => {
            let proof = decode_dispute_proof(dec)?;
            let signer = decode_side(dec.u8()?)?;
            BatchOp::DisputeStart(FinalDisputeProof {
                proof,
                signer,
                signature: Signature::from_bytes(&dec.bytes()?)?,
            })
        }
        5 => BatchOp::DisputeFinalize(DisputeFinalization {
            left: dec.entity()?,
            right: dec.entity()?,
            nonce: dec.u64()?,
            dispute_hash: dec.hash()?,
        }),
        6 => BatchOp::Reveal {
            secret: dec.hash()?,
        },
        other => return Err(BatchError::UnknownOpTag(other)),
    };
    Ok(op)
}

fn decode_dispute_proof(dec: &mut Decoder<'_>) -> Result<DisputeProof, BatchError> {
    let left = dec.entity()?;
    let right = dec.entity()?;
    let nonce = dec.u64()?;
    let height = dec.u64()?;
    let count = dec.u32()? as usize;
    let mut deltas = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        deltas.push(Delta {
            token_id: dec.u32()?,
            offdelta: dec.i128()?,
            collateral: dec.u128()?,
            left_credit_limit: dec.u128()?,
            right_credit_limit: dec.u128()?,
        });
    }
    Ok(DisputeProof {
        left,
        right,
        nonce,
        height,
        deltas,
    })
}

fn decode_side(tag: u8) -> Result<Side, CoreError> {
    match tag {
        0 => Ok(Side::Left),
        1 => Ok(Side::Right),
        other => Err(CoreError::Decode(format!("invalid side tag {}", other))),
    }
}
