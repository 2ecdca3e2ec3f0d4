//! Deterministic binary encoding for everything that gets hashed or signed.
//!
//! Integers are big-endian, variable-length fields carry a `u32` length
//! prefix. The encoder has no hidden state: the same values always produce
//! the same bytes.

use crate::error::CoreError;
use crate::types::{Address, EntityId, Hash};

/// Append-only byte writer.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an encoding with a domain tag (length-prefixed).
    pub fn with_domain(domain: &str) -> Self {
        let mut enc = Self::new();
        enc.put_str(domain);
        enc
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_bool(&mut self, v: bool) -> &mut Self {
        self.put_u8(v as u8)
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_u128(&mut self, v: u128) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_i128(&mut self, v: i128) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Fixed 32-byte hash, no length prefix.
    pub fn put_hash(&mut self, h: &Hash) -> &mut Self {
        self.buf.extend_from_slice(h);
        self
    }

    /// Fixed 20-byte address, no length prefix.
    pub fn put_address(&mut self, a: &Address) -> &mut Self {
        self.buf.extend_from_slice(a);
        self
    }

    /// Length-prefixed bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn put_str(&mut self, s: &str) -> &mut Self {
        self.put_bytes(s.as_bytes())
    }

    pub fn put_entity(&mut self, id: &EntityId) -> &mut Self {
        self.put_str(id.as_str())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over bytes produced by [`Encoder`].
#[derive(Debug)]
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CoreError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                CoreError::Decode(format!(
                    "unexpected end of input at offset {} (wanted {} bytes)",
                    self.pos, n
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CoreError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CoreError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, CoreError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CoreError::Decode(format!("invalid bool byte {}", other))),
        }
    }

    pub fn u32(&mut self) -> Result<u32, CoreError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, CoreError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn u128(&mut self) -> Result<u128, CoreError> {
        Ok(u128::from_be_bytes(self.array()?))
    }

    pub fn i128(&mut self) -> Result<i128, CoreError> {
        Ok(i128::from_be_bytes(self.array()?))
    }

    pub fn hash(&mut self) -> Result<Hash, CoreError> {
        self.array()
    }

    pub fn address(&mut self) -> Result<Address, CoreError> {
        self.array()
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, CoreError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn string(&mut self) -> Result<String, CoreError> {
        String::from_utf8(self.bytes()?)
            .map_err(|e| CoreError::Decode(format!("invalid utf-8: {}", e)))
    }

    pub fn entity(&mut self) -> Result<EntityId, CoreError> {
        Ok(EntityId(self.string()?))
    }

    pub fn is_finished(&self) -> bool {
        self.pos == self.bytes.len()
    }

    /// Fail if trailing bytes remain.
    pub fn finish(self) -> Result<(), CoreError> {
        if self.is_finished() {
            Ok(())
        } else {
            Err(CoreError::Decode(format!(
                "{} trailing bytes",
                self.bytes.len() - self.pos
            )))
        }
    }
}
