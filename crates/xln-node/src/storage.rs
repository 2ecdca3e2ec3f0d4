//! RocksDB storage backend for replica snapshots and committed frame headers.

use anyhow::Result;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;
use xln_core::{EntityId, ValidatorId};
use xln_entity::{FrameHeader, ReplicaSnapshot};

/// Column family names for different data types.
const CF_REPLICAS: &str = "replicas";
const CF_FRAMES: &str = "frames";

/// RocksDB-backed storage for the XLN node.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create a RocksDB database at the given path with column families.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_REPLICAS, Options::default()),
            ColumnFamilyDescriptor::new(CF_FRAMES, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self { db })
    }

    /// Put a value into a column family.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    /// Get a value from a column family.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        let value = self.db.get_cf(&cf, key)?;
        Ok(value)
    }

    /// Delete a key from a column family.
    pub fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))?;
        self.db.delete_cf(&cf, key)?;
        Ok(())
    }

    /// Store a replica snapshot under `entity/validator`.
    pub fn put_snapshot(&self, snapshot: &ReplicaSnapshot) -> Result<()> {
        let key = snapshot_key(&snapshot.entity_id, &snapshot.validator_id);
        let data = serde_json::to_vec(snapshot)?;
        self.put(CF_REPLICAS, key.as_bytes(), &data)
    }

    pub fn get_snapshot(&self, entity: &EntityId, validator: &ValidatorId) -> Result<Option<ReplicaSnapshot>> {
        let key = snapshot_key(entity, validator);
        match self.get(CF_REPLICAS, key.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Every stored snapshot, ordered by key.
    pub fn snapshots(&self) -> Result<Vec<ReplicaSnapshot>> {
        let cf = self
            .db
            .cf_handle(CF_REPLICAS)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", CF_REPLICAS))?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Append a committed frame header to the entity's chain.
    pub fn put_frame(&self, entity: &EntityId, header: &FrameHeader) -> Result<()> {
        let data = serde_json::to_vec(header)?;
        self.put(CF_FRAMES, frame_key(entity, header.height).as_bytes(), &data)
    }

    /// Stored frame headers of `entity`, oldest first.
    pub fn frames(&self, entity: &EntityId) -> Result<Vec<FrameHeader>> {
        let cf = self
            .db
            .cf_handle(CF_FRAMES)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", CF_FRAMES))?;
        let prefix = format!("{}/", entity);
        let mode = IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward);
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }
}

fn snapshot_key(entity: &EntityId, validator: &ValidatorId) -> String {
    format!("{}/{}", entity, validator)
}

/// Zero-padded so byte order matches height order.
fn frame_key(entity: &EntityId, height: u64) -> String {
    format!("{}/{:020}", entity, height)
}
