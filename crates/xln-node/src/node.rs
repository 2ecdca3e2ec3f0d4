//! The XLN node orchestrator.
//!
//! Builds the in-memory jurisdiction and every configured replica (restoring
//! snapshots from storage when present), then drives the runtime on a fixed
//! tick.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use xln_batch::InternalJurisdiction;
use xln_core::{EntityId, ValidatorId};
use xln_entity::Replica;

use crate::config::XlnConfig;
use crate::runtime::Runtime;
use crate::storage::Storage;

pub struct XlnNode {
    config: XlnConfig,
    jurisdiction: Arc<InternalJurisdiction>,
    runtime: Runtime,
}

impl XlnNode {
    /// Create the node and host every configured replica.
    pub fn new(config: XlnConfig) -> Result<Self> {
        config.validate()?;

        let storage = if config.storage.persist {
            let storage = Storage::open(&config.storage.data_dir)?;
            tracing::info!(path = %config.storage.data_dir.display(), "storage initialized");
            Some(storage)
        } else {
            None
        };

        let jurisdiction = Arc::new(InternalJurisdiction::new(config.engine.jurisdiction.clone()));
        let mut runtime = Runtime::new(jurisdiction.clone());

        for entity in &config.entities {
            let entity_id = entity.entity_id();
            let quorum = entity.quorum()?;
            let keys = entity.validator_keys()?;
            jurisdiction.register_entity(entity_id.clone(), quorum.clone(), keys.clone());

            for validator in &entity.validators {
                let validator_id = ValidatorId::from(validator.id.as_str());
                let keypair = entity.keypair(validator)?;
                let snapshot = match &storage {
                    Some(storage) => storage.get_snapshot(&entity_id, &validator_id)?,
                    None => None,
                };
                let replica = match snapshot {
                    Some(snapshot) => {
                        tracing::info!(entity = %entity_id, validator = %validator_id, "restoring replica");
                        Replica::restore(snapshot, quorum.clone(), keypair, keys.clone(), config.engine.clone())?
                    }
                    None => Replica::new(
                        entity_id.clone(),
                        validator_id,
                        quorum.clone(),
                        keypair,
                        keys.clone(),
                        config.engine.clone(),
                    )?,
                };
                runtime.add_replica(replica);
            }
        }

        for fund in &config.funding {
            jurisdiction.fund(&EntityId::from(fund.entity.as_str()), fund.token_id, fund.amount);
        }

        if let Some(storage) = storage {
            runtime = runtime.with_storage(storage);
        }

        tracing::info!(entities = config.entities.len(), "XLN node created");
        Ok(Self {
            config,
            jurisdiction,
            runtime,
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn jurisdiction(&self) -> &Arc<InternalJurisdiction> {
        &self.jurisdiction
    }

    /// Run the node's main loop until an error occurs.
    pub async fn run(&mut self) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.runtime.tick_interval_ms));
        tracing::info!(tick_ms = self.config.runtime.tick_interval_ms, "entering main loop");

        loop {
            interval.tick().await;
            let report = self.runtime.step(now_ms()).await?;
            if !report.is_idle() {
                tracing::debug!(?report, "runtime step");
            }
        }
    }

    /// Gracefully shut down the node.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down XLN node");
        self.runtime.persist()?;
        Ok(())
    }
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
