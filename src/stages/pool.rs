//! Projections to pooled descriptors

use crate::collate::{map_payloads, unexpected_payload, Batch, CollateStage, Payload};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::pool::mean_std_pool;

#[derive(Debug, Clone)]
pub struct PoolStage {
    config: PoolConfig,
}

impl PoolStage {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }
}

impl CollateStage for PoolStage {
    fn name(&self) -> &str {
        "mean_std_pool"
    }

    fn apply(&self, batch: Batch) -> Result<Batch> {
        map_payloads(self.name(), batch, |_, payload| match payload {
            Payload::Projections(p) => Ok(Payload::Pooled(mean_std_pool(p.view(), &self.config)?)),
            other => Err(unexpected_payload("mean_std_pool", "projections", &other)),
        })
    }
}
