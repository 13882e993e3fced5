//! Spectrogram to flattened slices

use crate::collate::{map_payloads, unexpected_payload, Batch, CollateStage, Payload};
use crate::config::ReshapeConfig;
use crate::error::Result;
use crate::reshape::slice_flatten;

#[derive(Debug, Clone)]
pub struct SliceFlattenStage {
    config: ReshapeConfig,
}

impl SliceFlattenStage {
    pub fn new(config: ReshapeConfig) -> Self {
        Self { config }
    }
}

impl CollateStage for SliceFlattenStage {
    fn name(&self) -> &str {
        "slice_flatten"
    }

    fn apply(&self, batch: Batch) -> Result<Batch> {
        map_payloads(self.name(), batch, |_, payload| match payload {
            Payload::Spectrogram(spec) => {
                Ok(Payload::Slices(slice_flatten(&spec.data, &self.config)?))
            }
            other => Err(unexpected_payload("slice_flatten", "spectrogram", &other)),
        })
    }
}
