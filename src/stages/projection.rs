//! Slices to codebook similarities

use crate::collate::{map_payloads, unexpected_payload, Batch, CollateStage, Payload};
use crate::error::Result;
use crate::skm::{project_all, ClassCodebook};
use std::sync::Arc;

/// Projects every slice on the class codebooks, concatenated in class order
#[derive(Debug, Clone)]
pub struct SkmProjectionStage {
    codebooks: Arc<Vec<ClassCodebook>>,
}

impl SkmProjectionStage {
    pub fn new(codebooks: Arc<Vec<ClassCodebook>>) -> Self {
        Self { codebooks }
    }

    /// Width of the projected rows
    pub fn output_dim(&self) -> usize {
        self.codebooks.iter().map(|c| c.codebook.n_clusters()).sum()
    }
}

impl CollateStage for SkmProjectionStage {
    fn name(&self) -> &str {
        "skm_projection"
    }

    fn apply(&self, batch: Batch) -> Result<Batch> {
        map_payloads(self.name(), batch, |_, payload| match payload {
            Payload::Slices(slices) => Ok(Payload::Projections(project_all(
                &self.codebooks,
                slices.view(),
            )?)),
            other => Err(unexpected_payload("skm_projection", "slices", &other)),
        })
    }
}
