//! Collate pipeline: an ordered list of stages applied to batches
//!
//! A batch is a list of [`CollateItem`]s whose payload moves through
//! `Wave -> Spectrogram -> Slices -> Projections -> Pooled`. Stages must
//! keep the number and order of items; the pipeline checks both after every
//! stage.

use crate::config::{AugmentConfig, PoolConfig, ReshapeConfig, SpecConfig};
use crate::error::{Result, SkmError};
use crate::skm::ClassCodebook;
use crate::spectral::Spectrogram;
use crate::stages::{
    MelSpectrogramStage, PoolStage, SkmProjectionStage, SliceFlattenStage, StftSpectrogramStage,
    WhiteNoiseStage,
};
use ndarray::Array2;
use rayon::prelude::*;
use std::sync::Arc;

/// Data carried by one item at a given point of the pipeline
#[derive(Debug, Clone)]
pub enum Payload {
    Wave(Vec<f32>),
    Spectrogram(Spectrogram),
    /// `(n_slices, n_freq * slice_size)`
    Slices(Array2<f64>),
    /// `(n_slices, total_k)`
    Projections(Array2<f64>),
    /// `(n_windows, 2 * total_k)`
    Pooled(Array2<f64>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Wave(_) => "wave",
            Payload::Spectrogram(_) => "spectrogram",
            Payload::Slices(_) => "slices",
            Payload::Projections(_) => "projections",
            Payload::Pooled(_) => "pooled",
        }
    }

    /// Matrix payloads as rows; waves and spectrograms have none
    pub fn rows(&self) -> Option<&Array2<f64>> {
        match self {
            Payload::Slices(m) | Payload::Projections(m) | Payload::Pooled(m) => Some(m),
            Payload::Wave(_) | Payload::Spectrogram(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollateItem {
    pub filename: String,
    pub label: usize,
    pub payload: Payload,
}

pub type Batch = Vec<CollateItem>;

/// One transformation of a batch
pub trait CollateStage: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, batch: Batch) -> Result<Batch>;
}

/// Apply `f` to every payload in parallel, keeping item order
pub fn map_payloads<F>(stage: &str, batch: Batch, f: F) -> Result<Batch>
where
    F: Fn(&str, Payload) -> Result<Payload> + Send + Sync,
{
    batch
        .into_par_iter()
        .map(|item| -> Result<CollateItem> {
            let payload = f(&item.filename, item.payload).map_err(|e| {
                log::error!("{} failed on {}: {}", stage, item.filename, e);
                e
            })?;
            Ok(CollateItem {
                filename: item.filename,
                label: item.label,
                payload,
            })
        })
        .collect()
}

/// Error for a stage handed a payload it cannot consume
pub fn unexpected_payload(stage: &str, expected: &str, got: &Payload) -> SkmError {
    SkmError::ProcessingPipelineError(format!(
        "{} expects a {} payload, got {}",
        stage,
        expected,
        got.kind()
    ))
}

/// Ordered stages applied to every batch
#[derive(Clone, Default)]
pub struct CollatePipeline {
    stages: Vec<Arc<dyn CollateStage>>,
}

impl std::fmt::Debug for CollatePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}

impl CollatePipeline {
    pub fn builder() -> CollatePipelineBuilder {
        CollatePipelineBuilder::default()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn apply(&self, mut batch: Batch) -> Result<Batch> {
        for stage in &self.stages {
            let before: Vec<String> = batch.iter().map(|i| i.filename.clone()).collect();
            batch = stage.apply(batch)?;
            if batch.len() != before.len() {
                return Err(SkmError::ProcessingPipelineError(format!(
                    "stage {} changed batch size from {} to {}",
                    stage.name(),
                    before.len(),
                    batch.len()
                )));
            }
            if batch.iter().zip(&before).any(|(item, name)| &item.filename != name) {
                return Err(SkmError::ProcessingPipelineError(format!(
                    "stage {} reordered the batch",
                    stage.name()
                )));
            }
        }
        Ok(batch)
    }
}

#[derive(Default)]
pub struct CollatePipelineBuilder {
    stages: Vec<Arc<dyn CollateStage>>,
}

impl CollatePipelineBuilder {
    pub fn stage<S: CollateStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_if<S: CollateStage + 'static>(self, enabled: bool, stage: S) -> Self {
        if enabled {
            self.stage(stage)
        } else {
            self
        }
    }

    pub fn build(self) -> CollatePipeline {
        CollatePipeline {
            stages: self.stages,
        }
    }
}

fn spectrogram_stage(builder: CollatePipelineBuilder, spec: &SpecConfig) -> CollatePipelineBuilder {
    match spec {
        SpecConfig::Mel(mel) => builder.stage(MelSpectrogramStage::new(mel.clone())),
        SpecConfig::Stft(stft) => builder.stage(StftSpectrogramStage::new(stft.clone())),
    }
}

/// Wave to flattened slices, used to fit codebooks
pub fn slicing_pipeline(
    augment: Option<&AugmentConfig>,
    spec: &SpecConfig,
    reshape: &ReshapeConfig,
) -> CollatePipeline {
    let builder = CollatePipeline::builder().stage_if(
        augment.map(|a| a.enabled).unwrap_or(false),
        WhiteNoiseStage::new(augment.cloned().unwrap_or_default()),
    );
    spectrogram_stage(builder, spec)
        .stage(SliceFlattenStage::new(reshape.clone()))
        .build()
}

/// Wave to pooled descriptors, with augmentation when enabled
pub fn training_pipeline(
    augment: &AugmentConfig,
    spec: &SpecConfig,
    reshape: &ReshapeConfig,
    codebooks: Arc<Vec<ClassCodebook>>,
    pool: &PoolConfig,
) -> CollatePipeline {
    let builder =
        CollatePipeline::builder().stage_if(augment.enabled, WhiteNoiseStage::new(augment.clone()));
    spectrogram_stage(builder, spec)
        .stage(SliceFlattenStage::new(reshape.clone()))
        .stage(SkmProjectionStage::new(codebooks))
        .stage(PoolStage::new(pool.clone()))
        .build()
}

/// Wave to pooled descriptors without augmentation
pub fn evaluation_pipeline(
    spec: &SpecConfig,
    reshape: &ReshapeConfig,
    codebooks: Arc<Vec<ClassCodebook>>,
    pool: &PoolConfig,
) -> CollatePipeline {
    spectrogram_stage(CollatePipeline::builder(), spec)
        .stage(SliceFlattenStage::new(reshape.clone()))
        .stage(SkmProjectionStage::new(codebooks))
        .stage(PoolStage::new(pool.clone()))
        .build()
}

/// Flattened slices to pooled descriptors, for batches already sliced
pub fn descriptor_pipeline(codebooks: Arc<Vec<ClassCodebook>>, pool: &PoolConfig) -> CollatePipeline {
    CollatePipeline::builder()
        .stage(SkmProjectionStage::new(codebooks))
        .stage(PoolStage::new(pool.clone()))
        .build()
}

/// Stack the matrix payloads of a batch, repeating each item's label once
/// per row
pub fn stack_rows(batch: &[CollateItem]) -> Result<(Array2<f64>, Vec<usize>)> {
    let mut matrices = Vec::with_capacity(batch.len());
    let mut labels = Vec::new();
    for item in batch {
        let m = item
            .payload
            .rows()
            .ok_or_else(|| unexpected_payload("stack_rows", "matrix", &item.payload))?;
        labels.extend(std::iter::repeat(item.label).take(m.nrows()));
        matrices.push(m.view());
    }
    if matrices.is_empty() {
        return Err(SkmError::DataShape("cannot stack an empty batch".to_string()));
    }
    let stacked = ndarray::concatenate(ndarray::Axis(0), &matrices)
        .map_err(|e| SkmError::DataShape(format!("payload widths differ: {}", e)))?;
    Ok((stacked, labels))
}
