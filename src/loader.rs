//! Batch loading
//!
//! Files are read and collated in batches of `batch_size` on a dedicated
//! rayon pool with `num_workers` threads. Output order always matches the
//! dataset order and every batch is fully materialised before the next one
//! starts.

use crate::audio::{load_wave, AudioSample};
use crate::collate::{Batch, CollateItem, CollatePipeline, Payload};
use crate::config::{LoaderConfig, Validate};
use crate::dataset::Dataset;
use crate::error::{Result, SkmError};
use crate::numeric::NumericWarningGuard;
use rayon::prelude::*;
use rayon::ThreadPool;

fn worker_pool(config: &LoaderConfig) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_workers)
        .build()
        .map_err(|e| SkmError::ProcessingPipelineError(format!("loader pool: {}", e)))
}

fn into_item(sample: AudioSample) -> CollateItem {
    CollateItem {
        filename: sample.filename,
        label: sample.label,
        payload: Payload::Wave(sample.wave),
    }
}

/// Load every file of `dataset` and run it through `pipeline`
pub fn materialize(
    dataset: &Dataset,
    pipeline: &CollatePipeline,
    sample_rate: u32,
    config: &LoaderConfig,
) -> Result<Batch> {
    config.validate()?;
    let _guard = NumericWarningGuard::suppress_divide();
    let pool = worker_pool(config)?;

    let mut out = Vec::with_capacity(dataset.len());
    for (idx, chunk) in dataset.entries.chunks(config.batch_size).enumerate() {
        let batch = pool.install(|| -> Result<Batch> {
            let items = chunk
                .par_iter()
                .map(|entry| -> Result<CollateItem> {
                    Ok(into_item(AudioSample {
                        filename: entry.filename.clone(),
                        wave: load_wave(&entry.path, sample_rate)?,
                        label: entry.label,
                    }))
                })
                .collect::<Result<Batch>>()?;
            pipeline.apply(items)
        })?;
        log::debug!("batch {}: {} items collated", idx, batch.len());
        out.extend(batch);
    }
    log::info!("materialised {} items", out.len());
    Ok(out)
}

/// Run in-memory samples through `pipeline` in batches
pub fn collate_samples(
    samples: Vec<AudioSample>,
    pipeline: &CollatePipeline,
    config: &LoaderConfig,
) -> Result<Batch> {
    config.validate()?;
    let _guard = NumericWarningGuard::suppress_divide();
    let pool = worker_pool(config)?;

    let mut out = Vec::with_capacity(samples.len());
    let mut items: Vec<CollateItem> = samples.into_iter().map(into_item).collect();
    while !items.is_empty() {
        let rest = items.split_off(config.batch_size.min(items.len()));
        let batch = pool.install(|| pipeline.apply(items))?;
        out.extend(batch);
        items = rest;
    }
    Ok(out)
}
