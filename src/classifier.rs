//! PCA + SVC classification of pooled descriptors, and single-file inference

use crate::audio::{load_wave, AudioSample};
use crate::collate::{evaluation_pipeline, stack_rows};
use crate::config::{
    ExperimentConfig, LoaderConfig, PcaConfig, PoolConfig, ReshapeConfig, SpecConfig, SvcConfig,
    Validate,
};
use crate::error::{Result, SkmError};
use crate::loader::collate_samples;
use crate::pca::Pca;
use crate::skm::ClassCodebook;
use crate::svm::Svc;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Dimensionality reduction followed by a support vector classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaSvcPipeline {
    pub pca: Pca,
    pub svc: Svc,
}

impl PcaSvcPipeline {
    pub fn predict(&self, features: ArrayView2<f64>) -> Result<Vec<usize>> {
        let reduced = self.pca.transform(features)?;
        self.svc.predict(reduced.view())
    }

    /// Write `pca.json` and `svc.json` into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        write_json(&dir.join("pca.json"), &self.pca)?;
        write_json(&dir.join("svc.json"), &self.svc)?;
        log::debug!("saved classifier to {}", dir.display());
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            pca: read_json(&dir.join("pca.json"))?,
            svc: read_json(&dir.join("svc.json"))?,
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    std::fs::write(path, json)
        .map_err(|e| SkmError::ExportError(format!("{}: {}", path.display(), e)))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SkmError::ExportError(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}

/// `<root>/val_<fold>`
pub fn classifier_dir(root: &Path, fold: usize) -> PathBuf {
    root.join(format!("val_{:02}", fold))
}

/// Fraction of exact matches
pub fn accuracy(predicted: &[usize], truth: &[usize]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = predicted.iter().zip(truth).filter(|(p, t)| p == t).count();
    hits as f64 / truth.len() as f64
}

/// Fit PCA and SVC on pooled descriptors; returns the training accuracy too
pub fn train(
    features: ArrayView2<f64>,
    labels: &[usize],
    pca_config: &PcaConfig,
    svc_config: &SvcConfig,
) -> Result<(PcaSvcPipeline, f64)> {
    pca_config.validate()?;
    svc_config.validate()?;
    if features.nrows() == 0 {
        return Err(SkmError::DataShape("no training features".to_string()));
    }
    if features.nrows() != labels.len() {
        return Err(SkmError::DataShape(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    let first = labels[0];
    if labels.iter().all(|&l| l == first) {
        return Err(SkmError::ClassificationError(format!(
            "training labels contain a single class ({})",
            first
        )));
    }

    let pca = Pca::fit(features, pca_config.n_components, pca_config.whiten)?;
    let reduced = pca.transform(features)?;
    log::info!(
        "pca: {} -> {} dims, {:.1}% variance kept",
        pca.n_features(),
        pca.n_components(),
        100.0 * pca.explained_variance_ratio().sum()
    );
    let svc = Svc::fit(reduced.view(), labels, svc_config)?;
    let pipeline = PcaSvcPipeline { pca, svc };

    let train_acc = accuracy(&pipeline.predict(features)?, labels);
    log::info!(
        "trained classifier on {} samples, {} support vectors, train accuracy {:.3}",
        labels.len(),
        pipeline.svc.n_support(),
        train_acc
    );
    Ok((pipeline, train_acc))
}

/// Accuracy of `pipeline` on labelled features
pub fn evaluate(pipeline: &PcaSvcPipeline, features: ArrayView2<f64>, labels: &[usize]) -> Result<f64> {
    if features.nrows() != labels.len() {
        return Err(SkmError::DataShape(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    Ok(accuracy(&pipeline.predict(features)?, labels))
}

/// Share of predictions per class label `0..n_classes`
pub fn vote_fractions(predictions: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0usize; n_classes];
    for &p in predictions {
        if p < n_classes {
            counts[p] += 1;
        }
    }
    let total = predictions.len().max(1) as f64;
    counts.into_iter().map(|c| c as f64 / total).collect()
}

/// Per-window predictions of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub predictions: Vec<usize>,
    pub class_fractions: Vec<f64>,
}

impl InferenceResult {
    pub fn from_predictions(predictions: Vec<usize>, n_classes: usize) -> Self {
        let class_fractions = vote_fractions(&predictions, n_classes);
        Self {
            predictions,
            class_fractions,
        }
    }

    /// Fraction of windows predicted as class 0
    pub fn class_zero_confidence(&self) -> f64 {
        self.class_fractions.first().copied().unwrap_or(0.0)
    }

    /// Majority class, lowest label on ties
    pub fn predicted_class(&self) -> usize {
        let mut best = 0;
        for (idx, &f) in self.class_fractions.iter().enumerate() {
            if f > self.class_fractions[best] {
                best = idx;
            }
        }
        best
    }
}

/// Settings that shape features for inference
#[derive(Debug, Clone, Default)]
pub struct InferenceConfig {
    pub spec: SpecConfig,
    pub reshape: ReshapeConfig,
    pub pool: PoolConfig,
    pub n_classes: usize,
}

impl InferenceConfig {
    /// Feature settings of an experiment
    pub fn from_experiment(experiment: &ExperimentConfig) -> Self {
        Self {
            spec: experiment.spec.clone(),
            reshape: experiment.reshape.clone(),
            pool: experiment.pool.clone(),
            n_classes: experiment.dataset.n_classes,
        }
    }
}

/// Classify every pooling window of one audio file
pub fn infer_single<P: AsRef<Path>>(
    path: P,
    codebooks: &[ClassCodebook],
    pipeline: &PcaSvcPipeline,
    config: &InferenceConfig,
) -> Result<InferenceResult> {
    let path = path.as_ref();
    let wave = load_wave(path, config.spec.sample_rate())?;
    infer_wave(
        &path.display().to_string(),
        wave,
        codebooks,
        pipeline,
        config,
    )
}

/// Classify every pooling window of an in-memory wave
pub fn infer_wave(
    name: &str,
    wave: Vec<f32>,
    codebooks: &[ClassCodebook],
    pipeline: &PcaSvcPipeline,
    config: &InferenceConfig,
) -> Result<InferenceResult> {
    let collate = evaluation_pipeline(
        &config.spec,
        &config.reshape,
        Arc::new(codebooks.to_vec()),
        &config.pool,
    );
    let sample = AudioSample {
        filename: name.to_string(),
        wave,
        label: 0,
    };
    let items = collate_samples(vec![sample], &collate, &LoaderConfig::default())?;
    let (features, _) = stack_rows(&items)?;
    let predictions = pipeline.predict(features.view())?;
    let result = InferenceResult::from_predictions(predictions, config.n_classes);
    log::info!(
        "{}: {} windows, class fractions {:?}",
        name,
        result.predictions.len(),
        result.class_fractions
    );
    Ok(result)
}
