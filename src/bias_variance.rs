//! Bias-variance sweep over validation folds
//!
//! Every fold runs the same phases in order:
//!
//! 1. `init`: split the dataset into train and validation sets
//! 2. `fit_codebooks`: slice the training files and fit one codebook per
//!    class, either with fixed k values or by elbow search
//! 3. `train_classifier`: pool codebook projections and fit PCA + SVC
//! 4. `validate`: accuracy on the held-out fold
//! 5. `test`: class 0 confidence of a single test audio file, and accuracy
//!    on a separate test set, for whichever of the two is given
//! 6. `record`: persist artifacts and append the fold to [`FoldResults`]
//!
//! The first failing fold aborts the sweep with [`SkmError::FoldFailed`]
//! naming the fold and phase.

use crate::classifier::{
    classifier_dir, evaluate, infer_single, train, InferenceConfig, PcaSvcPipeline,
};
use crate::collate::{descriptor_pipeline, evaluation_pipeline, slicing_pipeline, stack_rows, Batch};
use crate::config::{ExperimentConfig, Validate};
use crate::dataset::{Dataset, FoldGenerator};
use crate::elbow::{search_class_codebooks, ElbowSearch, KRange};
use crate::error::{Result, SkmError};
use crate::loader::materialize;
use crate::skm::{fit_class_codebooks, group_by_label, save_codebooks, ClassCodebook};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// How k is chosen per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SweepMode {
    /// Elbow search over a range of k
    Search(KRange),
    /// One fixed k per class, in label order
    Fixed(Vec<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldPhase {
    Init,
    FitCodebooks,
    TrainClassifier,
    Validate,
    Test,
    Record,
}

impl fmt::Display for FoldPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FoldPhase::Init => "init",
            FoldPhase::FitCodebooks => "fit_codebooks",
            FoldPhase::TrainClassifier => "train_classifier",
            FoldPhase::Validate => "validate",
            FoldPhase::Test => "test",
            FoldPhase::Record => "record",
        };
        write!(f, "{}", name)
    }
}

/// Everything a completed fold produced
#[derive(Debug, Clone)]
pub struct FoldRecord {
    pub fold: usize,
    pub train_acc: f64,
    pub val_acc: f64,
    /// Fraction of windows of the test audio predicted as class 0
    pub test_acc: Option<f64>,
    /// Accuracy on the held-out test set
    pub test_set_acc: Option<f64>,
    pub codebooks: Vec<ClassCodebook>,
    pub classifier: PcaSvcPipeline,
    /// Class label of each `k_vals` / `k_scores` entry
    pub k_labels: Vec<usize>,
    /// Chosen k per class, -1 when no elbow was found
    pub k_vals: Vec<i64>,
    /// Elbow curve per class (search mode only)
    pub k_scores: Vec<Vec<f64>>,
}

/// Append-only results of a sweep, in fold order
#[derive(Debug, Clone, Default)]
pub struct FoldResults {
    records: Vec<FoldRecord>,
}

impl FoldResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fold; folds must arrive in strictly increasing order
    pub fn push(&mut self, record: FoldRecord) -> Result<()> {
        if let Some(last) = self.records.last() {
            if record.fold <= last.fold {
                return Err(SkmError::ProcessingPipelineError(format!(
                    "fold {} recorded after fold {}",
                    record.fold, last.fold
                )));
            }
        }
        self.records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, fold: usize) -> Option<&FoldRecord> {
        self.records.iter().find(|r| r.fold == fold)
    }

    pub fn records(&self) -> &[FoldRecord] {
        &self.records
    }

    pub fn folds(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.fold).collect()
    }

    pub fn train_accs(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.train_acc).collect()
    }

    pub fn val_accs(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.val_acc).collect()
    }

    pub fn test_accs(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.test_acc).collect()
    }

    pub fn test_set_accs(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.test_set_acc).collect()
    }

    pub fn codebooks(&self) -> Vec<&[ClassCodebook]> {
        self.records.iter().map(|r| r.codebooks.as_slice()).collect()
    }

    pub fn classifiers(&self) -> Vec<&PcaSvcPipeline> {
        self.records.iter().map(|r| &r.classifier).collect()
    }

    pub fn k_labels(&self) -> Vec<&[usize]> {
        self.records.iter().map(|r| r.k_labels.as_slice()).collect()
    }

    pub fn k_vals(&self) -> Vec<&[i64]> {
        self.records.iter().map(|r| r.k_vals.as_slice()).collect()
    }

    pub fn k_scores(&self) -> Vec<&[Vec<f64>]> {
        self.records.iter().map(|r| r.k_scores.as_slice()).collect()
    }
}

/// Fit the class codebooks of one fold from sliced training items
pub fn fit_fold_codebooks(
    sliced: &Batch,
    mode: &SweepMode,
    config: &ExperimentConfig,
) -> Result<(Vec<ClassCodebook>, Vec<(usize, ElbowSearch)>)> {
    let (slices, labels) = stack_rows(sliced)?;
    let groups = group_by_label(slices.view(), &labels)?;
    let (codebooks, searches) = match mode {
        SweepMode::Fixed(k_vals) => (fit_class_codebooks(&groups, k_vals, &config.skm)?, Vec::new()),
        SweepMode::Search(range) => search_class_codebooks(&groups, *range, &config.skm)?,
    };
    if codebooks.is_empty() {
        return Err(SkmError::ClusteringError(
            "no class produced a codebook".to_string(),
        ));
    }
    Ok((codebooks, searches))
}

/// Pool codebook projections of already sliced items
pub fn describe(
    sliced: Batch,
    codebooks: &[ClassCodebook],
    config: &ExperimentConfig,
) -> Result<(Array2<f64>, Vec<usize>)> {
    let pipeline = descriptor_pipeline(Arc::new(codebooks.to_vec()), &config.pool);
    stack_rows(&pipeline.apply(sliced)?)
}

/// Load and describe a dataset without augmentation
pub fn describe_dataset(
    dataset: &Dataset,
    codebooks: &[ClassCodebook],
    config: &ExperimentConfig,
) -> Result<(Array2<f64>, Vec<usize>)> {
    let pipeline = evaluation_pipeline(
        &config.spec,
        &config.reshape,
        Arc::new(codebooks.to_vec()),
        &config.pool,
    );
    let items = materialize(dataset, &pipeline, config.spec.sample_rate(), &config.loader)?;
    stack_rows(&items)
}

/// Optional parts of a sweep
#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    /// Where codebooks, classifiers and reports go; nothing is written when unset
    pub output_dir: Option<PathBuf>,
    /// Audio file classified after every fold; its class 0 confidence is
    /// the fold's test value
    pub test_audio: Option<PathBuf>,
    /// Held-out test set evaluated after every fold
    pub test_set: Option<Dataset>,
    /// Restrict the sweep to these folds; every fold when unset
    pub folds: Option<Vec<usize>>,
}

/// Drives the per-fold phases and collects results
pub struct BiasVarianceSweep<'a> {
    generator: &'a FoldGenerator,
    config: &'a ExperimentConfig,
    mode: SweepMode,
    options: SweepOptions,
}

impl<'a> BiasVarianceSweep<'a> {
    pub fn new(
        generator: &'a FoldGenerator,
        config: &'a ExperimentConfig,
        mode: SweepMode,
        options: SweepOptions,
    ) -> Self {
        Self {
            generator,
            config,
            mode,
            options,
        }
    }

    pub fn run(&self) -> Result<FoldResults> {
        self.config.validate()?;
        let folds = match &self.options.folds {
            Some(folds) => {
                let mut folds = folds.clone();
                folds.sort_unstable();
                folds.dedup();
                folds
            }
            None => (0..self.generator.k_folds()).collect(),
        };

        let mut results = FoldResults::new();
        for fold in folds {
            let record = self.run_fold(fold)?;
            log::info!(
                "fold {}: train {:.3}, val {:.3}{}",
                fold,
                record.train_acc,
                record.val_acc,
                record
                    .test_acc
                    .map(|t| format!(", test {:.3}", t))
                    .unwrap_or_default()
            );
            results
                .push(record)
                .map_err(|e| e.in_fold(fold, FoldPhase::Record.to_string()))?;
        }
        Ok(results)
    }

    fn run_fold(&self, fold: usize) -> Result<FoldRecord> {
        let config = self.config;
        let phase_err = |phase: FoldPhase| move |e: SkmError| e.in_fold(fold, phase.to_string());

        log::info!("fold {}: {}", fold, FoldPhase::Init);
        let (train_set, val_set) = self
            .generator
            .fold(fold)
            .map_err(phase_err(FoldPhase::Init))?;

        log::info!(
            "fold {}: {} ({} train files)",
            fold,
            FoldPhase::FitCodebooks,
            train_set.len()
        );
        let slicer = slicing_pipeline(Some(&config.augment), &config.spec, &config.reshape);
        let (sliced, codebooks, searches) = materialize(
            &train_set,
            &slicer,
            config.spec.sample_rate(),
            &config.loader,
        )
        .and_then(|sliced| {
            let (codebooks, searches) = fit_fold_codebooks(&sliced, &self.mode, config)?;
            Ok((sliced, codebooks, searches))
        })
        .map_err(phase_err(FoldPhase::FitCodebooks))?;

        log::info!("fold {}: {}", fold, FoldPhase::TrainClassifier);
        let (classifier, train_acc) = describe(sliced, &codebooks, config)
            .and_then(|(features, labels)| train(features.view(), &labels, &config.pca, &config.svc))
            .map_err(phase_err(FoldPhase::TrainClassifier))?;

        log::info!(
            "fold {}: {} ({} files)",
            fold,
            FoldPhase::Validate,
            val_set.len()
        );
        let val_acc = describe_dataset(&val_set, &codebooks, config)
            .and_then(|(features, labels)| evaluate(&classifier, features.view(), &labels))
            .map_err(phase_err(FoldPhase::Validate))?;

        if self.options.test_audio.is_some() || self.options.test_set.is_some() {
            log::info!("fold {}: {}", fold, FoldPhase::Test);
        }
        let test_acc = match &self.options.test_audio {
            Some(path) => {
                let inference = InferenceConfig::from_experiment(config);
                let result = infer_single(path, &codebooks, &classifier, &inference)
                    .map_err(phase_err(FoldPhase::Test))?;
                Some(result.class_zero_confidence())
            }
            None => None,
        };
        let test_set_acc = match &self.options.test_set {
            Some(test_set) => Some(
                describe_dataset(test_set, &codebooks, config)
                    .and_then(|(features, labels)| evaluate(&classifier, features.view(), &labels))
                    .map_err(phase_err(FoldPhase::Test))?,
            ),
            None => None,
        };

        log::info!("fold {}: {}", fold, FoldPhase::Record);
        if let Some(dir) = &self.options.output_dir {
            save_codebooks(&codebooks, dir, fold)
                .and_then(|_| classifier.save(&classifier_dir(dir, fold)))
                .map_err(phase_err(FoldPhase::Record))?;
        }

        let (k_labels, k_vals, k_scores) = match &self.mode {
            SweepMode::Fixed(_) => (
                codebooks.iter().map(|c| c.label).collect(),
                codebooks
                    .iter()
                    .map(|c| c.codebook.n_clusters() as i64)
                    .collect(),
                Vec::new(),
            ),
            SweepMode::Search(_) => (
                searches.iter().map(|(label, _)| *label).collect(),
                searches.iter().map(|(_, s)| s.k_val()).collect(),
                searches.iter().map(|(_, s)| s.scores().to_vec()).collect(),
            ),
        };

        Ok(FoldRecord {
            fold,
            train_acc,
            val_acc,
            test_acc,
            test_set_acc,
            codebooks,
            classifier,
            k_labels,
            k_vals,
            k_scores,
        })
    }
}

/// Run every fold of `generator` with `mode`
pub fn run_sweep(
    generator: &FoldGenerator,
    config: &ExperimentConfig,
    mode: SweepMode,
    options: SweepOptions,
) -> Result<FoldResults> {
    BiasVarianceSweep::new(generator, config, mode, options).run()
}
