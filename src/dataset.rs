//! Dataset discovery and fold generation
//!
//! Two on-disk layouts are supported:
//!
//! * k-fold: `root/<class>/<file>.wav`; files are shuffled with the
//!   configured seed and dealt round-robin into `k_folds` folds.
//! * pre-split: `root/<prefix><NN>/<class>/<file>.wav`; fold `NN` is the
//!   validation set of fold `NN`.
//!
//! Class labels are the indices of the sorted class directory names.

use crate::config::{DatasetConfig, DatasetLayout};
use crate::error::{Result, SkmError};
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// One labelled audio file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
    pub path: PathBuf,
    pub label: usize,
    /// Pre-assigned validation fold (pre-split layout only)
    pub fold: Option<usize>,
}

/// Every labelled file of a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub class_names: Vec<String>,
    pub entries: Vec<FileEntry>,
}

impl Metadata {
    pub fn n_classes(&self) -> usize {
        self.class_names.len()
    }
}

/// A loadable subset of the metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    pub entries: Vec<FileEntry>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.label).collect()
    }

    pub fn filenames(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.filename.as_str()).collect()
    }
}

fn list_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let read = std::fs::read_dir(path)
        .map_err(|e| SkmError::DatasetError(format!("{}: {}", path.display(), e)))?;
    for entry in read {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn list_audio_files(path: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let file_path = entry.path();
        let matches = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if entry.file_type()?.is_file() && matches {
            files.push(file_path);
        }
    }
    files.sort();
    Ok(files)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_entry(path: PathBuf, label: usize, fold: Option<usize>) -> FileEntry {
    FileEntry {
        filename: dir_name(&path),
        path,
        label,
        fold,
    }
}

/// Scan the dataset root according to the configured layout
pub fn discover_metadata(config: &DatasetConfig) -> Result<Metadata> {
    let root = &config.root_path;
    if !root.is_dir() {
        return Err(SkmError::DatasetError(format!(
            "dataset root {} is not a directory",
            root.display()
        )));
    }

    let metadata = match config.layout {
        DatasetLayout::KFold => {
            let class_dirs = list_dirs(root)?;
            let class_names: Vec<String> = class_dirs.iter().map(|d| dir_name(d)).collect();
            let mut entries = Vec::new();
            for (label, dir) in class_dirs.iter().enumerate() {
                for path in list_audio_files(dir, &config.extensions)? {
                    entries.push(file_entry(path, label, None));
                }
            }
            Metadata {
                class_names,
                entries,
            }
        }
        DatasetLayout::PreSplit => {
            let fold_dirs: Vec<PathBuf> = (0..config.k_folds)
                .map(|i| root.join(format!("{}{:02}", config.fold_dir_prefix, i)))
                .collect();
            let mut names = BTreeSet::new();
            for fold_dir in &fold_dirs {
                if !fold_dir.is_dir() {
                    return Err(SkmError::DatasetError(format!(
                        "missing fold directory {}",
                        fold_dir.display()
                    )));
                }
                for class_dir in list_dirs(fold_dir)? {
                    names.insert(dir_name(&class_dir));
                }
            }
            let class_names: Vec<String> = names.into_iter().collect();
            let mut entries = Vec::new();
            for (fold, fold_dir) in fold_dirs.iter().enumerate() {
                for (label, name) in class_names.iter().enumerate() {
                    let class_dir = fold_dir.join(name);
                    if !class_dir.is_dir() {
                        continue;
                    }
                    for path in list_audio_files(&class_dir, &config.extensions)? {
                        entries.push(file_entry(path, label, Some(fold)));
                    }
                }
            }
            Metadata {
                class_names,
                entries,
            }
        }
    };

    if metadata.n_classes() != config.n_classes {
        return Err(SkmError::DatasetError(format!(
            "found {} classes {:?}, configuration expects {}",
            metadata.n_classes(),
            metadata.class_names,
            config.n_classes
        )));
    }
    if metadata.entries.is_empty() {
        return Err(SkmError::DatasetError(format!(
            "no audio files under {}",
            root.display()
        )));
    }
    log::info!(
        "discovered {} files in {} classes under {}",
        metadata.entries.len(),
        metadata.n_classes(),
        root.display()
    );
    Ok(metadata)
}

/// Deterministic (train, validation) partitions of a dataset
#[derive(Debug, Clone)]
pub struct FoldGenerator {
    metadata: Metadata,
    k_folds: usize,
    /// Validation fold of every metadata entry
    assignment: Vec<usize>,
}

impl FoldGenerator {
    pub fn new(metadata: Metadata, config: &DatasetConfig) -> Result<Self> {
        let k_folds = config.k_folds;
        let n = metadata.entries.len();
        let assignment = match config.layout {
            DatasetLayout::KFold => {
                if n < k_folds {
                    return Err(SkmError::DatasetError(format!(
                        "{} files cannot fill {} folds",
                        n, k_folds
                    )));
                }
                let mut order: Vec<usize> = (0..n).collect();
                let mut rng = StdRng::seed_from_u64(config.seed);
                order.shuffle(&mut rng);

                // deal round-robin over the shuffled order
                let mut assignment = vec![0; n];
                for (position, &idx) in order.iter().enumerate() {
                    assignment[idx] = position % k_folds;
                }
                assignment
            }
            DatasetLayout::PreSplit => metadata
                .entries
                .iter()
                .map(|e| {
                    e.fold.ok_or_else(|| {
                        SkmError::DatasetError(format!("{} has no pre-assigned fold", e.filename))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            metadata,
            k_folds,
            assignment,
        })
    }

    pub fn k_folds(&self) -> usize {
        self.k_folds
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Train and validation subsets for validation fold `fold`, both in
    /// metadata order
    pub fn fold(&self, fold: usize) -> Result<(Dataset, Dataset)> {
        if fold >= self.k_folds {
            return Err(SkmError::DatasetError(format!(
                "fold {} out of range (k_folds = {})",
                fold, self.k_folds
            )));
        }
        let mut train = Dataset::default();
        let mut val = Dataset::default();
        for (entry, &assigned) in self.metadata.entries.iter().zip(&self.assignment) {
            if assigned == fold {
                val.entries.push(entry.clone());
            } else {
                train.entries.push(entry.clone());
            }
        }
        if train.is_empty() || val.is_empty() {
            return Err(SkmError::DatasetError(format!(
                "fold {} has an empty partition (train {}, val {})",
                fold,
                train.len(),
                val.len()
            )));
        }
        Ok((train, val))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_metadata(n: usize) -> Metadata {
        Metadata {
            class_names: vec!["a".to_string(), "b".to_string()],
            entries: (0..n)
                .map(|i| FileEntry {
                    filename: format!("f{:03}.wav", i),
                    path: PathBuf::from(format!("/data/f{:03}.wav", i)),
                    label: i % 2,
                    fold: None,
                })
                .collect(),
        }
    }

    #[test]
    fn folds_are_deterministic_for_a_seed() {
        let config = DatasetConfig::default();
        let a = FoldGenerator::new(synthetic_metadata(23), &config).unwrap();
        let b = FoldGenerator::new(synthetic_metadata(23), &config).unwrap();
        for fold in 0..config.k_folds {
            assert_eq!(a.fold(fold).unwrap(), b.fold(fold).unwrap());
        }
    }

    #[test]
    fn fold_sizes_differ_by_at_most_one() {
        let generator =
            FoldGenerator::new(synthetic_metadata(23), &DatasetConfig::default()).unwrap();
        let sizes: Vec<usize> = (0..5).map(|f| generator.fold(f).unwrap().1.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 23);
        let min = *sizes.iter().min().unwrap();
        let max = *sizes.iter().max().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn too_few_files_for_folds() {
        let result = FoldGenerator::new(synthetic_metadata(3), &DatasetConfig::default());
        assert!(matches!(result, Err(SkmError::DatasetError(_))));
    }

    #[test]
    fn out_of_range_fold_is_rejected() {
        let generator =
            FoldGenerator::new(synthetic_metadata(10), &DatasetConfig::default()).unwrap();
        assert!(generator.fold(5).is_err());
    }
}
