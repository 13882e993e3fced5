//! Spherical k-means codebooks
//!
//! A codebook is fit on the flattened slices of one class. Data rows are
//! optionally standardised, reduced with PCA and normalised to unit length;
//! centroids always live on the unit sphere. Projection of a slice is its
//! cosine similarity to every centroid.

use crate::config::{SkmConfig, Validate};
use crate::error::{Result, SkmError};
use crate::pca::Pca;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const NORM_EPS: f64 = 1e-12;

/// Per-feature z-scoring fitted on training slices
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Standardizer {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Standardizer {
    fn fit(x: ArrayView2<f64>) -> Self {
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > NORM_EPS { s } else { 1.0 });
        Self { mean, scale }
    }

    fn apply(&self, x: ArrayView2<f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }
}

/// Fitted spherical k-means model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebook {
    /// (k, working_dim), unit-norm rows
    centroids: Array2<f64>,
    standardizer: Option<Standardizer>,
    pca: Option<Pca>,
    normalize: bool,
    n_features: usize,
    n_iter: usize,
    converged: bool,
    inertia: f64,
}

impl Codebook {
    /// Fit `k` unit-norm centroids on `x` (one row per flattened slice)
    pub fn fit(x: ArrayView2<f64>, k: usize, config: &SkmConfig) -> Result<Self> {
        config.validate()?;
        if k == 0 {
            return Err(SkmError::ConfigValidationFailed(
                "number of clusters must be positive".to_string(),
            ));
        }
        if x.nrows() < k {
            return Err(SkmError::ClusteringError(format!(
                "cannot fit {} clusters on {} slices",
                k,
                x.nrows()
            )));
        }

        let standardizer = config.standardize.then(|| Standardizer::fit(x));
        let staged = match &standardizer {
            Some(s) => s.apply(x),
            None => x.to_owned(),
        };
        let pca = match config.n_components {
            Some(n) => Some(Pca::fit(staged.view(), n, config.whiten)?),
            None => None,
        };
        let mut data = match &pca {
            Some(p) => p.transform(staged.view())?,
            None => staged,
        };
        if config.normalize {
            normalize_rows(&mut data);
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut centroids = kmeans_plus_plus(&data, k, &mut rng);
        let mut labels = vec![usize::MAX; data.nrows()];
        let mut n_iter = 0;
        let mut converged = false;

        while n_iter < config.max_iter {
            n_iter += 1;
            let similarities = data.dot(&centroids.t());
            let (new_labels, best) = assign(&similarities);
            let changed = new_labels != labels;
            labels = new_labels;
            centroids = update_centroids(&data, &labels, &best, k);
            if !changed {
                converged = true;
                break;
            }
        }

        if !converged {
            log::warn!(
                "spherical k-means (k={}) stopped at max_iter={} without converging",
                k,
                config.max_iter
            );
        }

        let similarities = data.dot(&centroids.t());
        let inertia = similarities
            .rows()
            .into_iter()
            .map(|row| 1.0 - row.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            .sum();

        log::debug!(
            "fit codebook k={} on {} slices: {} iterations, inertia {:.4}",
            k,
            x.nrows(),
            n_iter,
            inertia
        );

        Ok(Self {
            centroids,
            standardizer,
            pca,
            normalize: config.normalize,
            n_features: x.ncols(),
            n_iter,
            converged,
            inertia,
        })
    }

    fn preprocess(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features {
            return Err(SkmError::DataShape(format!(
                "codebook fitted on {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        let staged = match &self.standardizer {
            Some(s) => s.apply(x),
            None => x.to_owned(),
        };
        let mut data = match &self.pca {
            Some(p) => p.transform(staged.view())?,
            None => staged,
        };
        if self.normalize {
            normalize_rows(&mut data);
        }
        Ok(data)
    }

    /// Cosine similarity of every row to every centroid, shape (n, k)
    pub fn project(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let data = self.preprocess(x)?;
        Ok(data.dot(&self.centroids.t()))
    }

    /// Index of the closest centroid for every row
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<usize>> {
        let similarities = self.project(x)?;
        Ok(assign(&similarities).0)
    }

    /// Quality score: sum over rows of `1 - max cosine similarity`
    pub fn score(&self, x: ArrayView2<f64>) -> Result<f64> {
        let similarities = self.project(x)?;
        Ok(similarities
            .rows()
            .into_iter()
            .map(|row| 1.0 - row.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            .sum())
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    /// Score on the training data at fit time
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// Codebook fitted on the slices of one class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCodebook {
    pub label: usize,
    pub codebook: Codebook,
}

fn normalize_rows(data: &mut Array2<f64>) {
    for mut row in data.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > NORM_EPS {
            row.mapv_inplace(|v| v / norm);
        }
    }
}

/// k-means++ seeding with cosine distance
fn kmeans_plus_plus(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = data.nrows();
    let mut centroids = Array2::<f64>::zeros((k, data.ncols()));
    let first = rng.gen_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));
    let mut distances: Vec<f64> = data
        .rows()
        .into_iter()
        .map(|row| (1.0 - row.dot(&data.row(first))).max(0.0))
        .collect();

    for c in 1..k {
        let total: f64 = distances.iter().sum();
        let chosen = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut idx = n - 1;
            for (i, &d) in distances.iter().enumerate() {
                if target < d {
                    idx = i;
                    break;
                }
                target -= d;
            }
            idx
        } else {
            rng.gen_range(0..n)
        };
        centroids.row_mut(c).assign(&data.row(chosen));
        for (i, row) in data.rows().into_iter().enumerate() {
            let d = (1.0 - row.dot(&data.row(chosen))).max(0.0);
            if d < distances[i] {
                distances[i] = d;
            }
        }
    }
    normalize_rows(&mut centroids);
    centroids
}

/// Arg-max similarity per row, and the winning similarity
fn assign(similarities: &Array2<f64>) -> (Vec<usize>, Vec<f64>) {
    similarities
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                })
        })
        .unzip()
}

/// Mean direction of every cluster; empty clusters take the worst-fitting rows
fn update_centroids(data: &Array2<f64>, labels: &[usize], best: &[f64], k: usize) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros((k, data.ncols()));
    let mut counts = vec![0usize; k];
    for (row, &label) in data.rows().into_iter().zip(labels) {
        let mut target = sums.row_mut(label);
        target += &row;
        counts[label] += 1;
    }

    let mut worst: Vec<usize> = (0..data.nrows()).collect();
    worst.sort_by(|&a, &b| best[a].total_cmp(&best[b]));
    let mut reseed = worst.into_iter();

    for c in 0..k {
        let norm = sums.row(c).dot(&sums.row(c)).sqrt();
        if counts[c] == 0 || norm <= NORM_EPS {
            if let Some(idx) = reseed.next() {
                sums.row_mut(c).assign(&data.row(idx));
            }
        }
    }
    normalize_rows(&mut sums);
    sums
}

/// Split flattened slices into per-label groups, in ascending label order
pub fn group_by_label(
    slices: ArrayView2<f64>,
    labels: &[usize],
) -> Result<Vec<(usize, Array2<f64>)>> {
    if slices.nrows() != labels.len() {
        return Err(SkmError::DataShape(format!(
            "{} slices but {} labels",
            slices.nrows(),
            labels.len()
        )));
    }
    let mut rows: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        rows.entry(label).or_default().push(i);
    }
    Ok(rows
        .into_iter()
        .map(|(label, idx)| (label, slices.select(Axis(0), &idx)))
        .collect())
}

/// Fit one codebook per class group; `k_vals` is indexed by class label,
/// so classes absent from `groups` leave their entry unused
pub fn fit_class_codebooks(
    groups: &[(usize, Array2<f64>)],
    k_vals: &[usize],
    config: &SkmConfig,
) -> Result<Vec<ClassCodebook>> {
    groups
        .iter()
        .map(|(label, slices)| {
            let k = *k_vals.get(*label).ok_or_else(|| {
                SkmError::ConfigValidationFailed(format!(
                    "no k value for class {} ({} given)",
                    label,
                    k_vals.len()
                ))
            })?;
            log::info!(
                "fitting class {} codebook: k={}, {} slices",
                label,
                k,
                slices.nrows()
            );
            Ok(ClassCodebook {
                label: *label,
                codebook: Codebook::fit(slices.view(), k, config)?,
            })
        })
        .collect()
}

/// Project slices on every class codebook and concatenate in class order
pub fn project_all(codebooks: &[ClassCodebook], slices: ArrayView2<f64>) -> Result<Array2<f64>> {
    if codebooks.is_empty() {
        return Err(SkmError::ClusteringError(
            "no codebooks to project on".to_string(),
        ));
    }
    let width: usize = codebooks.iter().map(|c| c.codebook.n_clusters()).sum();
    let mut out = Array2::<f64>::zeros((slices.nrows(), width));
    let mut offset = 0;
    for class in codebooks {
        let proj = class.codebook.project(slices)?;
        let k = proj.ncols();
        out.slice_mut(ndarray::s![.., offset..offset + k]).assign(&proj);
        offset += k;
    }
    Ok(out)
}

/// `<root>/val_<fold>/class_<label>/model.json`
pub fn codebook_path(root: &Path, fold: usize, label: usize) -> PathBuf {
    root.join(format!("val_{:02}", fold))
        .join(format!("class_{:02}", label))
        .join("model.json")
}

/// Persist every class codebook of a fold
pub fn save_codebooks(codebooks: &[ClassCodebook], root: &Path, fold: usize) -> Result<()> {
    for class in codebooks {
        let path = codebook_path(root, fold, class.label);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&class.codebook)?;
        std::fs::write(&path, json)
            .map_err(|e| SkmError::ExportError(format!("{}: {}", path.display(), e)))?;
        log::debug!("saved codebook {}", path.display());
    }
    Ok(())
}

/// Load the codebooks of a fold for labels `0..n_classes`; missing classes
/// (rejected by the elbow search) are skipped
pub fn load_codebooks(root: &Path, fold: usize, n_classes: usize) -> Result<Vec<ClassCodebook>> {
    let mut codebooks = Vec::new();
    for label in 0..n_classes {
        let path = codebook_path(root, fold, label);
        if !path.exists() {
            log::warn!("no codebook for class {} in fold {}", label, fold);
            continue;
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SkmError::ExportError(format!("{}: {}", path.display(), e)))?;
        let codebook: Codebook = serde_json::from_str(&content)?;
        codebooks.push(ClassCodebook { label, codebook });
    }
    if codebooks.is_empty() {
        return Err(SkmError::ExportError(format!(
            "no codebooks found for fold {} under {}",
            fold,
            root.display()
        )));
    }
    Ok(codebooks)
}
