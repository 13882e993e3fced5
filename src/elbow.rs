//! Elbow search over the number of clusters
//!
//! For every candidate k a codebook is fit and scored (sum of cosine
//! distances to the closest centroid). The knee of the decreasing, convex
//! score curve is located with the Kneedle detector. A curve without a knee
//! is reported as [`ElbowSearch::NoElbow`]; that class is then left out of
//! the fold's codebook set.

use crate::config::SkmConfig;
use crate::error::{Result, SkmError};
use crate::skm::{ClassCodebook, Codebook};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Kneedle sensitivity
const SENSITIVITY: f64 = 1.0;

/// Candidate cluster counts `k_min, k_min + k_step, ... < k_max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KRange {
    pub k_min: usize,
    pub k_max: usize,
    pub k_step: usize,
}

impl KRange {
    pub fn new(k_min: usize, k_max: usize, k_step: usize) -> Result<Self> {
        if k_min == 0 || k_step == 0 || k_min >= k_max {
            return Err(SkmError::ConfigValidationFailed(format!(
                "invalid k range [{}, {}) step {}",
                k_min, k_max, k_step
            )));
        }
        Ok(Self {
            k_min,
            k_max,
            k_step,
        })
    }

    pub fn values(&self) -> Vec<usize> {
        (self.k_min..self.k_max).step_by(self.k_step).collect()
    }
}

/// Outcome of an elbow search for one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElbowSearch {
    Found { k: usize, scores: Vec<f64> },
    NoElbow,
}

impl ElbowSearch {
    /// Chosen k, or -1 when no elbow was found
    pub fn k_val(&self) -> i64 {
        match self {
            ElbowSearch::Found { k, .. } => *k as i64,
            ElbowSearch::NoElbow => -1,
        }
    }

    /// Score per candidate k, empty when no elbow was found
    pub fn scores(&self) -> &[f64] {
        match self {
            ElbowSearch::Found { scores, .. } => scores,
            ElbowSearch::NoElbow => &[],
        }
    }
}

/// Knee of a decreasing convex curve, as an index into `xs`
pub fn locate_knee(xs: &[f64], ys: &[f64]) -> Option<usize> {
    let n = xs.len();
    if n < 3 || ys.len() != n {
        return None;
    }
    let normalize = |v: &[f64]| -> Option<Vec<f64>> {
        let min = v.iter().copied().fold(f64::INFINITY, f64::min);
        let max = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        if !range.is_finite() || range <= 1e-9 * max.abs().max(min.abs()).max(1.0) {
            return None;
        }
        Some(v.iter().map(|x| (x - min) / range).collect())
    };
    let x_norm = normalize(xs)?;
    let y_norm = normalize(ys)?;

    // convex + decreasing: flip y so the knee becomes a maximum of y - x
    let y_flipped: Vec<f64> = y_norm.iter().map(|y| 1.0 - y).collect();
    let diff: Vec<f64> = y_flipped.iter().zip(&x_norm).map(|(y, x)| y - x).collect();

    let maxima: Vec<usize> = (0..n)
        .filter(|&i| {
            let left = if i == 0 { f64::NEG_INFINITY } else { diff[i - 1] };
            let right = if i + 1 == n { f64::NEG_INFINITY } else { diff[i + 1] };
            diff[i] >= left && diff[i] >= right
        })
        .collect();
    if maxima.is_empty() {
        return None;
    }

    let mean_step = x_norm.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (n - 1) as f64;
    let thresholds: Vec<f64> = maxima
        .iter()
        .map(|&i| diff[i] - SENSITIVITY * mean_step)
        .collect();

    let mut current: Option<(usize, f64)> = None;
    let mut next_maximum = 0;
    for i in maxima[0]..n {
        if next_maximum < maxima.len() && i == maxima[next_maximum] {
            current = Some((i, thresholds[next_maximum]));
            next_maximum += 1;
            continue;
        }
        if let Some((knee_idx, threshold)) = current {
            if diff[i] < threshold {
                return Some(knee_idx);
            }
        }
    }
    None
}

/// Fit and score a codebook for every candidate k, then locate the elbow
pub fn search_k(slices: &Array2<f64>, range: KRange, config: &SkmConfig) -> Result<ElbowSearch> {
    let candidates: Vec<usize> = range
        .values()
        .into_iter()
        .filter(|&k| k <= slices.nrows())
        .collect();
    if candidates.len() < range.values().len() {
        log::warn!(
            "only {} slices: dropping candidates above k={}",
            slices.nrows(),
            slices.nrows()
        );
    }

    let mut scores = Vec::with_capacity(candidates.len());
    for &k in &candidates {
        let codebook = Codebook::fit(slices.view(), k, config)?;
        scores.push(codebook.inertia());
    }

    let xs: Vec<f64> = candidates.iter().map(|&k| k as f64).collect();
    match locate_knee(&xs, &scores) {
        Some(idx) => Ok(ElbowSearch::Found {
            k: candidates[idx],
            scores,
        }),
        None => Ok(ElbowSearch::NoElbow),
    }
}

/// Elbow-search and fit one codebook per class group; classes without an
/// elbow are reported (with their label) but get no codebook
pub fn search_class_codebooks(
    groups: &[(usize, Array2<f64>)],
    range: KRange,
    config: &SkmConfig,
) -> Result<(Vec<ClassCodebook>, Vec<(usize, ElbowSearch)>)> {
    let mut codebooks = Vec::new();
    let mut searches = Vec::with_capacity(groups.len());
    for (label, slices) in groups {
        let search = search_k(slices, range, config)?;
        match &search {
            ElbowSearch::Found { k, .. } => {
                log::info!("class {}: elbow at k={}", label, k);
                codebooks.push(ClassCodebook {
                    label: *label,
                    codebook: Codebook::fit(slices.view(), *k, config)?,
                });
            }
            ElbowSearch::NoElbow => {
                log::warn!("class {}: no elbow detected, excluding from codebook", label);
            }
        }
        searches.push((*label, search));
    }
    Ok((codebooks, searches))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knee_of_classic_curve() {
        let xs: Vec<f64> = (1..=9).map(|k| k as f64).collect();
        let ys = vec![100.0, 40.0, 20.0, 15.0, 12.0, 10.0, 9.0, 8.5, 8.0];
        let idx = locate_knee(&xs, &ys).unwrap();
        assert!(xs[idx] == 2.0 || xs[idx] == 3.0, "knee at {}", xs[idx]);
    }

    #[test]
    fn flat_curve_has_no_knee() {
        let xs: Vec<f64> = (2..10).map(|k| k as f64).collect();
        let ys = vec![5.0; xs.len()];
        assert_eq!(locate_knee(&xs, &ys), None);
    }

    #[test]
    fn straight_line_has_no_knee() {
        let xs: Vec<f64> = (0..8).map(|k| k as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 10.0 - x).collect();
        assert_eq!(locate_knee(&xs, &ys), None);
    }

    #[test]
    fn no_elbow_reports_minus_one_and_no_scores() {
        let search = ElbowSearch::NoElbow;
        assert_eq!(search.k_val(), -1);
        assert!(search.scores().is_empty());
    }

    #[test]
    fn identical_slices_give_no_elbow() {
        let slices = Array2::from_elem((30, 4), 1.0);
        let range = KRange::new(2, 8, 1).unwrap();
        let search = search_k(&slices, range, &SkmConfig::default()).unwrap();
        assert_eq!(search, ElbowSearch::NoElbow);
    }

    #[test]
    fn invalid_range_is_rejected() {
        assert!(KRange::new(5, 5, 1).is_err());
        assert!(KRange::new(2, 8, 0).is_err());
    }
}
