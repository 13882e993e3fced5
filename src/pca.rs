//! Principal component analysis
//!
//! Mean-centred eigendecomposition of whichever of the covariance matrix or
//! the Gram matrix is smaller, so wide feature sets with few samples stay
//! cheap. Eigenpairs come from a cyclic Jacobi sweep.

use crate::error::{Result, SkmError};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

const JACOBI_MAX_SWEEPS: usize = 100;
const VARIANCE_FLOOR: f64 = 1e-12;

/// Fitted PCA projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pca {
    mean: Array1<f64>,
    /// (n_components, n_features), unit-norm rows
    components: Array2<f64>,
    explained_variance: Array1<f64>,
    total_variance: f64,
    whiten: bool,
}

impl Pca {
    pub fn fit(x: ArrayView2<f64>, n_components: usize, whiten: bool) -> Result<Self> {
        let (n_samples, n_features) = x.dim();
        if n_samples < 2 {
            return Err(SkmError::DataShape(format!(
                "PCA needs at least 2 samples, got {}",
                n_samples
            )));
        }
        if n_components == 0 || n_components > n_samples.min(n_features) {
            return Err(SkmError::DataShape(format!(
                "n_components={} must be in [1, min(n_samples={}, n_features={})]",
                n_components, n_samples, n_features
            )));
        }

        let mean = x.mean_axis(Axis(0)).ok_or_else(|| {
            SkmError::DataShape("cannot take the mean of an empty matrix".to_string())
        })?;
        let centered = &x - &mean;
        let dof = (n_samples - 1) as f64;

        let (eigenvalues, components) = if n_features <= n_samples {
            let cov = centered.t().dot(&centered) / dof;
            let (values, vectors) = symmetric_eigen(cov);
            let order = descending_order(&values);
            let mut components = Array2::<f64>::zeros((n_components, n_features));
            let mut variances = Array1::<f64>::zeros(n_components);
            for (row, &idx) in order.iter().take(n_components).enumerate() {
                components.row_mut(row).assign(&vectors.column(idx));
                variances[row] = values[idx].max(0.0);
            }
            (variances, components)
        } else {
            let gram = centered.dot(&centered.t());
            let (values, vectors) = symmetric_eigen(gram);
            let order = descending_order(&values);
            let mut components = Array2::<f64>::zeros((n_components, n_features));
            let mut variances = Array1::<f64>::zeros(n_components);
            for (row, &idx) in order.iter().take(n_components).enumerate() {
                let lambda = values[idx].max(0.0);
                variances[row] = lambda / dof;
                if lambda > VARIANCE_FLOOR {
                    let direction = centered.t().dot(&vectors.column(idx)) / lambda.sqrt();
                    components.row_mut(row).assign(&direction);
                }
            }
            (variances, components)
        };

        let total_variance = centered.mapv(|v| v * v).sum() / dof;
        let mut pca = Self {
            mean,
            components,
            explained_variance: eigenvalues,
            total_variance,
            whiten,
        };
        pca.flip_signs();
        Ok(pca)
    }

    /// Make the largest-magnitude loading of every component positive
    fn flip_signs(&mut self) {
        for mut row in self.components.rows_mut() {
            let pivot = row
                .iter()
                .copied()
                .fold(0.0f64, |best, v| if v.abs() > best.abs() { v } else { best });
            if pivot < 0.0 {
                row.mapv_inplace(|v| -v);
            }
        }
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.mean.len() {
            return Err(SkmError::DataShape(format!(
                "PCA fitted on {} features, got {}",
                self.mean.len(),
                x.ncols()
            )));
        }
        let centered = &x - &self.mean;
        let mut projected = centered.dot(&self.components.t());
        if self.whiten {
            for (mut col, &var) in projected
                .columns_mut()
                .into_iter()
                .zip(self.explained_variance.iter())
            {
                let scale = var.max(VARIANCE_FLOOR).sqrt();
                col.mapv_inplace(|v| v / scale);
            }
        }
        Ok(projected)
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        if self.total_variance > 0.0 {
            &self.explained_variance / self.total_variance
        } else {
            Array1::zeros(self.explained_variance.len())
        }
    }
}

fn descending_order(values: &Array1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order
}

/// Eigenvalues and column eigenvectors of a symmetric matrix
pub fn symmetric_eigen(mut a: Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    let scale = a.iter().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off <= 1e-24 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = if theta == 0.0 {
                    1.0
                } else {
                    theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    (a.diag().to_owned(), v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn eigen_decomposes_small_symmetric_matrix() {
        let m = array![[2.0, 1.0], [1.0, 2.0]];
        let (values, vectors) = symmetric_eigen(m.clone());
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        assert!((sorted[0] - 1.0).abs() < 1e-9);
        assert!((sorted[1] - 3.0).abs() < 1e-9);
        // A v = lambda v
        for i in 0..2 {
            let col = vectors.column(i);
            let av = m.dot(&col);
            for k in 0..2 {
                assert!((av[k] - values[i] * col[k]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn first_component_follows_dominant_direction() {
        let x = array![
            [1.0, 1.0, 0.0],
            [2.0, 2.1, 0.0],
            [3.0, 2.9, 0.1],
            [4.0, 4.0, 0.0],
            [5.0, 5.1, -0.1]
        ];
        let pca = Pca::fit(x.view(), 2, false).unwrap();
        let first = pca.components().row(0);
        assert!((first[0] - first[1]).abs() < 0.05);
        assert!(first[0] > 0.0);
        assert!(pca.explained_variance_ratio()[0] > 0.95);
    }

    #[test]
    fn gram_path_matches_covariance_path() {
        let x = Array2::from_shape_fn((4, 6), |(i, j)| ((i * 7 + j * 3) % 5) as f64 + i as f64);
        let wide = Pca::fit(x.view(), 2, false).unwrap();
        let tall_x = x.t().dot(&x); // unrelated data, only exercises the other branch
        let tall = Pca::fit(tall_x.view(), 2, false).unwrap();
        assert_eq!(wide.n_components(), 2);
        assert_eq!(tall.n_components(), 2);

        // projected variance equals the explained variance
        let projected = wide.transform(x.view()).unwrap();
        let var0 = projected.column(0).mapv(|v| v * v).sum() / 3.0;
        assert!((var0 - wide.explained_variance()[0]).abs() < 1e-6);
    }

    #[test]
    fn whitening_gives_unit_variance() {
        let x = array![[1.0, 0.0], [3.0, 1.0], [5.0, 0.5], [7.0, 2.0], [9.0, 1.0]];
        let pca = Pca::fit(x.view(), 2, true).unwrap();
        let projected = pca.transform(x.view()).unwrap();
        for col in projected.columns() {
            let var = col.mapv(|v| v * v).sum() / 4.0;
            assert!((var - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn too_many_components_is_a_shape_error() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 7.0]];
        assert!(matches!(
            Pca::fit(x.view(), 3, false),
            Err(SkmError::DataShape(_))
        ));
    }
}
