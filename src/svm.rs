//! Support vector classification
//!
//! Binary C-SVC machines are trained with SMO using the maximal violating
//! pair working set. Multi-class problems are decomposed one-vs-one and
//! decided by majority vote, ties going to the lowest class label.

use crate::config::{Gamma, GammaHeuristic, Kernel, SvcConfig, Validate};
use crate::error::{Result, SkmError};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

const TAU: f64 = 1e-12;

/// Kernel with every coefficient resolved
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    pub kernel: Kernel,
    pub gamma: f64,
    pub degree: u32,
    pub coef0: f64,
}

impl KernelParams {
    /// Resolve the configured gamma against the training matrix
    pub fn resolve(config: &SvcConfig, x: ArrayView2<f64>) -> Self {
        let n_features = x.ncols().max(1) as f64;
        let gamma = match config.gamma {
            Gamma::Value(g) => g,
            Gamma::Named(GammaHeuristic::Auto) => 1.0 / n_features,
            Gamma::Named(GammaHeuristic::Scale) => {
                let var = if x.is_empty() {
                    0.0
                } else {
                    let mean = x.iter().sum::<f64>() / x.len() as f64;
                    x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / x.len() as f64
                };
                if var > 0.0 {
                    1.0 / (n_features * var)
                } else {
                    1.0
                }
            }
        };
        Self {
            kernel: config.kernel,
            gamma,
            degree: config.degree,
            coef0: config.coef0,
        }
    }

    pub fn eval(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.kernel {
            Kernel::Linear => a.dot(&b),
            Kernel::Poly => (self.gamma * a.dot(&b) + self.coef0).powi(self.degree as i32),
            Kernel::Rbf => {
                let sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                (-self.gamma * sq).exp()
            }
            Kernel::Sigmoid => (self.gamma * a.dot(&b) + self.coef0).tanh(),
        }
    }
}

/// One pairwise machine: decides `positive` when the decision value is > 0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySvc {
    pub positive: usize,
    pub negative: usize,
    support: Array2<f64>,
    /// `alpha_i * y_i` per support vector
    dual_coef: Vec<f64>,
    rho: f64,
    n_iter: usize,
    converged: bool,
}

impl BinarySvc {
    /// `y` holds +1 / -1 per row
    fn fit(
        x: ArrayView2<f64>,
        y: &[f64],
        params: &KernelParams,
        config: &SvcConfig,
        (positive, negative): (usize, usize),
    ) -> Self {
        let n = x.nrows();
        let c = config.c;

        let kernel = Array2::from_shape_fn((n, n), |(i, j)| params.eval(x.row(i), x.row(j)));
        let q = |i: usize, j: usize| y[i] * y[j] * kernel[[i, j]];

        let mut alpha = vec![0.0; n];
        let mut grad = vec![-1.0; n];
        let mut n_iter = 0;
        let mut converged = false;

        while n_iter < config.max_iter {
            // maximal violating pair
            let mut g_max = f64::NEG_INFINITY;
            let mut g_max2 = f64::NEG_INFINITY;
            let mut i_sel = None;
            let mut j_sel = None;
            for t in 0..n {
                if y[t] > 0.0 {
                    if alpha[t] < c && -grad[t] >= g_max {
                        g_max = -grad[t];
                        i_sel = Some(t);
                    }
                    if alpha[t] > 0.0 && grad[t] >= g_max2 {
                        g_max2 = grad[t];
                        j_sel = Some(t);
                    }
                } else {
                    if alpha[t] > 0.0 && grad[t] >= g_max {
                        g_max = grad[t];
                        i_sel = Some(t);
                    }
                    if alpha[t] < c && -grad[t] >= g_max2 {
                        g_max2 = -grad[t];
                        j_sel = Some(t);
                    }
                }
            }
            let (i, j) = match (i_sel, j_sel) {
                (Some(i), Some(j)) if g_max + g_max2 >= config.tol => (i, j),
                _ => {
                    converged = true;
                    break;
                }
            };
            n_iter += 1;

            let (old_i, old_j) = (alpha[i], alpha[j]);
            if y[i] != y[j] {
                let quad = (q(i, i) + q(j, j) + 2.0 * q(i, j)).max(TAU);
                let delta = (-grad[i] - grad[j]) / quad;
                let diff = alpha[i] - alpha[j];
                alpha[i] += delta;
                alpha[j] += delta;
                if diff > 0.0 {
                    if alpha[j] < 0.0 {
                        alpha[j] = 0.0;
                        alpha[i] = diff;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = -diff;
                }
                if diff > 0.0 {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = c - diff;
                    }
                } else if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = c + diff;
                }
            } else {
                let quad = (q(i, i) + q(j, j) - 2.0 * q(i, j)).max(TAU);
                let delta = (grad[i] - grad[j]) / quad;
                let sum = alpha[i] + alpha[j];
                alpha[i] -= delta;
                alpha[j] += delta;
                if sum > c {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = sum - c;
                    }
                } else if alpha[j] < 0.0 {
                    alpha[j] = 0.0;
                    alpha[i] = sum;
                }
                if sum > c {
                    if alpha[j] > c {
                        alpha[j] = c;
                        alpha[i] = sum - c;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = sum;
                }
            }

            let (d_i, d_j) = (alpha[i] - old_i, alpha[j] - old_j);
            for (t, g) in grad.iter_mut().enumerate() {
                *g += q(t, i) * d_i + q(t, j) * d_j;
            }
        }

        if !converged {
            log::warn!(
                "SMO for classes ({}, {}) stopped after {} iterations without converging",
                positive,
                negative,
                n_iter
            );
        }

        let rho = compute_rho(&alpha, &grad, y, c);
        let sv: Vec<usize> = (0..n).filter(|&t| alpha[t] > 0.0).collect();
        Self {
            positive,
            negative,
            support: x.select(Axis(0), &sv),
            dual_coef: sv.iter().map(|&t| alpha[t] * y[t]).collect(),
            rho,
            n_iter,
            converged,
        }
    }

    pub fn decision_value(&self, params: &KernelParams, sample: ArrayView1<f64>) -> f64 {
        self.support
            .rows()
            .into_iter()
            .zip(&self.dual_coef)
            .map(|(sv, coef)| coef * params.eval(sv, sample))
            .sum::<f64>()
            - self.rho
    }

    pub fn n_support(&self) -> usize {
        self.dual_coef.len()
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// Bias from the KKT conditions: mean over free vectors, else the midpoint
/// of the feasible interval
fn compute_rho(alpha: &[f64], grad: &[f64], y: &[f64], c: f64) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut n_free = 0;
    let mut sum_free = 0.0;
    for t in 0..alpha.len() {
        let yg = y[t] * grad[t];
        if alpha[t] >= c {
            if y[t] < 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else if alpha[t] <= 0.0 {
            if y[t] > 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else {
            n_free += 1;
            sum_free += yg;
        }
    }
    if n_free > 0 {
        sum_free / n_free as f64
    } else {
        (upper + lower) / 2.0
    }
}

/// Multi-class support vector classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Svc {
    params: KernelParams,
    classes: Vec<usize>,
    n_features: usize,
    machines: Vec<BinarySvc>,
}

impl Svc {
    pub fn fit(x: ArrayView2<f64>, labels: &[usize], config: &SvcConfig) -> Result<Self> {
        config.validate()?;
        if x.nrows() == 0 || x.nrows() != labels.len() {
            return Err(SkmError::DataShape(format!(
                "svc needs matching samples and labels, got {} and {}",
                x.nrows(),
                labels.len()
            )));
        }
        let mut classes: Vec<usize> = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(SkmError::ClassificationError(format!(
                "svc needs at least two classes, got {:?}",
                classes
            )));
        }

        let params = KernelParams::resolve(config, x);
        log::debug!(
            "svc: {} samples, {} classes, kernel {:?}, gamma {:.4e}",
            x.nrows(),
            classes.len(),
            params.kernel,
            params.gamma
        );

        let mut machines = Vec::with_capacity(classes.len() * (classes.len() - 1) / 2);
        for (a_idx, &a) in classes.iter().enumerate() {
            for &b in &classes[a_idx + 1..] {
                let rows: Vec<usize> = (0..labels.len())
                    .filter(|&i| labels[i] == a || labels[i] == b)
                    .collect();
                let y: Vec<f64> = rows
                    .iter()
                    .map(|&i| if labels[i] == a { 1.0 } else { -1.0 })
                    .collect();
                let sub = x.select(Axis(0), &rows);
                machines.push(BinarySvc::fit(sub.view(), &y, &params, config, (a, b)));
            }
        }

        Ok(Self {
            params,
            classes,
            n_features: x.ncols(),
            machines,
        })
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<usize>> {
        if x.ncols() != self.n_features {
            return Err(SkmError::DataShape(format!(
                "svc expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        Ok(x.rows().into_iter().map(|row| self.predict_one(row)).collect())
    }

    fn predict_one(&self, sample: ArrayView1<f64>) -> usize {
        let mut votes = vec![0usize; self.classes.len()];
        for machine in &self.machines {
            let winner = if machine.decision_value(&self.params, sample) > 0.0 {
                machine.positive
            } else {
                machine.negative
            };
            if let Ok(idx) = self.classes.binary_search(&winner) {
                votes[idx] += 1;
            }
        }
        let mut best = 0;
        for (idx, &count) in votes.iter().enumerate() {
            if count > votes[best] {
                best = idx;
            }
        }
        self.classes[best]
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn kernel_params(&self) -> &KernelParams {
        &self.params
    }

    pub fn machines(&self) -> &[BinarySvc] {
        &self.machines
    }

    pub fn n_support(&self) -> usize {
        self.machines.iter().map(|m| m.n_support()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs(centers: &[(f64, f64)], per_class: usize) -> (Array2<f64>, Vec<usize>) {
        let mut x = Array2::zeros((centers.len() * per_class, 2));
        let mut labels = Vec::new();
        for (c, &(cx, cy)) in centers.iter().enumerate() {
            for i in 0..per_class {
                let angle = i as f64 * 0.7;
                let r = 0.1 + 0.05 * (i % 3) as f64;
                let row = c * per_class + i;
                x[[row, 0]] = cx + r * angle.cos();
                x[[row, 1]] = cy + r * angle.sin();
                labels.push(c);
            }
        }
        (x, labels)
    }

    #[test]
    fn linear_kernel_separates_two_blobs() {
        let (x, labels) = blobs(&[(-2.0, 0.0), (2.0, 0.0)], 10);
        let config = SvcConfig {
            kernel: Kernel::Linear,
            ..Default::default()
        };
        let svc = Svc::fit(x.view(), &labels, &config).unwrap();
        assert_eq!(svc.predict(x.view()).unwrap(), labels);
        assert!(svc.machines()[0].converged());

        let unseen = array![[-5.0, 1.0], [5.0, -1.0]];
        assert_eq!(svc.predict(unseen.view()).unwrap(), vec![0, 1]);
    }

    #[test]
    fn rbf_kernel_learns_xor() {
        let mut x = Array2::zeros((16, 2));
        let mut labels = Vec::new();
        let corners = [(1.0, 1.0, 0), (-1.0, -1.0, 0), (1.0, -1.0, 1), (-1.0, 1.0, 1)];
        for (c, &(cx, cy, label)) in corners.iter().enumerate() {
            for i in 0..4 {
                let jitter = 0.05 * i as f64;
                x[[c * 4 + i, 0]] = cx + jitter;
                x[[c * 4 + i, 1]] = cy - jitter;
                labels.push(label);
            }
        }
        let config = SvcConfig {
            c: 10.0,
            ..Default::default()
        };
        let svc = Svc::fit(x.view(), &labels, &config).unwrap();
        assert_eq!(svc.predict(x.view()).unwrap(), labels);
    }

    #[test]
    fn one_vs_one_handles_three_classes() {
        let (x, labels) = blobs(&[(0.0, 3.0), (-3.0, -2.0), (3.0, -2.0)], 8);
        let svc = Svc::fit(x.view(), &labels, &SvcConfig::default()).unwrap();
        assert_eq!(svc.classes(), &[0, 1, 2]);
        assert_eq!(svc.machines().len(), 3);
        assert_eq!(svc.predict(x.view()).unwrap(), labels);
    }

    #[test]
    fn scale_gamma_uses_feature_variance() {
        let x = array![[0.0, 2.0], [2.0, 0.0]];
        let params = KernelParams::resolve(&SvcConfig::default(), x.view());
        // var over all entries = 1, two features
        assert!((params.gamma - 0.5).abs() < 1e-12);

        let auto = SvcConfig {
            gamma: Gamma::Named(GammaHeuristic::Auto),
            ..Default::default()
        };
        assert!((KernelParams::resolve(&auto, x.view()).gamma - 0.5).abs() < 1e-12);
    }

    #[test]
    fn single_class_is_rejected() {
        let x = array![[0.0, 1.0], [1.0, 0.0]];
        let result = Svc::fit(x.view(), &[1, 1], &SvcConfig::default());
        assert!(matches!(result, Err(SkmError::ClassificationError(_))));
    }

    #[test]
    fn feature_count_mismatch_on_predict() {
        let (x, labels) = blobs(&[(-1.0, 0.0), (1.0, 0.0)], 4);
        let svc = Svc::fit(x.view(), &labels, &SvcConfig::default()).unwrap();
        let wrong = Array2::<f64>::zeros((1, 3));
        assert!(matches!(
            svc.predict(wrong.view()),
            Err(SkmError::DataShape(_))
        ));
    }
}
