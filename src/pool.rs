//! Mean/std pooling of slice projections into file descriptors

use crate::config::{PoolConfig, Validate};
use crate::error::{Result, SkmError};
use ndarray::{s, concatenate, Array2, ArrayView2, Axis};

/// Pool `(n_slices, dim)` projections into `(n_windows, 2 * dim)` rows of
/// `[mean, std]`. A `pool_size` of 0, or one covering every slice, pools the
/// whole file into a single row.
pub fn mean_std_pool(projections: ArrayView2<f64>, config: &PoolConfig) -> Result<Array2<f64>> {
    config.validate()?;
    let n_slices = projections.nrows();
    if n_slices == 0 {
        return Err(SkmError::DataShape("cannot pool zero slices".to_string()));
    }

    let windows: Vec<(usize, usize)> = if config.pool_size == 0 || config.pool_size >= n_slices {
        vec![(0, n_slices)]
    } else {
        let n_windows = (n_slices - config.pool_size) / config.stride_size + 1;
        (0..n_windows)
            .map(|i| {
                let start = i * config.stride_size;
                (start, start + config.pool_size)
            })
            .collect()
    };

    let rows: Vec<Array2<f64>> = windows
        .into_iter()
        .map(|(start, end)| pool_window(projections.slice(s![start..end, ..])))
        .collect::<Result<_>>()?;
    let views: Vec<ArrayView2<f64>> = rows.iter().map(|r| r.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| SkmError::DataShape(e.to_string()))
}

fn pool_window(window: ArrayView2<f64>) -> Result<Array2<f64>> {
    let mean = window
        .mean_axis(Axis(0))
        .ok_or_else(|| SkmError::DataShape("empty pooling window".to_string()))?;
    // population variance, clamped so rounding never yields a negative or NaN std
    let var = window
        .rows()
        .into_iter()
        .fold(ndarray::Array1::<f64>::zeros(mean.len()), |acc, row| {
            acc + (&row - &mean).mapv(|d| d * d)
        })
        / window.nrows() as f64;
    let std = var.mapv(|v| v.max(0.0).sqrt());

    let mut out = Array2::<f64>::zeros((1, 2 * mean.len()));
    out.slice_mut(s![0, ..mean.len()]).assign(&mean);
    out.slice_mut(s![0, mean.len()..]).assign(&std);
    Ok(out)
}
