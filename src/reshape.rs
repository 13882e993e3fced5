//! Spectrogram slicing and flattening
//!
//! Slices are flattened frequency-major: the row-major order of a
//! `(n_freq, slice_size)` array. Every consumer relies on this order.

use crate::config::{ReshapeConfig, Validate};
use crate::error::{Result, SkmError};
use ndarray::{s, Array1, Array2, ArrayView1};

/// Number of slices a spectrogram with `n_frames` columns yields
pub fn slice_count(n_frames: usize, slice_size: usize, stride_size: usize) -> Result<usize> {
    if slice_size == 0 || stride_size == 0 {
        return Err(SkmError::ConfigValidationFailed(
            "slice_size and stride_size must be positive".to_string(),
        ));
    }
    if n_frames < slice_size {
        return Err(SkmError::DataShape(format!(
            "spectrogram has {} frames, fewer than slice_size {}",
            n_frames, slice_size
        )));
    }
    Ok((n_frames - slice_size) / stride_size + 1)
}

/// Cut a spectrogram into `(n_freq, slice_size)` windows along time
pub fn slice_spectrogram(
    spectrogram: &Array2<f32>,
    slice_size: usize,
    stride_size: usize,
) -> Result<Vec<Array2<f32>>> {
    let n_slices = slice_count(spectrogram.ncols(), slice_size, stride_size)?;
    Ok((0..n_slices)
        .map(|i| {
            let start = i * stride_size;
            spectrogram
                .slice(s![.., start..start + slice_size])
                .to_owned()
        })
        .collect())
}

/// Flatten a slice into a vector of length `n_freq * slice_size`
pub fn flatten_slice(slice: &Array2<f32>) -> Array1<f32> {
    slice.iter().copied().collect()
}

/// Inverse of [`flatten_slice`]
pub fn unflatten_slice(flat: &ArrayView1<f32>, n_freq_bins: usize) -> Result<Array2<f32>> {
    if n_freq_bins == 0 || flat.len() % n_freq_bins != 0 {
        return Err(SkmError::DataShape(format!(
            "cannot reshape {} values into {} frequency rows",
            flat.len(),
            n_freq_bins
        )));
    }
    let slice_size = flat.len() / n_freq_bins;
    Array2::from_shape_vec((n_freq_bins, slice_size), flat.to_vec())
        .map_err(|e| SkmError::DataShape(e.to_string()))
}

/// Slice and flatten in one go: one row per slice, as `f64` features
pub fn slice_flatten(spectrogram: &Array2<f32>, config: &ReshapeConfig) -> Result<Array2<f64>> {
    config.validate()?;
    let slices = slice_spectrogram(spectrogram, config.slice_size, config.stride_size)?;
    let width = spectrogram.nrows() * config.slice_size;
    let mut flat = Array2::<f64>::zeros((slices.len(), width));
    for (mut row, slice) in flat.rows_mut().into_iter().zip(&slices) {
        for (dst, &src) in row.iter_mut().zip(slice.iter()) {
            *dst = src as f64;
        }
    }
    Ok(flat)
}
