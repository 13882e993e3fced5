//! Spectrogram transforms (STFT magnitude and Mel power)

use crate::config::{MelSpecConfig, StftSpecConfig, Validate};
use crate::error::{Result, SkmError};
use crate::numeric::warn_divide_by_zero;
use ndarray::Array2;
use rustfft::{num_complex::Complex32, FftPlanner};

/// Floor applied before log compression
const LOG_AMIN: f32 = 1e-10;

/// Time-frequency representation of one wave
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// (n_freq_bins, n_frames)
    pub data: Array2<f32>,
    /// Frequency of every row in Hz
    pub freqs: Vec<f32>,
    /// Start time of every column in seconds
    pub times: Vec<f32>,
}

impl Spectrogram {
    pub fn n_freq_bins(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_frames(&self) -> usize {
        self.data.ncols()
    }
}

/// Compute the STFT magnitude spectrogram of a wave
pub fn stft_spectrogram(wave: &[f32], config: &StftSpecConfig) -> Result<Spectrogram> {
    config.validate()?;
    let mut spec = stft_magnitude(
        wave,
        config.n_fft,
        config.window_size,
        config.hop_size,
        config.sample_rate,
    )?;
    if config.apply_log {
        log_compress(&mut spec.data);
    }
    Ok(spec)
}

/// Compute the Mel power spectrogram of a wave
pub fn mel_spectrogram(wave: &[f32], config: &MelSpecConfig) -> Result<Spectrogram> {
    config.validate()?;
    let stft = stft_magnitude(
        wave,
        config.n_fft,
        config.window_size,
        config.hop_size,
        config.sample_rate,
    )?;
    let power = stft.data.mapv(|m| m * m);

    let freq_max = config.effective_freq_max();
    let filterbank = mel_filterbank(
        config.n_mels,
        config.n_fft,
        config.sample_rate,
        config.freq_min,
        freq_max,
    );
    let mut data = filterbank.dot(&power);
    if config.apply_log {
        log_compress(&mut data);
    }

    let edges = mel_frequencies(config.n_mels + 2, config.freq_min, freq_max);
    let freqs = edges[1..=config.n_mels].to_vec();

    Ok(Spectrogram {
        data,
        freqs,
        times: stft.times,
    })
}

/// Centered STFT magnitude: reflect padding by `n_fft / 2`, periodic Hann
/// window of `window_size` zero-padded to `n_fft`
fn stft_magnitude(
    wave: &[f32],
    n_fft: usize,
    window_size: usize,
    hop_size: usize,
    sample_rate: u32,
) -> Result<Spectrogram> {
    if wave.is_empty() {
        return Err(SkmError::SpectralProcessingError(
            "cannot transform an empty wave".to_string(),
        ));
    }

    let padded = center_pad(wave, n_fft / 2);
    let n_frames = (padded.len() - n_fft) / hop_size + 1;
    let n_bins = n_fft / 2 + 1;

    let window = hann_window(window_size);
    let offset = (n_fft - window_size) / 2;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut data = Array2::<f32>::zeros((n_bins, n_frames));
    let mut frame = vec![Complex32::new(0.0, 0.0); n_fft];

    for frame_idx in 0..n_frames {
        let start = frame_idx * hop_size;
        frame.iter_mut().for_each(|c| *c = Complex32::new(0.0, 0.0));
        for (i, &w) in window.iter().enumerate() {
            frame[offset + i] = Complex32::new(padded[start + offset + i] * w, 0.0);
        }

        fft.process(&mut frame);

        for (bin, value) in frame[..n_bins].iter().enumerate() {
            data[[bin, frame_idx]] = value.norm();
        }
    }

    let freqs = (0..n_bins)
        .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
        .collect();
    let times = (0..n_frames)
        .map(|i| i as f32 * hop_size as f32 / sample_rate as f32)
        .collect();

    Ok(Spectrogram { data, freqs, times })
}

/// Reflect-pad both ends; waves too short to reflect are zero-padded
fn center_pad(wave: &[f32], pad: usize) -> Vec<f32> {
    let mut padded = Vec::with_capacity(wave.len() + 2 * pad);
    if wave.len() > pad {
        padded.extend((1..=pad).rev().map(|i| wave[i]));
        padded.extend_from_slice(wave);
        padded.extend((0..pad).map(|i| wave[wave.len() - 2 - i]));
    } else {
        padded.resize(pad, 0.0);
        padded.extend_from_slice(wave);
        padded.resize(wave.len() + 2 * pad, 0.0);
    }
    padded
}

/// Periodic Hann window
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / size as f32).cos())
        .collect()
}

/// `10 * log10(max(x, amin))` in place
fn log_compress(data: &mut Array2<f32>) {
    let zeros = data.iter().filter(|&&x| x == 0.0).count();
    if zeros > 0 {
        warn_divide_by_zero("log10", zeros);
    }
    data.mapv_inplace(|x| 10.0 * x.max(LOG_AMIN).log10());
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above
fn hz_to_mel(hz: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// `n` frequencies evenly spaced on the mel scale
pub fn mel_frequencies(n: usize, freq_min: f32, freq_max: f32) -> Vec<f32> {
    let mel_min = hz_to_mel(freq_min);
    let mel_max = hz_to_mel(freq_max);
    if n == 1 {
        return vec![freq_min];
    }
    (0..n)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n - 1) as f32))
        .collect()
}

/// Triangular, area-normalised mel filterbank of shape (n_mels, n_fft / 2 + 1)
pub fn mel_filterbank(
    n_mels: usize,
    n_fft: usize,
    sample_rate: u32,
    freq_min: f32,
    freq_max: f32,
) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f32> = (0..n_bins)
        .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
        .collect();
    let edges = mel_frequencies(n_mels + 2, freq_min, freq_max);

    let mut weights = Array2::<f32>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (lower, center, upper) = (edges[m], edges[m + 1], edges[m + 2]);
        let norm = 2.0 / (upper - lower);
        for (bin, &f) in fft_freqs.iter().enumerate() {
            let rising = (f - lower) / (center - lower);
            let falling = (upper - f) / (upper - center);
            let w = rising.min(falling).max(0.0);
            weights[[m, bin]] = w * norm;
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sr: u32, seconds: f32) -> Vec<f32> {
        (0..(sr as f32 * seconds) as usize)
            .map(|i| (2.0 * PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn stft_frame_count_is_centered() {
        let wave = sine(440.0, 16000, 1.0);
        let config = StftSpecConfig {
            apply_log: false,
            ..StftSpecConfig::default()
        };
        let spec = stft_spectrogram(&wave, &config).unwrap();
        assert_eq!(spec.n_freq_bins(), 513);
        assert_eq!(spec.n_frames(), 1 + 16000 / 512);
        assert_eq!(spec.times.len(), spec.n_frames());
        assert!((spec.freqs[512] - 8000.0).abs() < 1e-3);
    }

    #[test]
    fn stft_peak_matches_tone() {
        let wave = sine(1000.0, 16000, 1.0);
        let config = StftSpecConfig {
            apply_log: false,
            ..StftSpecConfig::default()
        };
        let spec = stft_spectrogram(&wave, &config).unwrap();
        let column = spec.data.column(10);
        let peak_bin = column
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
            .0;
        assert!((spec.freqs[peak_bin] - 1000.0).abs() <= 16000.0 / 1024.0);
    }

    #[test]
    fn filterbank_rows_are_non_negative_and_non_empty() {
        let fb = mel_filterbank(40, 1024, 16000, 0.0, 8000.0);
        assert_eq!(fb.dim(), (40, 513));
        for row in fb.rows() {
            assert!(row.iter().all(|&w| w >= 0.0));
            assert!(row.sum() > 0.0);
        }
    }

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0f32, 300.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 0.5);
        }
    }

    #[test]
    fn log_compression_floors_zeros() {
        let wave = vec![0.0f32; 4096];
        let spec = mel_spectrogram(&wave, &MelSpecConfig::default()).unwrap();
        assert!(spec.data.iter().all(|v| v.is_finite()));
        assert!(spec.data.iter().all(|&v| (v - (-100.0)).abs() < 1e-3));
    }

    #[test]
    fn empty_wave_is_rejected() {
        let result = mel_spectrogram(&[], &MelSpecConfig::default());
        assert!(matches!(result, Err(SkmError::SpectralProcessingError(_))));
    }
}
