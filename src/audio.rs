//! Audio I/O: WAV decoding, mono mixdown and resampling

use crate::error::{Result, SkmError};
use hound::WavReader;
use std::path::Path;

/// One labelled sound wave, immutable once loaded
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub filename: String,
    /// Mono samples in [-1, 1] at the configured sample rate
    pub wave: Vec<f32>,
    pub label: usize,
}

/// Load a file as mono samples at `target_sr`
pub fn load_wave<P: AsRef<Path>>(path: P, target_sr: u32) -> Result<Vec<f32>> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();
    if extension != "wav" {
        return Err(SkmError::InvalidAudioFormat(format!(
            "Unsupported audio format: {} ({})",
            extension,
            path.display()
        )));
    }

    let (samples, sr) = load_wav_file(path)?;
    if samples.is_empty() {
        return Err(SkmError::InvalidAudioFormat(format!(
            "{} contains no samples",
            path.display()
        )));
    }
    Ok(resample_linear(&samples, sr, target_sr))
}

/// Decode a WAV file, averaging channels to mono
fn load_wav_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)
        .map_err(|e| SkmError::AudioFileError(format!("{}: {}", path.display(), e)))?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(SkmError::InvalidAudioFormat(
            "WAV header declares zero channels".to_string(),
        ));
    }
    if spec.bits_per_sample > 32 {
        return Err(SkmError::InvalidAudioFormat(format!(
            "Unsupported bit depth: {}",
            spec.bits_per_sample
        )));
    }

    let mut interleaved: Vec<f32> = Vec::with_capacity(reader.len() as usize);
    match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for sample in reader.samples::<i32>() {
                interleaved.push(sample? as f32 / max_value);
            }
        }
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                interleaved.push(sample?);
            }
        }
    }

    let channels = spec.channels as usize;
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

/// Linear-interpolation resampling
pub fn resample_linear(samples: &[f32], from_sr: u32, to_sr: u32) -> Vec<f32> {
    if from_sr == to_sr || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_sr as f64 / to_sr as f64;
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Write mono samples as 16-bit PCM
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_halves_length() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample_linear(&samples, 32000, 16000);
        assert_eq!(out.len(), 50);
        assert_eq!(out[10], 20.0);
    }

    #[test]
    fn wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..1600).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        write_wav(&path, &samples, 16000).unwrap();

        let loaded = load_wave(&path, 16000).unwrap();
        assert_eq!(loaded.len(), samples.len());
        for (a, b) in loaded.iter().zip(&samples) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let result = load_wave("clip.mp3", 16000);
        assert!(matches!(result, Err(SkmError::InvalidAudioFormat(_))));
    }
}
