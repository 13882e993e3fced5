//! End-to-end feature pipeline: spectrogram, slicing, codebooks, pooling
//! and PCA + SVC on synthetic two-class audio

use ndarray::Array2;
use rand::prelude::*;
use rand::rngs::StdRng;
use skm_audio::audio::AudioSample;
use skm_audio::classifier::{infer_wave, train, InferenceConfig};
use skm_audio::collate::{evaluation_pipeline, slicing_pipeline, stack_rows, Payload};
use skm_audio::config::{LoaderConfig, PcaConfig, PoolConfig, ReshapeConfig, SkmConfig, SpecConfig, SvcConfig};
use skm_audio::loader::collate_samples;
use skm_audio::skm::{fit_class_codebooks, group_by_label};
use skm_audio::spectral::mel_spectrogram;
use std::f32::consts::PI;
use std::sync::Arc;

const SR: u32 = 16000;

/// Tone with light deterministic noise; class 0 is low-pitched, class 1 high
fn synthetic_wave(label: usize, index: usize, seconds: f32) -> Vec<f32> {
    let freq = if label == 0 {
        220.0 + 35.0 * index as f32
    } else {
        2500.0 + 180.0 * index as f32
    };
    let mut rng = StdRng::seed_from_u64((label * 1000 + index) as u64);
    let n = (seconds * SR as f32) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / SR as f32;
            0.5 * (2.0 * PI * freq * t).sin() + 0.01 * (rng.gen::<f32>() - 0.5)
        })
        .collect()
}

fn samples(per_class: usize) -> Vec<AudioSample> {
    (0..2)
        .flat_map(|label| {
            (0..per_class).map(move |i| AudioSample {
                filename: format!("class{}_{:02}.wav", label, i),
                wave: synthetic_wave(label, i, 4.0),
                label,
            })
        })
        .collect()
}

fn loader() -> LoaderConfig {
    LoaderConfig {
        num_workers: 2,
        batch_size: 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_second_clip_shapes() {
        let spec = SpecConfig::default();
        let SpecConfig::Mel(mel) = &spec else {
            panic!("default spectrogram should be mel");
        };
        let spectrogram = mel_spectrogram(&synthetic_wave(0, 0, 4.0), mel).unwrap();
        assert_eq!(spectrogram.data.dim(), (40, 126));

        let pipeline = slicing_pipeline(None, &spec, &ReshapeConfig::default());
        let items = collate_samples(samples(1), &pipeline, &loader()).unwrap();
        for item in &items {
            match &item.payload {
                Payload::Slices(slices) => assert_eq!(slices.dim(), (14, 40 * 16)),
                other => panic!("unexpected payload {}", other.kind()),
            }
        }
    }

    #[test]
    fn test_end_to_end_descriptors_and_classifier() {
        let spec = SpecConfig::default();
        let reshape = ReshapeConfig::default();
        let skm = SkmConfig::default();

        let train_samples = samples(8);
        let sliced = collate_samples(
            train_samples.clone(),
            &slicing_pipeline(None, &spec, &reshape),
            &loader(),
        )
        .unwrap();
        let (slices, slice_labels) = stack_rows(&sliced).unwrap();
        assert_eq!(slices.nrows(), 16 * 14);

        let groups = group_by_label(slices.view(), &slice_labels).unwrap();
        let codebooks = fit_class_codebooks(&groups, &[8, 8], &skm).unwrap();
        assert_eq!(codebooks.len(), 2);

        let describe = evaluation_pipeline(
            &spec,
            &reshape,
            Arc::new(codebooks.clone()),
            &PoolConfig::default(),
        );
        let described = collate_samples(train_samples, &describe, &loader()).unwrap();
        let (features, labels) = stack_rows(&described).unwrap();
        assert_eq!(features.dim(), (16, 32));
        assert_eq!(labels, [vec![0; 8], vec![1; 8]].concat());

        // cosine similarities, then non-negative std
        for row in features.rows() {
            assert!(row.iter().take(16).all(|v| (-1.0 - 1e-9..=1.0 + 1e-9).contains(v)));
            assert!(row.iter().skip(16).all(|&v| v >= 0.0));
        }

        let (first, train_acc) =
            train(features.view(), &labels, &PcaConfig::default(), &SvcConfig::default()).unwrap();
        let (second, train_acc_again) =
            train(features.view(), &labels, &PcaConfig::default(), &SvcConfig::default()).unwrap();
        assert_eq!(train_acc, train_acc_again);
        assert_eq!(
            first.predict(features.view()).unwrap(),
            second.predict(features.view()).unwrap()
        );
        assert!(train_acc >= 0.9, "train accuracy {}", train_acc);
    }

    #[test]
    fn test_windowed_inference_fractions() {
        let spec = SpecConfig::default();
        let reshape = ReshapeConfig::default();
        let pool = PoolConfig {
            pool_size: 4,
            stride_size: 2,
        };

        let train_samples = samples(4);
        let sliced = collate_samples(
            train_samples.clone(),
            &slicing_pipeline(None, &spec, &reshape),
            &loader(),
        )
        .unwrap();
        let (slices, slice_labels) = stack_rows(&sliced).unwrap();
        let groups = group_by_label(slices.view(), &slice_labels).unwrap();
        let codebooks = fit_class_codebooks(&groups, &[4, 4], &SkmConfig::default()).unwrap();

        let describe = evaluation_pipeline(&spec, &reshape, Arc::new(codebooks.clone()), &pool);
        let described = collate_samples(train_samples, &describe, &loader()).unwrap();
        let (features, labels): (Array2<f64>, Vec<usize>) = stack_rows(&described).unwrap();
        // 14 slices pooled 4 at a time with stride 2
        assert_eq!(features.nrows(), 8 * 6);

        let (classifier, _) =
            train(features.view(), &labels, &PcaConfig::default(), &SvcConfig::default()).unwrap();
        let config = InferenceConfig {
            spec,
            reshape,
            pool,
            n_classes: 2,
        };
        let result = infer_wave("unseen.wav", synthetic_wave(0, 1, 4.0), &codebooks, &classifier, &config)
            .unwrap();
        assert_eq!(result.predictions.len(), 6);
        assert!((result.class_fractions.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        let expected = result.predictions.iter().filter(|&&p| p == 0).count() as f64 / 6.0;
        assert_eq!(result.class_zero_confidence(), expected);
    }

    #[test]
    fn test_too_short_wave_fails_slicing() {
        let pipeline = slicing_pipeline(None, &SpecConfig::default(), &ReshapeConfig::default());
        let short = vec![AudioSample {
            filename: "short.wav".to_string(),
            wave: synthetic_wave(0, 0, 0.2),
            label: 0,
        }];
        assert!(collate_samples(short, &pipeline, &loader()).is_err());
    }
}
