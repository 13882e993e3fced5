//! Additive white noise at a target SNR

use crate::collate::{map_payloads, unexpected_payload, Batch, CollateStage, Payload};
use crate::config::AugmentConfig;
use crate::error::Result;
use rand::prelude::*;
use rand::rngs::StdRng;

/// Adds Gaussian white noise to waves. The noise stream of a file depends
/// only on the configured seed and the file name, so parallel collation
/// stays reproducible.
#[derive(Debug, Clone)]
pub struct WhiteNoiseStage {
    config: AugmentConfig,
}

impl WhiteNoiseStage {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    fn rng_for(&self, filename: &str) -> StdRng {
        // FNV-1a over the file name
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in filename.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        StdRng::seed_from_u64(self.config.seed ^ hash)
    }

    pub fn augment(&self, filename: &str, wave: &[f32]) -> Vec<f32> {
        let mut rng = self.rng_for(filename);
        if rng.gen::<f32>() >= self.config.probability {
            return wave.to_vec();
        }
        let power = wave.iter().map(|x| x * x).sum::<f32>() / wave.len().max(1) as f32;
        if power <= 0.0 {
            return wave.to_vec();
        }
        let noise_std = (power / 10f32.powf(self.config.snr_db / 10.0)).sqrt();
        wave.iter()
            .map(|&x| x + noise_std * standard_normal(&mut rng))
            .collect()
    }
}

/// Box-Muller draw from N(0, 1)
fn standard_normal(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

impl CollateStage for WhiteNoiseStage {
    fn name(&self) -> &str {
        "white_noise"
    }

    fn apply(&self, batch: Batch) -> Result<Batch> {
        map_payloads(self.name(), batch, |filename, payload| match payload {
            Payload::Wave(wave) => Ok(Payload::Wave(self.augment(filename, &wave))),
            other => Err(unexpected_payload("white_noise", "wave", &other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone() -> Vec<f32> {
        (0..16000).map(|i| (i as f32 * 0.07).sin() * 0.5).collect()
    }

    #[test]
    fn noise_reaches_target_snr() {
        let stage = WhiteNoiseStage::new(AugmentConfig {
            enabled: true,
            snr_db: 10.0,
            ..Default::default()
        });
        let clean = tone();
        let noisy = stage.augment("a.wav", &clean);
        let signal: f32 = clean.iter().map(|x| x * x).sum();
        let noise: f32 = noisy.iter().zip(&clean).map(|(n, c)| (n - c) * (n - c)).sum();
        let snr = 10.0 * (signal / noise).log10();
        assert!((snr - 10.0).abs() < 0.5, "snr {}", snr);
    }

    #[test]
    fn noise_is_reproducible_per_file() {
        let stage = WhiteNoiseStage::new(AugmentConfig::default());
        let clean = tone();
        assert_eq!(stage.augment("a.wav", &clean), stage.augment("a.wav", &clean));
        assert_ne!(stage.augment("a.wav", &clean), stage.augment("b.wav", &clean));
    }

    #[test]
    fn zero_probability_leaves_waves_untouched() {
        let stage = WhiteNoiseStage::new(AugmentConfig {
            probability: 0.0,
            ..Default::default()
        });
        let clean = tone();
        assert_eq!(stage.augment("a.wav", &clean), clean);
    }
}
