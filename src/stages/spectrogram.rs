//! Wave to spectrogram stages

use crate::collate::{map_payloads, unexpected_payload, Batch, CollateStage, Payload};
use crate::config::{MelSpecConfig, StftSpecConfig};
use crate::error::Result;
use crate::spectral::{mel_spectrogram, stft_spectrogram};

#[derive(Debug, Clone)]
pub struct MelSpectrogramStage {
    config: MelSpecConfig,
}

impl MelSpectrogramStage {
    pub fn new(config: MelSpecConfig) -> Self {
        Self { config }
    }
}

impl CollateStage for MelSpectrogramStage {
    fn name(&self) -> &str {
        "mel_spectrogram"
    }

    fn apply(&self, batch: Batch) -> Result<Batch> {
        map_payloads(self.name(), batch, |_, payload| match payload {
            Payload::Wave(wave) => Ok(Payload::Spectrogram(mel_spectrogram(&wave, &self.config)?)),
            other => Err(unexpected_payload("mel_spectrogram", "wave", &other)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StftSpectrogramStage {
    config: StftSpecConfig,
}

impl StftSpectrogramStage {
    pub fn new(config: StftSpecConfig) -> Self {
        Self { config }
    }
}

impl CollateStage for StftSpectrogramStage {
    fn name(&self) -> &str {
        "stft_spectrogram"
    }

    fn apply(&self, batch: Batch) -> Result<Batch> {
        map_payloads(self.name(), batch, |_, payload| match payload {
            Payload::Wave(wave) => Ok(Payload::Spectrogram(stft_spectrogram(&wave, &self.config)?)),
            other => Err(unexpected_payload("stft_spectrogram", "wave", &other)),
        })
    }
}
