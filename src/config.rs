//! Configuration system for the spherical k-means audio pipeline
//!
//! Each concern (dataset, spectrogram, reshape, augmentation, spherical
//! k-means, PCA, SVC, loader, pooling) is its own JSON document. Every
//! section deserialises with defaults for missing fields and is validated
//! before any numerical work starts.

use crate::error::{Result, SkmError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Validation hook run on every configuration section after loading
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(msg: impl Into<String>) -> SkmError {
    SkmError::ConfigValidationFailed(msg.into())
}

/// All configuration sections used by one experiment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub dataset: DatasetConfig,
    pub spec: SpecConfig,
    pub reshape: ReshapeConfig,
    pub augment: AugmentConfig,
    pub skm: SkmConfig,
    pub pca: PcaConfig,
    pub svc: SvcConfig,
    pub loader: LoaderConfig,
    pub pool: PoolConfig,
}

impl Validate for ExperimentConfig {
    fn validate(&self) -> Result<()> {
        self.dataset.validate()?;
        self.spec.validate()?;
        self.reshape.validate()?;
        self.augment.validate()?;
        self.skm.validate()?;
        self.pca.validate()?;
        self.svc.validate()?;
        self.loader.validate()?;
        self.pool.validate()?;
        Ok(())
    }
}

/// How fold membership is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetLayout {
    /// `root/<class>/<file>.wav`, folds drawn by seeded shuffling
    KFold,
    /// `root/<fold_prefix><NN>/<class>/<file>.wav`, folds given on disk
    PreSplit,
}

/// Dataset split configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub root_path: PathBuf,
    pub k_folds: usize,
    pub n_classes: usize,
    pub seed: u64,
    pub layout: DatasetLayout,
    pub fold_dir_prefix: String,
    pub extensions: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("./data"),
            k_folds: 5,
            n_classes: 2,
            seed: 42,
            layout: DatasetLayout::KFold,
            fold_dir_prefix: "fold_".to_string(),
            extensions: vec!["wav".to_string()],
        }
    }
}

impl Validate for DatasetConfig {
    fn validate(&self) -> Result<()> {
        if self.k_folds < 2 {
            return Err(invalid(format!("k_folds must be >= 2, got {}", self.k_folds)));
        }
        if self.n_classes < 2 {
            return Err(invalid(format!(
                "n_classes must be >= 2, got {}",
                self.n_classes
            )));
        }
        if self.extensions.is_empty() {
            return Err(invalid("extensions must not be empty"));
        }
        // only WAV files can be decoded
        if let Some(ext) = self.extensions.iter().find(|e| !e.eq_ignore_ascii_case("wav")) {
            return Err(invalid(format!(
                "unsupported audio extension '{}', only wav is readable",
                ext
            )));
        }
        Ok(())
    }
}

/// Plain STFT magnitude spectrogram parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StftSpecConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub window_size: usize,
    pub hop_size: usize,
    pub apply_log: bool,
}

impl Default for StftSpecConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 1024,
            window_size: 1024,
            hop_size: 512,
            apply_log: true,
        }
    }
}

fn validate_frames(sample_rate: u32, n_fft: usize, window_size: usize, hop_size: usize) -> Result<()> {
    if sample_rate == 0 {
        return Err(invalid("sample_rate must be positive"));
    }
    if n_fft == 0 || window_size == 0 || hop_size == 0 {
        return Err(invalid(format!(
            "n_fft, window_size and hop_size must be positive (got {}, {}, {})",
            n_fft, window_size, hop_size
        )));
    }
    if window_size > n_fft {
        return Err(invalid(format!(
            "window_size ({}) must not exceed n_fft ({})",
            window_size, n_fft
        )));
    }
    Ok(())
}

impl Validate for StftSpecConfig {
    fn validate(&self) -> Result<()> {
        validate_frames(self.sample_rate, self.n_fft, self.window_size, self.hop_size)
    }
}

/// Mel spectrogram parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelSpecConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub n_mels: usize,
    pub freq_min: f32,
    /// Upper band edge in Hz; `<= 0` means Nyquist
    pub freq_max: f32,
    pub window_size: usize,
    pub hop_size: usize,
    pub apply_log: bool,
}

impl Default for MelSpecConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_fft: 1024,
            n_mels: 40,
            freq_min: 0.0,
            freq_max: 0.0,
            window_size: 1024,
            hop_size: 512,
            apply_log: true,
        }
    }
}

impl MelSpecConfig {
    /// Upper band edge with the Nyquist fallback applied
    pub fn effective_freq_max(&self) -> f32 {
        if self.freq_max > 0.0 {
            self.freq_max
        } else {
            self.sample_rate as f32 / 2.0
        }
    }
}

impl Validate for MelSpecConfig {
    fn validate(&self) -> Result<()> {
        validate_frames(self.sample_rate, self.n_fft, self.window_size, self.hop_size)?;
        if self.n_mels == 0 {
            return Err(invalid("n_mels must be positive"));
        }
        if self.freq_min < 0.0 || self.freq_min >= self.effective_freq_max() {
            return Err(invalid(format!(
                "freq_min ({}) must be in [0, freq_max ({}))",
                self.freq_min,
                self.effective_freq_max()
            )));
        }
        if self.effective_freq_max() > self.sample_rate as f32 / 2.0 {
            return Err(invalid(format!(
                "freq_max ({}) exceeds Nyquist ({})",
                self.freq_max,
                self.sample_rate as f32 / 2.0
            )));
        }
        Ok(())
    }
}

/// Spectrogram flavour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SpecConfig {
    Stft(StftSpecConfig),
    Mel(MelSpecConfig),
}

impl Default for SpecConfig {
    fn default() -> Self {
        SpecConfig::Mel(MelSpecConfig::default())
    }
}

impl SpecConfig {
    pub fn sample_rate(&self) -> u32 {
        match self {
            SpecConfig::Stft(c) => c.sample_rate,
            SpecConfig::Mel(c) => c.sample_rate,
        }
    }
}

impl Validate for SpecConfig {
    fn validate(&self) -> Result<()> {
        match self {
            SpecConfig::Stft(c) => c.validate(),
            SpecConfig::Mel(c) => c.validate(),
        }
    }
}

/// Slice window over the spectrogram time axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReshapeConfig {
    pub slice_size: usize,
    pub stride_size: usize,
}

impl Default for ReshapeConfig {
    fn default() -> Self {
        Self {
            slice_size: 16,
            stride_size: 8,
        }
    }
}

impl Validate for ReshapeConfig {
    fn validate(&self) -> Result<()> {
        if self.slice_size == 0 || self.stride_size == 0 {
            return Err(invalid("slice_size and stride_size must be positive"));
        }
        Ok(())
    }
}

/// Additive white noise applied to training waves only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    pub enabled: bool,
    /// Target signal-to-noise ratio in dB
    pub snr_db: f32,
    /// Chance that a given file gets noise
    pub probability: f32,
    pub seed: u64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            snr_db: 20.0,
            probability: 1.0,
            seed: 7,
        }
    }
}

impl Validate for AugmentConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(invalid(format!(
                "augment probability must be in [0, 1], got {}",
                self.probability
            )));
        }
        if !self.snr_db.is_finite() {
            return Err(invalid("snr_db must be finite"));
        }
        Ok(())
    }
}

/// Spherical k-means codebook parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkmConfig {
    /// Optional PCA reduction applied before clustering
    pub n_components: Option<usize>,
    pub normalize: bool,
    pub standardize: bool,
    pub whiten: bool,
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for SkmConfig {
    fn default() -> Self {
        Self {
            n_components: None,
            normalize: true,
            standardize: false,
            whiten: false,
            max_iter: 10000,
            seed: 0,
        }
    }
}

impl Validate for SkmConfig {
    fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(invalid("skm max_iter must be positive"));
        }
        if self.n_components == Some(0) {
            return Err(invalid("skm n_components must be positive when set"));
        }
        if self.whiten && self.n_components.is_none() {
            return Err(invalid("skm whiten requires n_components"));
        }
        Ok(())
    }
}

/// PCA stage of the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    pub n_components: usize,
    pub whiten: bool,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            n_components: 10,
            whiten: false,
        }
    }
}

impl Validate for PcaConfig {
    fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(invalid("pca n_components must be positive"));
        }
        Ok(())
    }
}

/// SVM kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    Linear,
    Poly,
    Rbf,
    Sigmoid,
}

/// Named gamma heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GammaHeuristic {
    /// `1 / (n_features * var(X))`
    Scale,
    /// `1 / n_features`
    Auto,
}

/// Kernel coefficient, either a heuristic name or a value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Gamma {
    Named(GammaHeuristic),
    Value(f64),
}

/// SVC stage of the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvcConfig {
    #[serde(rename = "C")]
    pub c: f64,
    pub kernel: Kernel,
    pub degree: u32,
    pub gamma: Gamma,
    pub coef0: f64,
    pub tol: f64,
    pub max_iter: usize,
}

impl Default for SvcConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: Kernel::Rbf,
            degree: 3,
            gamma: Gamma::Named(GammaHeuristic::Scale),
            coef0: 0.0,
            tol: 1e-3,
            max_iter: 1_000_000,
        }
    }
}

impl Validate for SvcConfig {
    fn validate(&self) -> Result<()> {
        if self.c.is_nan() || self.c <= 0.0 {
            return Err(invalid(format!("svc C must be positive, got {}", self.c)));
        }
        if let Gamma::Value(g) = self.gamma {
            if g.is_nan() || g <= 0.0 {
                return Err(invalid(format!("svc gamma must be positive, got {}", g)));
            }
        }
        if self.kernel == Kernel::Poly && self.degree == 0 {
            return Err(invalid("svc degree must be positive for the poly kernel"));
        }
        if self.tol.is_nan() || self.tol <= 0.0 || self.max_iter == 0 {
            return Err(invalid("svc tol and max_iter must be positive"));
        }
        Ok(())
    }
}

/// Batch materialisation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub num_workers: usize,
    pub batch_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            batch_size: 32,
        }
    }
}

impl Validate for LoaderConfig {
    fn validate(&self) -> Result<()> {
        if self.num_workers == 0 || self.batch_size == 0 {
            return Err(invalid("num_workers and batch_size must be positive"));
        }
        Ok(())
    }
}

/// Pooling window over slice projections; `pool_size == 0` pools the whole file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub pool_size: usize,
    pub stride_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 0,
            stride_size: 1,
        }
    }
}

impl Validate for PoolConfig {
    fn validate(&self) -> Result<()> {
        if self.pool_size > 0 && self.stride_size == 0 {
            return Err(invalid("pool stride_size must be positive when pool_size is set"));
        }
        Ok(())
    }
}

/// Load and validate one configuration section from a JSON file
pub fn load_config<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned + Validate,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        invalid(format!("cannot read config {}: {}", path.display(), e))
    })?;
    let config: T = serde_json::from_str(&content)
        .map_err(|e| invalid(format!("malformed config {}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

/// Load a section when a path is given, otherwise use the validated default
pub fn load_or_default<T, P>(path: Option<P>) -> Result<T>
where
    T: DeserializeOwned + Validate + Default,
    P: AsRef<Path>,
{
    match path {
        Some(path) => load_config(path),
        None => {
            let config = T::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Save configuration to JSON file
pub fn save_config<T: Serialize, P: AsRef<Path>>(config: &T, path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ExperimentConfig::default().validate().unwrap();
    }

    #[test]
    fn non_positive_frame_sizes_are_rejected() {
        let config = MelSpecConfig {
            hop_size: 0,
            ..MelSpecConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SkmError::ConfigValidationFailed(_))
        ));
    }

    #[test]
    fn freq_max_falls_back_to_nyquist() {
        let config = MelSpecConfig {
            sample_rate: 22050,
            freq_max: -1.0,
            ..MelSpecConfig::default()
        };
        assert_eq!(config.effective_freq_max(), 11025.0);
    }

    #[test]
    fn spec_config_is_tagged() {
        let json = r#"{"kind": "stft", "n_fft": 512, "window_size": 400}"#;
        let config: SpecConfig = serde_json::from_str(json).unwrap();
        match config {
            SpecConfig::Stft(c) => {
                assert_eq!(c.n_fft, 512);
                assert_eq!(c.window_size, 400);
                assert_eq!(c.hop_size, 512);
            }
            SpecConfig::Mel(_) => panic!("expected stft"),
        }
    }

    #[test]
    fn gamma_accepts_name_or_value() {
        let named: SvcConfig = serde_json::from_str(r#"{"gamma": "auto"}"#).unwrap();
        assert_eq!(named.gamma, Gamma::Named(GammaHeuristic::Auto));
        let value: SvcConfig = serde_json::from_str(r#"{"gamma": 0.5, "C": 10.0}"#).unwrap();
        assert_eq!(value.gamma, Gamma::Value(0.5));
        assert_eq!(value.c, 10.0);
    }

    #[test]
    fn load_config_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(&path, "{ not json").unwrap();
        let result: Result<PoolConfig> = load_config(&path);
        assert!(matches!(result, Err(SkmError::ConfigValidationFailed(_))));
    }

    #[test]
    fn only_wav_extensions_are_accepted() {
        let mut config = DatasetConfig {
            extensions: vec!["WAV".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.extensions.push("flac".to_string());
        assert!(matches!(
            config.validate(),
            Err(SkmError::ConfigValidationFailed(_))
        ));
    }

    #[test]
    fn saved_experiment_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        let mut experiment = ExperimentConfig::default();
        experiment.pool.pool_size = 4;
        save_config(&experiment, &path).unwrap();

        let loaded: ExperimentConfig = load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.pool.pool_size, 4);
        let fallback: PoolConfig = load_or_default(None::<&Path>).unwrap();
        assert_eq!(fallback.pool_size, PoolConfig::default().pool_size);
    }
}
