//! Spherical k-means audio classification
//!
//! Audio files are turned into spectrograms, cut into fixed-width slices
//! and projected on per-class spherical k-means codebooks. Projections are
//! mean/std pooled into file descriptors, reduced with PCA and classified
//! with a support vector machine. A bias-variance sweep repeats the whole
//! procedure over validation folds.

pub mod audio;
pub mod bias_variance;
pub mod classifier;
pub mod collate;
pub mod config;
pub mod dataset;
pub mod elbow;
pub mod error;
pub mod loader;
pub mod numeric;
pub mod pca;
pub mod pool;
pub mod report;
pub mod reshape;
pub mod skm;
pub mod spectral;
pub mod stages;
pub mod svm;

pub use bias_variance::{run_sweep, FoldPhase, FoldResults, SweepMode, SweepOptions};
pub use classifier::{infer_single, InferenceConfig, InferenceResult, PcaSvcPipeline};
pub use config::{ExperimentConfig, Validate};
pub use dataset::{discover_metadata, Dataset, FoldGenerator};
pub use elbow::{ElbowSearch, KRange};
pub use error::{Result, SkmError};
pub use skm::{ClassCodebook, Codebook};
