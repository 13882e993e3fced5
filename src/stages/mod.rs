//! Collate stages

pub mod augment;
pub mod pool;
pub mod projection;
pub mod slice;
pub mod spectrogram;

pub use augment::WhiteNoiseStage;
pub use pool::PoolStage;
pub use projection::SkmProjectionStage;
pub use slice::SliceFlattenStage;
pub use spectrogram::{MelSpectrogramStage, StftSpectrogramStage};
