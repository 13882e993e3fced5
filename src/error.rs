//! Error types for the spherical k-means audio pipeline

use std::fmt;

/// Custom error type for feature extraction, clustering and classification
#[derive(Debug)]
pub enum SkmError {
    /// E001: Configuration validation failed (bad field, bad numeric value)
    ConfigValidationFailed(String),
    /// E002: Data has the wrong shape (zero slices, mismatched lengths)
    DataShape(String),
    /// E003: Audio file I/O error
    AudioFileError(String),
    /// E004: Invalid audio format
    InvalidAudioFormat(String),
    /// E005: Spectral processing error
    SpectralProcessingError(String),
    /// E006: Codebook fitting or projection error
    ClusteringError(String),
    /// E007: PCA / SVM training or prediction error
    ClassificationError(String),
    /// E008: Collate pipeline contract violated
    ProcessingPipelineError(String),
    /// E009: Artifact export / import error
    ExportError(String),
    /// E010: Dataset discovery or fold generation error
    DatasetError(String),
    /// E011: A fold of a sweep failed in the given phase
    FoldFailed {
        fold: usize,
        phase: String,
        source: Box<SkmError>,
    },
}

impl SkmError {
    /// Attach fold and phase context to an error raised inside a sweep
    pub fn in_fold(self, fold: usize, phase: impl Into<String>) -> Self {
        SkmError::FoldFailed {
            fold,
            phase: phase.into(),
            source: Box::new(self),
        }
    }
}

impl fmt::Display for SkmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkmError::ConfigValidationFailed(msg) => {
                write!(f, "E001: Configuration validation failed - {}", msg)
            }
            SkmError::DataShape(msg) => {
                write!(f, "E002: Data shape error - {}", msg)
            }
            SkmError::AudioFileError(msg) => {
                write!(f, "E003: Audio file I/O error - {}", msg)
            }
            SkmError::InvalidAudioFormat(msg) => {
                write!(f, "E004: Invalid audio format - {}", msg)
            }
            SkmError::SpectralProcessingError(msg) => {
                write!(f, "E005: Spectral processing error - {}", msg)
            }
            SkmError::ClusteringError(msg) => {
                write!(f, "E006: Clustering error - {}", msg)
            }
            SkmError::ClassificationError(msg) => {
                write!(f, "E007: Classification error - {}", msg)
            }
            SkmError::ProcessingPipelineError(msg) => {
                write!(f, "E008: Processing pipeline error - {}", msg)
            }
            SkmError::ExportError(msg) => {
                write!(f, "E009: Export error - {}", msg)
            }
            SkmError::DatasetError(msg) => {
                write!(f, "E010: Dataset error - {}", msg)
            }
            SkmError::FoldFailed {
                fold,
                phase,
                source,
            } => {
                write!(f, "E011: Fold {} failed during {} - {}", fold, phase, source)
            }
        }
    }
}

impl std::error::Error for SkmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SkmError::FoldFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SkmError {
    fn from(err: std::io::Error) -> Self {
        SkmError::AudioFileError(format!("File I/O error: {}", err))
    }
}

impl From<serde_json::Error> for SkmError {
    fn from(err: serde_json::Error) -> Self {
        SkmError::ExportError(format!("JSON serialization error: {}", err))
    }
}

impl From<hound::Error> for SkmError {
    fn from(err: hound::Error) -> Self {
        SkmError::AudioFileError(err.to_string())
    }
}

impl From<anyhow::Error> for SkmError {
    fn from(err: anyhow::Error) -> Self {
        SkmError::ProcessingPipelineError(format!("Generic error: {}", err))
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SkmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_context_wraps_source() {
        let err = SkmError::DataShape("no slices".to_string()).in_fold(3, "fit_codebooks");
        let text = err.to_string();
        assert!(text.starts_with("E011"));
        assert!(text.contains("Fold 3"));
        assert!(text.contains("E002"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
