//! Error types for reference building and PC scoring.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the reference builder, the score projector and the
/// dataset readers they share.
#[derive(Debug, Error)]
pub enum SigqcPcaError {
    /// The input type flag is neither `"ascii"` nor `"unit"`.
    #[error("Unsupported input type '{0}': valid options are 'ascii' and 'unit'")]
    UnsupportedInputType(String),

    /// The reference artifact is missing a sentinel, has sections out of
    /// order, or holds values that do not parse.
    #[error("Corrupt reference file at line {line}: {reason}")]
    CorruptReferenceFile {
        /// 1-based line number where the problem was detected
        line: usize,
        /// What was wrong
        reason: String,
    },

    /// The angle unit flag is neither `"d"` nor `"r"`.
    #[error("Unsupported angle units '{0}': use 'd' for degrees or 'r' for radians")]
    UnsupportedAngleUnits(String),

    /// Test dataset column count differs from the reference mean vector length.
    #[error("Feature count mismatch: reference has {expected} features, dataset has {actual}")]
    FeatureCountMismatch {
        /// Feature count of the reference artifact
        expected: usize,
        /// Feature count of the dataset being projected
        actual: usize,
    },

    /// A feature has zero variance, so the correlation matrix is undefined.
    #[error("Feature {index} has zero variance; correlation matrix is undefined")]
    DegenerateFeature {
        /// Column index of the offending feature
        index: usize,
    },

    /// The input dataset is malformed or inconsistent.
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    /// The symmetric eigensolver failed.
    #[error("Eigen decomposition failed: {0}")]
    Linalg(String),

    /// Plot or report generation failed.
    #[error("Report generation failed: {0}")]
    Report(String),

    /// File system error tied to a path.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV reader/writer error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl SigqcPcaError {
    /// Create a CorruptReferenceFile error.
    pub fn corrupt(line: usize, reason: impl Into<String>) -> Self {
        Self::CorruptReferenceFile {
            line,
            reason: reason.into(),
        }
    }

    /// Create an InvalidDataset error.
    pub fn invalid_dataset(message: impl Into<String>) -> Self {
        Self::InvalidDataset(message.into())
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, SigqcPcaError>;
