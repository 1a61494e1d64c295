//! Error types for manifest parsing and field assembly

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for sphconcat operations
#[derive(Error, Debug)]
pub enum ConcatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest syntax error at line {line}: {message}")]
    ManifestSyntax { line: usize, message: String },

    #[error("Missing manifest key: {0}")]
    ManifestKeyMissing(String),

    #[error("Invalid manifest value for {key}: {reason}")]
    ManifestValueInvalid { key: String, reason: String },

    #[error("Geometry invariant violated: {0}")]
    GeometryInvariantViolated(String),

    #[error("Subdomain reconciliation failed: {0}")]
    ReconciliationMismatch(String),

    #[error("Cannot read {path}: {source}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Truncated file: {0}")]
    FileTruncated(PathBuf),

    #[error("Unsupported format: {0}")]
    FormatUnsupported(String),

    #[error("Allocation of {0} samples failed")]
    AllocationFailure(usize),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Specialized Result type for sphconcat operations
pub type Result<T> = std::result::Result<T, ConcatError>;

impl ConcatError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConcatError::ManifestValueInvalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Classify an I/O failure on `path`: hitting end-of-file means truncation.
    pub(crate) fn from_read(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ConcatError::FileTruncated(path.to_path_buf())
        } else {
            ConcatError::FileUnreadable {
                path: path.to_path_buf(),
                source: err,
            }
        }
    }
}

impl From<serde_json::Error> for ConcatError {
    fn from(err: serde_json::Error) -> Self {
        ConcatError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ConcatError {
    fn from(err: ndarray::ShapeError) -> Self {
        ConcatError::GeometryInvariantViolated(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_eof_maps_to_truncated() {
        let err = ConcatError::from_read(
            Path::new("a.sph"),
            Error::new(ErrorKind::UnexpectedEof, "eof"),
        );
        assert!(matches!(err, ConcatError::FileTruncated(p) if p == Path::new("a.sph")));

        let err = ConcatError::from_read(
            Path::new("b.sph"),
            Error::new(ErrorKind::NotFound, "missing"),
        );
        assert!(matches!(err, ConcatError::FileUnreadable { .. }));
    }
}
