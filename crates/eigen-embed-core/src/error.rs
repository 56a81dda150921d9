//! Error types for the eigen-embed solver core.
//!
//! Only fatal conditions are errors. Numerically unstable orthogonalization and
//! a missing accelerator are recovered where they happen and reported through
//! `tracing::warn!`.

use std::fmt;
use std::path::{Path, PathBuf};

use candle_core::DType;
use thiserror::Error;

/// Errors raised while loading, preprocessing, or solving.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// A configuration value cannot be used. Raised before any I/O or product.
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The sparse matrix holds values that are neither f32 nor f64.
    #[error("Unsupported matrix value type {dtype:?}: expected F32 or F64")]
    UnsupportedDType { dtype: DType },

    /// Operand shapes do not line up.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Reading or writing a file failed.
    #[error("IO error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file was readable but its contents are not in the expected format.
    #[error("Malformed file '{}': {message}", path.display())]
    MalformedFile { path: PathBuf, message: String },

    /// The numeric backend rejected an operation.
    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl EmbedError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error for a single named parameter.
    pub fn invalid_parameter(
        parameter: &str,
        value: impl fmt::Display,
        requirement: &str,
    ) -> Self {
        Self::InvalidConfiguration {
            message: format!("{} = {}: {}", parameter, value, requirement),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a malformed file error.
    pub fn malformed(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::MalformedFile {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// True for errors that reject the configuration before any work starts.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. } | Self::UnsupportedDType { .. }
        )
    }
}

/// Result type for eigen-embed operations.
pub type EmbedResult<T> = Result<T, EmbedError>;
