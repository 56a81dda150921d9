//! Root configuration for the embedding pipeline.
//!
//! `EmbedConfig` aggregates the per-stage sections. Every field has the
//! default listed below, so an empty TOML document is a valid configuration.
//!
//! # TOML Structure
//!
//! ```toml
//! [input]
//! vocab = "vocab.txt"
//! cooccurrence = "cooccurrence.shuf.bin"
//! vectors = "vectors.txt"
//!
//! [pipeline]
//! dim = 50
//! preprocessing = "ppmi"
//! prune_zeros = false
//! scale = 0.5
//! normalize = true
//! seed = 0
//!
//! [solver]
//! mode = "power-iteration"
//! iterations = 50
//! eta = 0.001
//! momentum = 0.0
//! norm_freq = 1
//! batch = 100000
//! inner_loop = 10
//! seed = 0
//!
//! [gpu]
//! enabled = true
//! device_id = 0
//! memory_budget = 1073741824
//! ```

mod gpu;
mod input;
mod pipeline;
mod solver;

pub use gpu::{GpuConfig, DEFAULT_MEMORY_BUDGET};
pub use input::InputConfig;
pub use pipeline::PipelineConfig;
pub use solver::{SolverConfig, SolverMode};

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, EmbedResult};

// ============================================================================
// ROOT CONFIG
// ============================================================================

/// Root configuration for computing an embedding.
///
/// # Example
///
/// ```
/// use eigen_embed_core::EmbedConfig;
///
/// let config = EmbedConfig::default();
/// config.validate().expect("defaults are valid");
/// assert_eq!(config.pipeline.dim, 50);
/// assert_eq!(config.solver.iterations, 50);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// File locations
    #[serde(default)]
    pub input: InputConfig,

    /// Dimension, preprocessing, scaling, normalization
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Eigensolver selection and parameters
    #[serde(default)]
    pub solver: SolverConfig,

    /// Accelerator placement and memory budget
    #[serde(default)]
    pub gpu: GpuConfig,
}

impl EmbedConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// - `EmbedError::Io` if the file cannot be read
    /// - `EmbedError::InvalidConfiguration` if TOML parsing fails
    pub fn from_file(path: impl AsRef<Path>) -> EmbedResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| EmbedError::io(path, e))?;
        toml::from_str(&contents).map_err(|e| {
            EmbedError::invalid_configuration(format!(
                "failed to parse TOML in '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// - `EmbedError::InvalidConfiguration` if TOML parsing fails
    pub fn from_toml_str(toml: &str) -> EmbedResult<Self> {
        toml::from_str(toml).map_err(|e| {
            EmbedError::invalid_configuration(format!("failed to parse TOML: {}", e))
        })
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    /// - `EmbedError::InvalidConfiguration` if serialization fails
    pub fn to_toml_string(&self) -> EmbedResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            EmbedError::invalid_configuration(format!("failed to serialize to TOML: {}", e))
        })
    }

    /// Validate every section, returning the first error found.
    ///
    /// The message is prefixed with the failing section, e.g. `[solver]`.
    pub fn validate(&self) -> EmbedResult<()> {
        fn section(name: &str, result: EmbedResult<()>) -> EmbedResult<()> {
            result.map_err(|e| EmbedError::invalid_configuration(format!("[{}] {}", name, e)))
        }

        section("input", self.input.validate())?;
        section("pipeline", self.pipeline.validate())?;
        section("solver", self.solver.validate())?;
        section("gpu", self.gpu.validate())?;
        Ok(())
    }

    /// Apply environment variable overrides. Prefix: `EIGEN_EMBED_`
    ///
    /// | Variable | Config Path |
    /// |----------|-------------|
    /// | `EIGEN_EMBED_VOCAB` | `input.vocab` |
    /// | `EIGEN_EMBED_COOCCURRENCE` | `input.cooccurrence` |
    /// | `EIGEN_EMBED_VECTORS` | `input.vectors` |
    /// | `EIGEN_EMBED_DIM` | `pipeline.dim` |
    /// | `EIGEN_EMBED_SOLVER` | `solver.mode` |
    /// | `EIGEN_EMBED_ITERATIONS` | `solver.iterations` |
    /// | `EIGEN_EMBED_GPU_ENABLED` | `gpu.enabled` |
    /// | `EIGEN_EMBED_MEMORY_BUDGET` | `gpu.memory_budget` |
    ///
    /// Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = env::var("EIGEN_EMBED_VOCAB") {
            self.input.vocab = PathBuf::from(val);
        }
        if let Ok(val) = env::var("EIGEN_EMBED_COOCCURRENCE") {
            self.input.cooccurrence = PathBuf::from(val);
        }
        if let Ok(val) = env::var("EIGEN_EMBED_VECTORS") {
            self.input.vectors = PathBuf::from(val);
        }
        if let Ok(val) = env::var("EIGEN_EMBED_DIM") {
            if let Ok(n) = val.parse::<usize>() {
                self.pipeline.dim = n;
            }
        }
        if let Ok(val) = env::var("EIGEN_EMBED_SOLVER") {
            if let Ok(mode) = val.parse::<SolverMode>() {
                self.solver.mode = mode;
            }
        }
        if let Ok(val) = env::var("EIGEN_EMBED_ITERATIONS") {
            if let Ok(n) = val.parse::<usize>() {
                self.solver.iterations = n;
            }
        }
        if let Ok(val) = env::var("EIGEN_EMBED_GPU_ENABLED") {
            if let Ok(b) = val.parse::<bool>() {
                self.gpu.enabled = b;
            }
        }
        if let Ok(val) = env::var("EIGEN_EMBED_MEMORY_BUDGET") {
            if let Ok(n) = val.parse::<usize>() {
                self.gpu.memory_budget = n;
            }
        }
        self
    }
}
