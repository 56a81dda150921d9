//! Embedding dimension, preprocessing, and post-solve shaping.

use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, EmbedResult};
use crate::preprocess::Preprocessing;

/// Configuration for the stages around the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Embedding dimension (number of eigenvectors kept).
    #[serde(default = "default_dim")]
    pub dim: usize,

    /// Transform applied to the raw cooccurrence counts.
    #[serde(default)]
    pub preprocessing: Preprocessing,

    /// Drop entries that PPMI clamps to zero.
    #[serde(default)]
    pub prune_zeros: bool,

    /// Column `i` is multiplied by `lambda_i ^ scale`.
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Rescale each word vector to unit norm after scaling.
    #[serde(default = "default_normalize")]
    pub normalize: bool,

    /// Seed for the random initial embedding.
    #[serde(default)]
    pub seed: u64,
}

fn default_dim() -> usize {
    50
}

fn default_scale() -> f64 {
    0.5
}

fn default_normalize() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dim: default_dim(),
            preprocessing: Preprocessing::default(),
            prune_zeros: false,
            scale: default_scale(),
            normalize: default_normalize(),
            seed: 0,
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// - `EmbedError::InvalidConfiguration` if dim is 0
    /// - `EmbedError::InvalidConfiguration` if scale is not finite
    pub fn validate(&self) -> EmbedResult<()> {
        if self.dim == 0 {
            return Err(EmbedError::invalid_parameter("dim", self.dim, "must be > 0"));
        }
        if !self.scale.is_finite() {
            return Err(EmbedError::invalid_parameter("scale", self.scale, "must be finite"));
        }
        Ok(())
    }
}
