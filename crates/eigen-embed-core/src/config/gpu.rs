//! Accelerator placement and memory budget settings.

use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, EmbedResult};

/// Default budget for staged batches in fast memory: 1 GiB.
pub const DEFAULT_MEMORY_BUDGET: usize = 1 << 30;

/// Configuration for accelerator use.
///
/// `enabled = true` on a machine without a usable accelerator is not an error:
/// the pipeline downgrades to host execution with a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuConfig {
    /// Whether to use an accelerator when one is present.
    #[serde(default = "default_gpu_enabled")]
    pub enabled: bool,

    /// CUDA ordinal to place data on.
    #[serde(default)]
    pub device_id: usize,

    /// Bytes of fast memory the batched product may stage at once.
    /// Half goes to sparse entries, half to dense columns.
    #[serde(default = "default_memory_budget")]
    pub memory_budget: usize,
}

fn default_gpu_enabled() -> bool {
    true
}

fn default_memory_budget() -> usize {
    DEFAULT_MEMORY_BUDGET
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: default_gpu_enabled(),
            device_id: 0,
            memory_budget: default_memory_budget(),
        }
    }
}

impl GpuConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// - `EmbedError::InvalidConfiguration` if memory_budget is 0
    pub fn validate(&self) -> EmbedResult<()> {
        if self.memory_budget == 0 {
            return Err(EmbedError::invalid_parameter(
                "memory_budget",
                self.memory_budget,
                "must be > 0",
            ));
        }
        Ok(())
    }
}
