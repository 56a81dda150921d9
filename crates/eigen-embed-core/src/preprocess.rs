//! Value transforms applied to the cooccurrence matrix before solving.
//!
//! Every transform keeps the sparsity structure (unless pruning is asked for)
//! and returns a new matrix. The input is never modified, so the same raw
//! counts can be preprocessed again with another mode.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use candle_core::DType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EmbedError, EmbedResult};
use crate::sparse::SparseMatrix;

/// Transform applied to raw cooccurrence counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preprocessing {
    /// Raw counts.
    None,
    /// `ln(1 + v)` for every stored value.
    Log1p,
    /// Positive pointwise mutual information.
    #[default]
    Ppmi,
}

impl Preprocessing {
    pub fn all() -> &'static [Preprocessing] {
        &[Preprocessing::None, Preprocessing::Log1p, Preprocessing::Ppmi]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Preprocessing::None => "none",
            Preprocessing::Log1p => "log1p",
            Preprocessing::Ppmi => "ppmi",
        }
    }
}

impl fmt::Display for Preprocessing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preprocessing {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Preprocessing::None),
            "log1p" => Ok(Preprocessing::Log1p),
            "ppmi" => Ok(Preprocessing::Ppmi),
            other => Err(EmbedError::invalid_configuration(format!(
                "unknown preprocessing '{}'. Valid names: {:?}",
                other,
                Preprocessing::all()
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
            ))),
        }
    }
}

/// Apply `mode` to `matrix`, returning a new matrix on the same device.
///
/// # Errors
/// - `UnsupportedDType` if values are not f32/f64 (for `log1p` and `ppmi`)
pub fn preprocess(matrix: &SparseMatrix, mode: Preprocessing) -> EmbedResult<SparseMatrix> {
    let begin = Instant::now();
    let out = match mode {
        Preprocessing::None => matrix.clone(),
        Preprocessing::Log1p => log1p(matrix)?,
        Preprocessing::Ppmi => ppmi(matrix)?,
    };
    info!(
        mode = %mode,
        nnz = out.nnz(),
        elapsed_ms = begin.elapsed().as_millis() as u64,
        "Preprocessing took"
    );
    Ok(out)
}

fn log1p(matrix: &SparseMatrix) -> EmbedResult<SparseMatrix> {
    matrix.ensure_supported_dtype()?;
    let values = matrix.values().affine(1.0, 1.0)?.log()?;
    matrix.with_values(values)
}

/// `max(0, ln v + ln D - ln wc[i] - ln wc[j])` with `wc` the row sums and
/// `D` their total.
fn ppmi(matrix: &SparseMatrix) -> EmbedResult<SparseMatrix> {
    matrix.ensure_supported_dtype()?;
    if matrix.nnz() == 0 {
        return Ok(matrix.clone());
    }
    let wc = matrix.row_sums()?;
    let total = wc.to_dtype(DType::F64)?.sum_all()?.to_scalar::<f64>()?;
    debug!(total, "Total cooccurrence mass");

    let wc0 = wc.index_select(matrix.rows(), 0)?;
    let wc1 = wc.index_select(matrix.cols(), 0)?;
    let values = matrix
        .values()
        .log()?
        .sub(&wc0.log()?)?
        .sub(&wc1.log()?)?
        .affine(1.0, total.ln())?
        .relu()?;
    matrix.with_values(values)
}

/// [`preprocess`], then drop stored entries that ended up exactly zero.
pub fn preprocess_pruned(
    matrix: &SparseMatrix,
    mode: Preprocessing,
) -> EmbedResult<SparseMatrix> {
    let out = preprocess(matrix, mode)?;
    let before = out.nnz();
    let pruned = out.prune_zeros()?;
    debug!(before, after = pruned.nnz(), "Pruned zero entries");
    Ok(pruned)
}
