//! Column orthonormalization with a normalize-only fallback.
//!
//! Columns are first reordered by descending norm so the dominant direction
//! sits in column 0. A thin QR decomposition then gives the orthonormal basis.
//! QR runs on the host in f64 through nalgebra; the result is returned on the
//! input's device and dtype.
//!
//! If QR yields non-finite values, columns are only divided by their norms.
//! That path is logged at `warn!` and is not an error. A momentum buffer is
//! carried into the new basis through `R^-1`; when R cannot be inverted only
//! the buffer falls back to the per-column division.

use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use nalgebra::DMatrix;
use tracing::{debug, warn};

use crate::error::{EmbedError, EmbedResult};

/// Smallest divisor used when a column has (near) zero norm.
const NORM_FLOOR: f64 = 1e-12;

/// Output of [`orthonormalize`].
#[derive(Debug, Clone)]
pub struct Orthonormalized {
    /// Orthonormal (or, if `degraded`, column-normalized) basis.
    pub q: Tensor,
    /// Momentum buffer expressed in the new basis.
    pub momentum: Option<Tensor>,
    /// Column norms of the input after sorting (descending).
    pub norms: Vec<f64>,
    /// True when QR failed and columns were only normalized.
    pub degraded: bool,
}

/// Orthonormalize the columns of `x` (n x dim).
///
/// When `momentum` is given it is permuted like `x`, then either multiplied by
/// `R^-1` or, if QR failed or R is singular, divided by the same column norms
/// as the fallback basis.
///
/// # Errors
/// - `InvalidConfiguration` if dim > n
/// - `DimensionMismatch` if `momentum` has a different shape than `x`
pub fn orthonormalize(x: &Tensor, momentum: Option<&Tensor>) -> EmbedResult<Orthonormalized> {
    let begin = Instant::now();
    let (n, dim) = x.dims2()?;
    if dim > n {
        return Err(EmbedError::invalid_configuration(format!(
            "embedding dimension {} exceeds matrix order {}",
            dim, n
        )));
    }
    if let Some(m) = momentum {
        let shape = m.dims2()?;
        if shape != (n, dim) {
            return Err(EmbedError::dimension_mismatch(n * dim, shape.0 * shape.1));
        }
    }

    let norms = column_norms(x)?;
    debug!(
        "{}",
        norms
            .iter()
            .map(|v| format!("{:10.2}", v))
            .collect::<Vec<_>>()
            .join(" ")
    );

    let mut order: Vec<usize> = (0..dim).collect();
    order.sort_by(|&a, &b| norms[b].total_cmp(&norms[a]));
    let sorted_norms: Vec<f64> = order.iter().map(|&i| norms[i]).collect();
    let perm: Vec<u32> = order.iter().map(|&i| i as u32).collect();
    let perm = Tensor::from_vec(perm, dim, x.device())?;

    let x = x.contiguous()?.index_select(&perm, 1)?;
    let momentum = match momentum {
        Some(m) => Some(m.contiguous()?.index_select(&perm.to_device(m.device())?, 1)?),
        None => None,
    };

    let host = to_host_matrix(&x, n, dim)?;
    let qr = host.qr();
    let q = qr.q();

    let divisor: Vec<f64> = sorted_norms.iter().map(|v| v.max(NORM_FLOOR)).collect();
    let normalize = |t: &Tensor| -> EmbedResult<Tensor> {
        let row = Tensor::from_vec(divisor.clone(), (1, dim), t.device())?.to_dtype(t.dtype())?;
        Ok(t.broadcast_div(&row)?)
    };

    let result = if !q.sum().is_finite() {
        warn!("QR decomposition resulted in NaNs. Normalizing, but not orthogonalizing");
        Orthonormalized {
            q: normalize(&x)?,
            momentum: momentum.as_ref().map(normalize).transpose()?,
            norms: sorted_norms,
            degraded: true,
        }
    } else {
        let momentum = match momentum {
            Some(m) => {
                let r_inv = qr
                    .r()
                    .solve_upper_triangular(&DMatrix::identity(dim, dim))
                    .filter(|inv| inv.iter().all(|v| v.is_finite()));
                match r_inv {
                    Some(inv) => Some(m.matmul(&from_host_matrix(&inv, m.device(), m.dtype())?)?),
                    None => {
                        warn!("R is singular. Normalizing momentum, but not changing its basis");
                        Some(normalize(&m)?)
                    }
                }
            }
            None => None,
        };
        Orthonormalized {
            q: from_host_matrix(&q, x.device(), x.dtype())?,
            momentum,
            norms: sorted_norms,
            degraded: false,
        }
    };

    debug!(
        elapsed_ms = begin.elapsed().as_millis() as u64,
        "Normalizing took"
    );
    Ok(result)
}

/// Euclidean norm of every column of a rank-2 tensor.
pub fn column_norms(x: &Tensor) -> EmbedResult<Vec<f64>> {
    Ok(x
        .sqr()?
        .sum_keepdim(0)?
        .sqrt()?
        .to_dtype(DType::F64)?
        .flatten_all()?
        .to_vec1::<f64>()?)
}

fn to_host_matrix(x: &Tensor, rows: usize, cols: usize) -> EmbedResult<DMatrix<f64>> {
    let data = x
        .to_dtype(DType::F64)?
        .to_device(&Device::Cpu)?
        .flatten_all()?
        .to_vec1::<f64>()?;
    Ok(DMatrix::from_row_slice(rows, cols, &data))
}

fn from_host_matrix(m: &DMatrix<f64>, device: &Device, dtype: DType) -> EmbedResult<Tensor> {
    // nalgebra is column-major; the transpose's storage is m in row-major order
    let row_major = m.transpose().as_slice().to_vec();
    Ok(Tensor::from_vec(row_major, (m.nrows(), m.ncols()), &Device::Cpu)?
        .to_dtype(dtype)?
        .to_device(device)?)
}
