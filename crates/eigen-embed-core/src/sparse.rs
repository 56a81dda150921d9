//! Coordinate-format sparse matrix backed by candle tensors.
//!
//! Entries live in three rank-1 tensors on one device: row indices (`U32`),
//! column indices (`U32`) and values (`F32` or `F64`). Matrices built through
//! [`SparseMatrix::from_triplets`] are coalesced and sorted by (row, column),
//! so any contiguous range of entries covers a contiguous range of rows.
//!
//! Every transform returns a new matrix. Tensors are reference counted, so
//! cloning a matrix or re-wrapping its index tensors does not copy data.

use candle_core::{DType, Device, Tensor};

use crate::error::{EmbedError, EmbedResult};

/// Bytes used by the two `u32` index fields of one stored entry.
pub const INDEX_BYTES_PER_ENTRY: usize = 2 * 4;

/// Largest matrix order whose indices fit in `u32`.
pub const MAX_ORDER: u64 = u32::MAX as u64 + 1;

/// Square sparse matrix in coordinate format.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    n: usize,
    rows: Tensor,
    cols: Tensor,
    values: Tensor,
}

impl SparseMatrix {
    /// Build an `n x n` matrix on the host from `(row, column, value)` triples.
    ///
    /// Duplicate coordinates are summed and the result is sorted by
    /// (row, column). Values are stored as f64.
    ///
    /// # Errors
    /// - `InvalidConfiguration` if n exceeds the `u32` index range
    /// - `DimensionMismatch` if an index is >= n
    pub fn from_triplets<I>(n: usize, triplets: I) -> EmbedResult<Self>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        if n as u64 > MAX_ORDER {
            return Err(EmbedError::invalid_configuration(format!(
                "matrix order {} exceeds the {} rows u32 indices can address",
                n, MAX_ORDER
            )));
        }
        let mut entries: Vec<(u32, u32, f64)> = Vec::new();
        for (row, col, value) in triplets {
            let max = row.max(col);
            if max >= n {
                return Err(EmbedError::dimension_mismatch(n, max + 1));
            }
            entries.push((row as u32, col as u32, value));
        }
        let (rows, cols, values) = coalesce(entries);
        let nnz = values.len();

        let device = Device::Cpu;
        Ok(Self {
            n,
            rows: Tensor::from_vec(rows, nnz, &device)?,
            cols: Tensor::from_vec(cols, nnz, &device)?,
            values: Tensor::from_vec(values, nnz, &device)?,
        })
    }

    /// Wrap existing index and value tensors without sorting or coalescing.
    ///
    /// The value dtype is not checked here; products reject anything other
    /// than f32 and f64.
    ///
    /// # Errors
    /// - `DimensionMismatch` if the three tensors differ in length
    /// - `InvalidConfiguration` if indices are not `U32`, a tensor is not
    ///   rank 1, or the tensors live on different devices
    pub fn from_parts(n: usize, rows: Tensor, cols: Tensor, values: Tensor) -> EmbedResult<Self> {
        let nnz = values.dims1().map_err(|_| {
            EmbedError::invalid_configuration("sparse values must be a rank-1 tensor")
        })?;
        for (name, t) in [("row", &rows), ("column", &cols)] {
            let len = t.dims1().map_err(|_| {
                EmbedError::invalid_configuration(format!("sparse {} indices must be rank 1", name))
            })?;
            if len != nnz {
                return Err(EmbedError::dimension_mismatch(nnz, len));
            }
            if t.dtype() != DType::U32 {
                return Err(EmbedError::invalid_configuration(format!(
                    "sparse {} indices must be U32, got {:?}",
                    name,
                    t.dtype()
                )));
            }
            if !t.device().same_device(values.device()) {
                return Err(EmbedError::invalid_configuration(
                    "sparse indices and values must share a device",
                ));
            }
        }
        Ok(Self {
            n,
            rows,
            cols,
            values,
        })
    }

    /// Matrix order (rows == columns).
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }

    pub fn device(&self) -> &Device {
        self.values.device()
    }

    pub fn rows(&self) -> &Tensor {
        &self.rows
    }

    pub fn cols(&self) -> &Tensor {
        &self.cols
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    /// Fail with `UnsupportedDType` unless values are f32 or f64.
    pub fn ensure_supported_dtype(&self) -> EmbedResult<()> {
        match self.dtype() {
            DType::F32 | DType::F64 => Ok(()),
            dtype => Err(EmbedError::UnsupportedDType { dtype }),
        }
    }

    /// Bytes one stored entry occupies: two indices plus one value.
    pub fn entry_bytes(&self) -> usize {
        INDEX_BYTES_PER_ENTRY + self.dtype().size_in_bytes()
    }

    /// Same sparsity structure with new values.
    ///
    /// # Errors
    /// - `DimensionMismatch` if `values` has a different length
    pub fn with_values(&self, values: Tensor) -> EmbedResult<Self> {
        Self::from_parts(self.n, self.rows.clone(), self.cols.clone(), values)
    }

    /// Entries `[start, start + len)` as a matrix of the same order.
    pub fn narrow(&self, start: usize, len: usize) -> EmbedResult<Self> {
        Ok(Self {
            n: self.n,
            rows: self.rows.narrow(0, start, len)?,
            cols: self.cols.narrow(0, start, len)?,
            values: self.values.narrow(0, start, len)?,
        })
    }

    /// Entries at the given positions (a `U32` or `I64` index tensor on this
    /// device). Positions may repeat.
    pub fn select(&self, positions: &Tensor) -> EmbedResult<Self> {
        Ok(Self {
            n: self.n,
            rows: self.rows.index_select(positions, 0)?,
            cols: self.cols.index_select(positions, 0)?,
            values: self.values.index_select(positions, 0)?,
        })
    }

    /// Entries at the given positions. Positions may repeat and may exceed
    /// the `u32` range.
    pub fn select_positions(&self, positions: &[usize]) -> EmbedResult<Self> {
        self.select(&position_tensor(positions, self.device())?)
    }

    /// Copy all three tensors to `device`. No-op when already there.
    pub fn to_device(&self, device: &Device) -> EmbedResult<Self> {
        if self.device().same_device(device) {
            return Ok(self.clone());
        }
        Ok(Self {
            n: self.n,
            rows: self.rows.to_device(device)?,
            cols: self.cols.to_device(device)?,
            values: self.values.to_device(device)?,
        })
    }

    /// `self * x` for a dense `n x k` tensor, computed on `x`'s device.
    ///
    /// The matrix is copied to `x`'s device first when they differ. The result
    /// has `x`'s dtype.
    ///
    /// # Errors
    /// - `UnsupportedDType` if values are not f32/f64
    /// - `DimensionMismatch` if `x` does not have n rows
    pub fn matmul(&self, x: &Tensor) -> EmbedResult<Tensor> {
        self.ensure_supported_dtype()?;
        let (rows, _) = x.dims2()?;
        if rows != self.n {
            return Err(EmbedError::dimension_mismatch(self.n, rows));
        }
        let local = self.to_device(x.device())?;
        Ok(spmm(&local.rows, &local.cols, &local.values, self.n, x)?)
    }

    /// Sum of each row: a length-n tensor with the value dtype.
    pub fn row_sums(&self) -> EmbedResult<Tensor> {
        let zeros = Tensor::zeros(self.n, self.dtype(), self.device())?;
        if self.nnz() == 0 {
            return Ok(zeros);
        }
        Ok(zeros.index_add(&self.rows, &self.values, 0)?)
    }

    /// True when entries are sorted by (row, column) with no duplicates.
    pub fn is_sorted(&self) -> EmbedResult<bool> {
        let rows = self.rows.to_vec1::<u32>()?;
        let cols = self.cols.to_vec1::<u32>()?;
        Ok(rows
            .windows(2)
            .zip(cols.windows(2))
            .all(|(r, c)| (r[0], c[0]) < (r[1], c[1])))
    }

    /// Copy entries to host memory as `(row, column, value)` triples.
    pub fn to_triplets(&self) -> EmbedResult<Vec<(u32, u32, f64)>> {
        let rows = self.rows.to_vec1::<u32>()?;
        let cols = self.cols.to_vec1::<u32>()?;
        let values = self.values.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        Ok(rows
            .into_iter()
            .zip(cols)
            .zip(values)
            .map(|((r, c), v)| (r, c, v))
            .collect())
    }

    /// Drop entries whose value is exactly zero. Keeps device and dtype.
    pub fn prune_zeros(&self) -> EmbedResult<Self> {
        let values = self.values.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        let keep: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(i, _)| i)
            .collect();
        if keep.len() == values.len() {
            return Ok(self.clone());
        }
        self.select_positions(&keep)
    }

    /// Dense `n x n` copy, for tests and tiny matrices.
    pub fn to_dense(&self) -> EmbedResult<Tensor> {
        let mut identity = vec![0f64; self.n * self.n];
        for i in 0..self.n {
            identity[i * self.n + i] = 1.0;
        }
        let identity = Tensor::from_vec(identity, (self.n, self.n), self.device())?;
        self.matmul(&identity)
    }
}

/// `I64` index tensor of entry positions.
pub(crate) fn position_tensor(positions: &[usize], device: &Device) -> EmbedResult<Tensor> {
    let ids: Vec<i64> = positions.iter().map(|&p| p as i64).collect();
    Ok(Tensor::from_vec(ids, positions.len(), device)?)
}

/// Sort by (row, column) and sum duplicate coordinates.
fn coalesce(mut entries: Vec<(u32, u32, f64)>) -> (Vec<u32>, Vec<u32>, Vec<f64>) {
    entries.sort_unstable_by_key(|&(r, c, _)| (r, c));

    let mut rows = Vec::with_capacity(entries.len());
    let mut cols = Vec::with_capacity(entries.len());
    let mut values: Vec<f64> = Vec::with_capacity(entries.len());
    for (r, c, v) in entries {
        let last = rows.len().checked_sub(1);
        match last {
            Some(i) if rows[i] == r && cols[i] == c => values[i] += v,
            _ => {
                rows.push(r);
                cols.push(c);
                values.push(v);
            }
        }
    }
    (rows, cols, values)
}

/// Sparse-dense product kernel: gather rows of `x` by column index, weight
/// them by value, scatter-add into the output by row index.
///
/// All tensors must share `x`'s device.
pub(crate) fn spmm(
    rows: &Tensor,
    cols: &Tensor,
    values: &Tensor,
    n: usize,
    x: &Tensor,
) -> candle_core::Result<Tensor> {
    let (_, k) = x.dims2()?;
    let out = Tensor::zeros((n, k), x.dtype(), x.device())?;
    if values.elem_count() == 0 {
        return Ok(out);
    }
    let gathered = x.contiguous()?.index_select(cols, 0)?;
    let weights = values.to_dtype(x.dtype())?.unsqueeze(1)?;
    let contributions = gathered.broadcast_mul(&weights)?;
    out.index_add(rows, &contributions, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SparseMatrix {
        // [[0, 2, 0],
        //  [1, 0, 3],
        //  [0, 0, 4]]
        SparseMatrix::from_triplets(3, vec![(1, 2, 3.0), (0, 1, 2.0), (2, 2, 4.0), (1, 0, 1.0)])
            .unwrap()
    }

    #[test]
    fn test_from_triplets_sorts_and_coalesces() {
        let m = SparseMatrix::from_triplets(
            3,
            vec![(2, 0, 1.0), (0, 1, 1.5), (2, 0, 2.0), (0, 0, 1.0), (0, 1, 0.5)],
        )
        .unwrap();
        assert_eq!(m.nnz(), 3);
        assert!(m.is_sorted().unwrap());
        assert_eq!(
            m.to_triplets().unwrap(),
            vec![(0, 0, 1.0), (0, 1, 2.0), (2, 0, 3.0)]
        );
    }

    #[test]
    fn test_from_triplets_rejects_out_of_range() {
        let err = SparseMatrix::from_triplets(2, vec![(0, 2, 1.0)]).unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_matmul_matches_dense() {
        let m = small();
        let x = Tensor::from_vec(vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], (3, 2), &Device::Cpu)
            .unwrap();
        let y = m.matmul(&x).unwrap().to_vec2::<f64>().unwrap();
        assert_eq!(y, vec![vec![6.0, 8.0], vec![16.0, 20.0], vec![20.0, 24.0]]);
    }

    #[test]
    fn test_matmul_empty_matrix_is_zero() {
        let m = SparseMatrix::from_triplets(2, Vec::new()).unwrap();
        let x = Tensor::ones((2, 3), DType::F64, &Device::Cpu).unwrap();
        let y = m.matmul(&x).unwrap();
        assert_eq!(y.sum_all().unwrap().to_scalar::<f64>().unwrap(), 0.0);
    }

    #[test]
    fn test_matmul_rejects_wrong_rows() {
        let m = small();
        let x = Tensor::ones((4, 1), DType::F64, &Device::Cpu).unwrap();
        assert!(matches!(
            m.matmul(&x),
            Err(EmbedError::DimensionMismatch { expected: 3, actual: 4 })
        ));
    }

    #[test]
    fn test_unsupported_dtype() {
        let m = small();
        let half = m.with_values(m.values().to_dtype(DType::F16).unwrap()).unwrap();
        let x = Tensor::ones((3, 1), DType::F64, &Device::Cpu).unwrap();
        assert!(matches!(
            half.matmul(&x),
            Err(EmbedError::UnsupportedDType { dtype: DType::F16 })
        ));
    }

    #[test]
    fn test_f32_values_follow_dense_dtype() {
        let m = small();
        let single = m.with_values(m.values().to_dtype(DType::F32).unwrap()).unwrap();
        assert_eq!(single.entry_bytes(), 12);
        assert_eq!(m.entry_bytes(), 16);
        let x = Tensor::ones((3, 1), DType::F64, &Device::Cpu).unwrap();
        let y = single.matmul(&x).unwrap();
        assert_eq!(y.dtype(), DType::F64);
        assert_eq!(y.to_vec2::<f64>().unwrap(), vec![vec![2.0], vec![4.0], vec![4.0]]);
    }

    #[test]
    fn test_row_sums() {
        let sums = small().row_sums().unwrap().to_vec1::<f64>().unwrap();
        assert_eq!(sums, vec![2.0, 4.0, 4.0]);
    }

    #[test]
    fn test_narrow_and_select() {
        let m = small();
        let head = m.narrow(0, 2).unwrap();
        assert_eq!(head.nnz(), 2);
        assert_eq!(head.n(), 3);

        let positions = Tensor::new(&[3u32, 3, 0], &Device::Cpu).unwrap();
        let picked = m.select(&positions).unwrap();
        assert_eq!(
            picked.to_triplets().unwrap(),
            vec![(2, 2, 4.0), (2, 2, 4.0), (0, 1, 2.0)]
        );
        assert!(!picked.is_sorted().unwrap());
    }

    #[test]
    fn test_select_positions_beyond_u32_range() {
        let big = u32::MAX as usize + 5;
        let ids = position_tensor(&[0, big], &Device::Cpu).unwrap();
        assert_eq!(ids.dtype(), DType::I64);
        assert_eq!(ids.to_vec1::<i64>().unwrap(), vec![0, big as i64]);

        let picked = small().select_positions(&[3, 1, 1]).unwrap();
        assert_eq!(
            picked.to_triplets().unwrap(),
            vec![(2, 2, 4.0), (1, 0, 1.0), (1, 0, 1.0)]
        );
    }

    #[test]
    fn test_order_beyond_u32_indices_rejected() {
        let n = (MAX_ORDER + 1) as usize;
        let err = SparseMatrix::from_triplets(n, Vec::new()).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(SparseMatrix::from_triplets(3, Vec::new()).is_ok());
    }

    #[test]
    fn test_prune_zeros() {
        let m = SparseMatrix::from_triplets(2, vec![(0, 0, 0.0), (0, 1, 1.0), (1, 0, 0.0)])
            .unwrap();
        let pruned = m.prune_zeros().unwrap();
        assert_eq!(pruned.to_triplets().unwrap(), vec![(0, 1, 1.0)]);
    }

    #[test]
    fn test_from_parts_validates() {
        let dev = Device::Cpu;
        let rows = Tensor::new(&[0u32, 1], &dev).unwrap();
        let cols = Tensor::new(&[1u32], &dev).unwrap();
        let values = Tensor::new(&[1.0f64, 2.0], &dev).unwrap();
        assert!(SparseMatrix::from_parts(2, rows.clone(), cols, values.clone()).is_err());

        let float_cols = Tensor::new(&[1.0f32, 0.0], &dev).unwrap();
        assert!(SparseMatrix::from_parts(2, rows, float_cols, values).is_err());
    }

    #[test]
    fn test_to_dense() {
        let dense = small().to_dense().unwrap().to_vec2::<f64>().unwrap();
        assert_eq!(
            dense,
            vec![
                vec![0.0, 2.0, 0.0],
                vec![1.0, 0.0, 3.0],
                vec![0.0, 0.0, 4.0]
            ]
        );
    }
}
