//! Capability view of product operands.
//!
//! The batched product never inspects concrete storage types. It asks an
//! operand whether it is sparse, whether it already sits in fast memory, and
//! how many bytes it occupies.

use candle_core::{Device, Tensor};

use crate::device::is_accelerated;
use crate::error::{EmbedError, EmbedResult};
use crate::sparse::SparseMatrix;

/// Storage class of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    HostSparse,
    HostDense,
    AcceleratedSparse,
    AcceleratedDense,
}

/// What the batching logic needs to know about a matrix operand.
pub trait Operand {
    /// Sparse operands are split by stored entries, dense ones by columns.
    fn is_sparse(&self) -> bool;

    /// Device the operand's data lives on.
    fn device(&self) -> &Device;

    /// Bytes the operand would occupy if staged whole.
    fn footprint_bytes(&self) -> usize;

    /// `self * dense`, on `dense`'s device.
    fn multiply(&self, dense: &Tensor) -> EmbedResult<Tensor>;

    /// Whether the operand already resides in fast memory.
    fn is_accelerated(&self) -> bool {
        is_accelerated(self.device())
    }

    fn kind(&self) -> OperandKind {
        match (self.is_sparse(), self.is_accelerated()) {
            (true, false) => OperandKind::HostSparse,
            (false, false) => OperandKind::HostDense,
            (true, true) => OperandKind::AcceleratedSparse,
            (false, true) => OperandKind::AcceleratedDense,
        }
    }
}

impl Operand for SparseMatrix {
    fn is_sparse(&self) -> bool {
        true
    }

    fn device(&self) -> &Device {
        SparseMatrix::device(self)
    }

    fn footprint_bytes(&self) -> usize {
        self.nnz() * self.entry_bytes()
    }

    fn multiply(&self, dense: &Tensor) -> EmbedResult<Tensor> {
        self.matmul(dense)
    }
}

impl Operand for Tensor {
    fn is_sparse(&self) -> bool {
        false
    }

    fn device(&self) -> &Device {
        Tensor::device(self)
    }

    fn footprint_bytes(&self) -> usize {
        self.elem_count() * self.dtype().size_in_bytes()
    }

    fn multiply(&self, dense: &Tensor) -> EmbedResult<Tensor> {
        let (_, inner) = self.dims2()?;
        let (rows, _) = dense.dims2()?;
        if inner != rows {
            return Err(EmbedError::dimension_mismatch(inner, rows));
        }
        let lhs = self.to_device(dense.device())?.to_dtype(dense.dtype())?;
        Ok(lhs.matmul(dense)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_kinds_on_host() {
        let sparse = SparseMatrix::from_triplets(2, vec![(0, 1, 1.0)]).unwrap();
        let dense = Tensor::ones((2, 3), DType::F64, &Device::Cpu).unwrap();
        assert_eq!(sparse.kind(), OperandKind::HostSparse);
        assert_eq!(dense.kind(), OperandKind::HostDense);
        assert_eq!(sparse.footprint_bytes(), 16);
        assert_eq!(dense.footprint_bytes(), 48);
    }

    #[test]
    fn test_sparse_and_dense_multiply_agree() {
        let sparse =
            SparseMatrix::from_triplets(2, vec![(0, 0, 2.0), (0, 1, 1.0), (1, 1, 3.0)]).unwrap();
        let dense = sparse.to_dense().unwrap();
        let x = Tensor::new(&[[1.0f64, 0.5], [2.0, -1.0]], &Device::Cpu).unwrap();
        let a = Operand::multiply(&sparse, &x).unwrap().to_vec2::<f64>().unwrap();
        let b = Operand::multiply(&dense, &x).unwrap().to_vec2::<f64>().unwrap();
        assert_eq!(a, b);
    }
}
