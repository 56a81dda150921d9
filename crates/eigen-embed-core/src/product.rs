//! Memory-bounded sparse x dense product.
//!
//! The dense columns are split into batches that fit half the budget, then the
//! stored entries of the sparse matrix into batches sized so that one staged
//! pair, including the kernel's gather and scatter temporaries, fits the
//! whole budget. Each pair is staged on the compute device, multiplied, and
//! the partial product is added into the matching column slice of the result.
//! Staged batches are dropped after use.
//!
//! Transfers are blocking (`Tensor::to_device`), so a staged batch is always
//! complete before the kernel reads it.

use std::time::Instant;

use candle_core::{Device, Tensor};
use tracing::{debug, warn};

use crate::config::{GpuConfig, DEFAULT_MEMORY_BUDGET};
use crate::error::{EmbedError, EmbedResult};
use crate::operand::Operand;
use crate::sparse::{spmm, SparseMatrix};

// ============================================================================
// BATCH PLAN
// ============================================================================

/// Sizes of one product, as seen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductShape {
    /// Matrix order, and rows of the dense operand.
    pub n: usize,
    /// Stored sparse entries.
    pub nnz: usize,
    /// Bytes of one stored entry: two indices plus the value.
    pub entry_bytes: usize,
    /// Columns of the dense operand.
    pub dim: usize,
    /// Bytes of one dense element.
    pub elem_bytes: usize,
    /// Sparse matrix already lives on the compute device.
    pub sparse_resident: bool,
}

impl ProductShape {
    /// Compute-device bytes per dense column of a pair: the staged column,
    /// the zeroed partial output, the scatter result and the running sum.
    pub fn column_cost(&self) -> usize {
        4 * self.n * self.elem_bytes
    }

    /// Compute-device bytes per sparse entry of a pair with `columns` dense
    /// columns: the staged entry, its weight in the dense dtype, and its
    /// gathered and weighted rows.
    pub fn entry_cost(&self, columns: usize) -> usize {
        let staged = if self.sparse_resident { 0 } else { self.entry_bytes };
        staged + self.elem_bytes + 2 * columns * self.elem_bytes
    }

    /// Peak compute-device bytes of one pair of `entries` x `columns`.
    pub fn peak_bytes(&self, entries: usize, columns: usize) -> usize {
        columns * self.column_cost() + entries * self.entry_cost(columns)
    }
}

/// How a product is split. Depends only on the shape and the budget, so the
/// same inputs always give the same plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    /// Number of sparse-entry batches.
    pub sparse_batches: usize,
    /// Number of dense-column batches.
    pub dense_batches: usize,
    /// Upper bound on entries in one sparse batch.
    pub entries_per_batch: usize,
    /// Upper bound on columns in one dense batch.
    pub columns_per_batch: usize,
    /// True when a single column or a single entry alone does not fit. The
    /// product still runs, one element per batch.
    pub over_budget: bool,
}

impl BatchPlan {
    /// Plan a product so that every staged pair peaks at or below
    /// `memory_budget` bytes (unless `over_budget`).
    pub fn compute(shape: &ProductShape, memory_budget: usize) -> Self {
        let column_cost = shape.column_cost().max(1);
        let fit_columns = (memory_budget / 2) / column_cost;
        let columns = fit_columns.clamp(1, shape.dim.max(1));

        let remaining = memory_budget.saturating_sub(columns * column_cost);
        let fit_entries = remaining / shape.entry_cost(columns).max(1);
        let entries = fit_entries.clamp(1, shape.nnz.max(1));

        let over_budget =
            (shape.dim > 0 && fit_columns == 0) || (shape.nnz > 0 && fit_entries == 0);

        Self {
            sparse_batches: shape.nnz.div_ceil(entries),
            dense_batches: shape.dim.div_ceil(columns),
            entries_per_batch: entries,
            columns_per_batch: columns,
            over_budget,
        }
    }

    /// Total number of staged (sparse, dense) pairs.
    pub fn pairs(&self) -> usize {
        self.sparse_batches * self.dense_batches
    }

    /// Balanced `(start, len)` of batch `index` when `total` items are split
    /// into `batches` batches.
    pub fn range(total: usize, batches: usize, index: usize) -> (usize, usize) {
        let start = index * total / batches;
        let end = (index + 1) * total / batches;
        (start, end - start)
    }
}

// ============================================================================
// BATCHED PRODUCT
// ============================================================================

/// Sparse x dense product that respects a fast-memory budget.
#[derive(Debug, Clone)]
pub struct BatchedProduct {
    device: Device,
    memory_budget: usize,
    accelerate: bool,
}

impl BatchedProduct {
    /// `device` is the fast-memory device batches are staged on.
    ///
    /// With `accelerate = false` and both operands on the host, products run
    /// directly on the host with no batching.
    pub fn new(device: Device, memory_budget: usize, accelerate: bool) -> Self {
        Self {
            device,
            memory_budget,
            accelerate,
        }
    }

    /// Host-only product with the default budget.
    pub fn host() -> Self {
        Self::new(Device::Cpu, DEFAULT_MEMORY_BUDGET, false)
    }

    /// Product for an already selected compute device.
    pub fn from_config(config: &GpuConfig, device: Device) -> Self {
        let accelerate = crate::device::is_accelerated(&device);
        Self::new(device, config.memory_budget, accelerate)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn memory_budget(&self) -> usize {
        self.memory_budget
    }

    /// Whether products stage through the fast-memory device.
    pub fn accelerates(&self) -> bool {
        self.accelerate
    }

    /// Same device and acceleration with a different budget.
    pub fn with_memory_budget(&self, memory_budget: usize) -> Self {
        Self::new(self.device.clone(), memory_budget, self.accelerate)
    }

    /// Planner view of `a * x`.
    pub fn shape(&self, a: &SparseMatrix, x: &Tensor) -> EmbedResult<ProductShape> {
        let (n, dim) = x.dims2()?;
        Ok(ProductShape {
            n,
            nnz: a.nnz(),
            entry_bytes: a.entry_bytes(),
            dim,
            elem_bytes: x.dtype().size_in_bytes(),
            sparse_resident: a.is_accelerated(),
        })
    }

    /// The plan [`BatchedProduct::multiply`] would use for these operands.
    pub fn plan(&self, a: &SparseMatrix, x: &Tensor) -> EmbedResult<BatchPlan> {
        Ok(BatchPlan::compute(&self.shape(a, x)?, self.memory_budget))
    }

    /// Compute `a * x`. The result has `x`'s dtype and lives on `x`'s device.
    ///
    /// # Errors
    /// - `UnsupportedDType` if `a` holds neither f32 nor f64 values. Checked
    ///   before any data moves.
    /// - `DimensionMismatch` if `x` does not have `a.n()` rows
    pub fn multiply(&self, a: &SparseMatrix, x: &Tensor) -> EmbedResult<Tensor> {
        a.ensure_supported_dtype()?;
        let (n, dim) = x.dims2()?;
        if n != a.n() {
            return Err(EmbedError::dimension_mismatch(a.n(), n));
        }

        let a_fast = a.is_accelerated();
        let x_fast = x.is_accelerated();
        if !self.accelerate && !a_fast && !x_fast {
            return a.matmul(x);
        }
        if dim == 0 {
            return Ok(Tensor::zeros((n, 0), x.dtype(), x.device())?);
        }

        let plan = self.plan(a, x)?;
        if plan.over_budget {
            warn!(
                memory_budget = self.memory_budget,
                "Memory budget too small for a single batch; continuing one element per batch"
            );
        }
        debug!(
            "Cooccurrence matrix using {} batches, embedding using {} batches",
            plan.sparse_batches,
            plan.dense_batches
        );

        let compute = if a_fast {
            a.device().clone()
        } else if x_fast {
            x.device().clone()
        } else {
            self.device.clone()
        };
        let output = x.device().clone();
        let begin = Instant::now();

        let mut columns = (0..plan.dense_batches)
            .map(|j| {
                let (_, len) = BatchPlan::range(dim, plan.dense_batches, j);
                Tensor::zeros((n, len), x.dtype(), &output)
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        for i in 0..plan.sparse_batches {
            let (start, len) = BatchPlan::range(a.nnz(), plan.sparse_batches, i);
            let staged_a = a.narrow(start, len)?.to_device(&compute)?;

            for (j, column) in columns.iter_mut().enumerate() {
                debug!(
                    "{} / {}\t{} / {}",
                    i, plan.sparse_batches, j, plan.dense_batches
                );
                let (start, len) = BatchPlan::range(dim, plan.dense_batches, j);
                let staged_x = x.narrow(1, start, len)?.contiguous()?.to_device(&compute)?;
                let partial = spmm(
                    staged_a.rows(),
                    staged_a.cols(),
                    staged_a.values(),
                    n,
                    &staged_x,
                )?;
                *column = column.add(&partial.to_device(&output)?)?;
            }
        }

        debug!(
            pairs = plan.pairs(),
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "Batched product finished"
        );

        if columns.len() == 1 {
            Ok(columns.remove(0))
        } else {
            Ok(Tensor::cat(&columns, 1)?)
        }
    }
}

impl Default for BatchedProduct {
    fn default() -> Self {
        Self::host()
    }
}
