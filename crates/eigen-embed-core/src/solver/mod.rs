//! Iterative eigensolvers for the dominant eigenspace of a sparse matrix.
//!
//! Each solver is a bounded loop: the iteration count is the only stopping
//! rule. Products go through [`BatchedProduct`], so the matrix never has to
//! fit in fast memory; stochastic solvers gather their sampled entries where
//! the matrix lives and stage only the sample.
//!
//! # Solvers
//!
//! | Variant | Step | Momentum |
//! |---------|------|----------|
//! | `PowerIteration` | `Y = A X + beta X_prev` | yes |
//! | `Alecton` | `X += eta (nnz / b) A_S X` | no |
//! | `VarianceReduced` | anchored estimate of `A X`, then as power iteration | yes |
//! | `Sgd` | `X += eta A_S X` | no |
//!
//! `A_S` is `A` restricted to `b` entries drawn uniformly with replacement.

mod alecton;
mod power;
mod sgd;
mod vr;

use std::time::Instant;

use candle_core::Tensor;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::error::{EmbedError, EmbedResult};
use crate::product::BatchedProduct;
use crate::sparse::SparseMatrix;

/// Parameters of deterministic power iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerIterationParams {
    pub iterations: usize,
    /// Weight of the previous iterate. 0 disables the momentum buffer.
    pub momentum: f64,
    pub norm_freq: usize,
}

/// Parameters of stochastic power iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct AlectonParams {
    pub iterations: usize,
    pub eta: f64,
    pub norm_freq: usize,
    pub batch: usize,
    pub seed: u64,
}

/// Parameters of variance-reduced stochastic power iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceReducedParams {
    /// Outer iterations; each computes one exact anchor product.
    pub iterations: usize,
    pub momentum: f64,
    pub norm_freq: usize,
    pub batch: usize,
    /// Stochastic steps per anchor.
    pub inner_loop: usize,
    pub seed: u64,
}

/// Parameters of the biased stochastic gradient solver.
#[derive(Debug, Clone, PartialEq)]
pub struct SgdParams {
    pub iterations: usize,
    pub eta: f64,
    pub norm_freq: usize,
    pub batch: usize,
    pub seed: u64,
}

/// The available eigensolvers, each with its own parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Solver {
    PowerIteration(PowerIterationParams),
    Alecton(AlectonParams),
    VarianceReduced(VarianceReducedParams),
    Sgd(SgdParams),
}

/// Final iterate and, for momentum solvers, the matching momentum buffer.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub embedding: Tensor,
    pub momentum: Option<Tensor>,
}

impl Solver {
    pub fn name(&self) -> &'static str {
        match self {
            Solver::PowerIteration(_) => "power-iteration",
            Solver::Alecton(_) => "alecton",
            Solver::VarianceReduced(_) => "variance-reduced",
            Solver::Sgd(_) => "sgd",
        }
    }

    pub fn norm_freq(&self) -> usize {
        match self {
            Solver::PowerIteration(p) => p.norm_freq,
            Solver::Alecton(p) => p.norm_freq,
            Solver::VarianceReduced(p) => p.norm_freq,
            Solver::Sgd(p) => p.norm_freq,
        }
    }

    /// Momentum weight, or 0 for solvers without momentum.
    pub fn momentum(&self) -> f64 {
        match self {
            Solver::PowerIteration(p) => p.momentum,
            Solver::VarianceReduced(p) => p.momentum,
            Solver::Alecton(_) | Solver::Sgd(_) => 0.0,
        }
    }

    /// True when this solver keeps a momentum buffer.
    pub fn uses_momentum(&self) -> bool {
        self.momentum() != 0.0
    }

    /// Check the parameters. Runs before any product.
    ///
    /// # Errors
    /// - `InvalidConfiguration` if norm_freq is 0
    /// - `InvalidConfiguration` if a stochastic batch or the inner loop is 0
    pub fn validate(&self) -> EmbedResult<()> {
        if self.norm_freq() == 0 {
            return Err(EmbedError::invalid_parameter(
                "norm_freq",
                0,
                "must be a positive integer",
            ));
        }
        let batch = match self {
            Solver::PowerIteration(_) => None,
            Solver::Alecton(p) => Some(p.batch),
            Solver::VarianceReduced(p) => Some(p.batch),
            Solver::Sgd(p) => Some(p.batch),
        };
        if batch == Some(0) {
            return Err(EmbedError::invalid_parameter("batch", 0, "must be > 0"));
        }
        if let Solver::VarianceReduced(p) = self {
            if p.inner_loop == 0 {
                return Err(EmbedError::invalid_parameter("inner_loop", 0, "must be > 0"));
            }
        }
        Ok(())
    }

    /// Run the solver on `a` from the initial embedding `x` (n x dim).
    ///
    /// `momentum` seeds the buffer of momentum solvers; when it is `None` and
    /// the weight is non-zero the buffer starts at zero. Solvers without
    /// momentum ignore it. The result lives on `x`'s device.
    ///
    /// # Errors
    /// - `InvalidConfiguration` for invalid parameters or dim > n, before any
    ///   product
    /// - `DimensionMismatch` if `x` or `momentum` do not have the right shape
    /// - `UnsupportedDType` if `a` holds neither f32 nor f64 values
    pub fn solve(
        &self,
        a: &SparseMatrix,
        x: &Tensor,
        momentum: Option<&Tensor>,
        product: &BatchedProduct,
    ) -> EmbedResult<SolveOutcome> {
        self.validate()?;
        let (n, dim) = x.dims2()?;
        if n != a.n() {
            return Err(EmbedError::dimension_mismatch(a.n(), n));
        }
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
        a.ensure_supported_dtype()?;

        let begin = Instant::now();
        let outcome = match self {
            Solver::PowerIteration(p) => power::run(p, a, x, momentum, product)?,
            Solver::Alecton(p) => alecton::run(p, a, x, product)?,
            Solver::VarianceReduced(p) => vr::run(p, a, x, momentum, product)?,
            Solver::Sgd(p) => sgd::run(p, a, x, product)?,
        };
        info!(
            solver = self.name(),
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "Solver took"
        );
        Ok(outcome)
    }
}

/// Initial momentum buffer: the caller's, zeros when none was given, or
/// absent when the weight is 0.
fn initial_momentum(x: &Tensor, given: Option<&Tensor>, beta: f64) -> EmbedResult<Option<Tensor>> {
    if beta == 0.0 {
        return Ok(None);
    }
    match given {
        Some(m) => Ok(Some(m.to_device(x.device())?.to_dtype(x.dtype())?)),
        None => Ok(Some(x.zeros_like()?)),
    }
}

/// `y + beta * prev`, or `y` when there is no buffer.
fn add_momentum(y: Tensor, prev: Option<&Tensor>, beta: f64) -> EmbedResult<Tensor> {
    match prev {
        Some(prev) => Ok(y.add(&prev.affine(beta, 0.0)?)?),
        None => Ok(y),
    }
}

/// True when step `step` (0-based) ends with an orthonormalization.
fn normalizes_after(step: usize, norm_freq: usize) -> bool {
    (step + 1) % norm_freq == 0
}

/// `A_S * x` for `batch` entries of `a` drawn uniformly with replacement.
///
/// The gather runs on `a`'s device; only the sample is staged by `product`.
/// The partial product is not rescaled.
fn sampled_product(
    a: &SparseMatrix,
    x: &Tensor,
    batch: usize,
    rng: &mut ChaCha8Rng,
    product: &BatchedProduct,
) -> EmbedResult<Tensor> {
    let nnz = a.nnz();
    if nnz == 0 {
        return Ok(x.zeros_like()?);
    }
    let positions: Vec<usize> = (0..batch).map(|_| rng.gen_range(0..nnz)).collect();
    let sample = a.select_positions(&positions)?;
    product.multiply(&sample, x)
}
