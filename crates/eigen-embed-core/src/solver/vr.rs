//! Variance-reduced stochastic power iteration.
//!
//! Each outer iteration fixes an anchor `X~` and computes `G = A X~` exactly.
//! Inner steps estimate `A X` as
//!
//! ```text
//! W = X~^T X
//! E = (nnz / b) A_S (X - X~ W) + G W
//! ```
//!
//! Only the part of `X` that has moved away from the anchor is sampled, so the
//! variance shrinks as the iterate settles. `E` is unbiased for any anchor.

use std::time::Instant;

use candle_core::Tensor;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::{
    add_momentum, initial_momentum, normalizes_after, sampled_product, SolveOutcome,
    VarianceReducedParams,
};
use crate::error::EmbedResult;
use crate::orthonormalize::orthonormalize;
use crate::product::BatchedProduct;
use crate::sparse::SparseMatrix;

pub(super) fn run(
    params: &VarianceReducedParams,
    a: &SparseMatrix,
    x: &Tensor,
    momentum: Option<&Tensor>,
    product: &BatchedProduct,
) -> EmbedResult<SolveOutcome> {
    let beta = params.momentum;
    let scale = a.nnz() as f64 / params.batch as f64;
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut x = x.clone();
    let mut prev = initial_momentum(&x, momentum, beta)?;
    let mut step = 0usize;

    for i in 0..params.iterations {
        let begin = Instant::now();
        let anchor = x.clone();
        let anchor_t = anchor.t()?.contiguous()?;
        let exact = product.multiply(a, &anchor)?;

        for _ in 0..params.inner_loop {
            let w = anchor_t.matmul(&x)?;
            let residual = x.sub(&anchor.matmul(&w)?)?;
            let correction = sampled_product(a, &residual, params.batch, &mut rng, product)?;
            let estimate = correction.affine(scale, 0.0)?.add(&exact.matmul(&w)?)?;

            let y = add_momentum(estimate, prev.as_ref(), beta)?;
            if prev.is_some() {
                prev = Some(x);
            }
            x = y;

            if normalizes_after(step, params.norm_freq) {
                let out = orthonormalize(&x, prev.as_ref())?;
                x = out.q;
                prev = out.momentum;
            }
            step += 1;
        }
        debug!(
            iteration = i + 1,
            inner_steps = params.inner_loop,
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "Variance-reduced outer step"
        );
    }

    Ok(SolveOutcome {
        embedding: x,
        momentum: prev,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::Solver;
    use super::*;

    fn solver(iterations: usize, momentum: f64, batch: usize, inner_loop: usize) -> Solver {
        Solver::VarianceReduced(VarianceReducedParams {
            iterations,
            momentum,
            norm_freq: 1,
            batch,
            inner_loop,
            seed: 11,
        })
    }

    #[test]
    fn test_converges_on_diagonal() {
        let out = solver(10, 0.0, 30, 5)
            .solve(&diag321(), &start(), None, &BatchedProduct::host())
            .unwrap();
        assert!(cosine_with_e0(&out.embedding) > 0.99);
        assert!(out.momentum.is_none());
    }

    #[test]
    fn test_first_inner_step_is_exact() {
        // At the anchor the residual is zero, so the estimate is G W = A X.
        let x = orthonormalize(&start(), None).unwrap().q;
        let vr = solver(1, 0.0, 2, 1)
            .solve(&diag321(), &x, None, &BatchedProduct::host())
            .unwrap();
        let pi = Solver::PowerIteration(super::super::PowerIterationParams {
            iterations: 1,
            momentum: 0.0,
            norm_freq: 1,
        })
        .solve(&diag321(), &x, None, &BatchedProduct::host())
        .unwrap();
        let a = vr.embedding.flatten_all().unwrap().to_vec1::<f64>().unwrap();
        let b = pi.embedding.flatten_all().unwrap().to_vec1::<f64>().unwrap();
        for (u, v) in a.iter().zip(b.iter()) {
            assert!((u - v).abs() < 1e-9);
        }
    }

    #[test]
    fn test_momentum_buffer_returned() {
        let out = solver(5, -0.5, 30, 4)
            .solve(&diag321(), &start(), None, &BatchedProduct::host())
            .unwrap();
        assert!(out.momentum.is_some());
        assert!(cosine_with_e0(&out.embedding) > 0.9);
    }
}
