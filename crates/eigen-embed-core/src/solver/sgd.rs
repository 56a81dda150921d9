//! Stochastic gradient steps on sampled entries.
//!
//! The sampled product is not rescaled by `nnz / batch`, so each step follows
//! a biased estimate of `A X`. The bias only changes the effective step size.

use std::time::Instant;

use candle_core::Tensor;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::{normalizes_after, sampled_product, SgdParams, SolveOutcome};
use crate::error::EmbedResult;
use crate::orthonormalize::orthonormalize;
use crate::product::BatchedProduct;
use crate::sparse::SparseMatrix;

pub(super) fn run(
    params: &SgdParams,
    a: &SparseMatrix,
    x: &Tensor,
    product: &BatchedProduct,
) -> EmbedResult<SolveOutcome> {
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut x = x.clone();

    for i in 0..params.iterations {
        let begin = Instant::now();
        let gradient = sampled_product(a, &x, params.batch, &mut rng, product)?;
        x = x.add(&gradient.affine(params.eta, 0.0)?)?;

        if normalizes_after(i, params.norm_freq) {
            x = orthonormalize(&x, None)?.q;
        }
        debug!(
            iteration = i + 1,
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "SGD step"
        );
    }

    Ok(SolveOutcome {
        embedding: x,
        momentum: None,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::Solver;
    use super::*;

    fn solver(iterations: usize, eta: f64, norm_freq: usize, batch: usize) -> Solver {
        Solver::Sgd(SgdParams {
            iterations,
            eta,
            norm_freq,
            batch,
            seed: 21,
        })
    }

    #[test]
    fn test_converges_on_diagonal() {
        let out = solver(200, 0.01, 1, 300)
            .solve(&diag321(), &start(), None, &BatchedProduct::host())
            .unwrap();
        assert!(cosine_with_e0(&out.embedding) > 0.95);
        assert!(out.momentum.is_none());
    }

    #[test]
    fn test_zero_step_keeps_iterate_between_normalizations() {
        let x = start();
        let out = solver(3, 0.0, 10, 5)
            .solve(&diag321(), &x, None, &BatchedProduct::host())
            .unwrap();
        assert_eq!(
            out.embedding.to_vec2::<f64>().unwrap(),
            x.to_vec2::<f64>().unwrap()
        );
    }
}
