//! Alecton: stochastic power iteration on sampled entries.

use std::time::Instant;

use candle_core::Tensor;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::{normalizes_after, sampled_product, AlectonParams, SolveOutcome};
use crate::error::EmbedResult;
use crate::orthonormalize::orthonormalize;
use crate::product::BatchedProduct;
use crate::sparse::SparseMatrix;

pub(super) fn run(
    params: &AlectonParams,
    a: &SparseMatrix,
    x: &Tensor,
    product: &BatchedProduct,
) -> EmbedResult<SolveOutcome> {
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    // nnz / batch makes the sampled product an unbiased estimate of A x
    let step = params.eta * a.nnz() as f64 / params.batch as f64;
    let mut x = x.clone();

    for i in 0..params.iterations {
        let begin = Instant::now();
        let estimate = sampled_product(a, &x, params.batch, &mut rng, product)?;
        x = x.add(&estimate.affine(step, 0.0)?)?;

        if normalizes_after(i, params.norm_freq) {
            x = orthonormalize(&x, None)?.q;
        }
        debug!(
            iteration = i + 1,
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "Alecton step"
        );
    }

    Ok(SolveOutcome {
        embedding: x,
        momentum: None,
    })
}
