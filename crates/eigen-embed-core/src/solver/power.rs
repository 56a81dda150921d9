//! Power iteration with optional momentum.

use std::time::Instant;

use candle_core::Tensor;
use tracing::debug;

use super::{add_momentum, initial_momentum, normalizes_after, PowerIterationParams, SolveOutcome};
use crate::error::EmbedResult;
use crate::orthonormalize::orthonormalize;
use crate::product::BatchedProduct;
use crate::sparse::SparseMatrix;

pub(super) fn run(
    params: &PowerIterationParams,
    a: &SparseMatrix,
    x: &Tensor,
    momentum: Option<&Tensor>,
    product: &BatchedProduct,
) -> EmbedResult<SolveOutcome> {
    let beta = params.momentum;
    let mut x = x.clone();
    let mut prev = initial_momentum(&x, momentum, beta)?;

    for i in 0..params.iterations {
        let begin = Instant::now();
        let y = add_momentum(product.multiply(a, &x)?, prev.as_ref(), beta)?;
        // Momentum tracks the iterate that was just multiplied
        if prev.is_some() {
            prev = Some(x);
        }
        x = y;

        if normalizes_after(i, params.norm_freq) {
            let step = orthonormalize(&x, prev.as_ref())?;
            x = step.q;
            prev = step.momentum;
        }
        debug!(
            iteration = i + 1,
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "Power iteration step"
        );
    }

    Ok(SolveOutcome {
        embedding: x,
        momentum: prev,
    })
}
