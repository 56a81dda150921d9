//! Synthetic cooccurrence matrices for tests and benchmarks.

use std::time::Instant;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use tracing::info;

use crate::error::{EmbedError, EmbedResult};
use crate::sparse::SparseMatrix;

/// Random non-negative symmetric `n x n` matrix.
///
/// Draws `nnz` coordinates uniformly, each with value `|N(0, 1)|`, and stores
/// every draw at both `(i, j)` and `(j, i)`. After coalescing the matrix holds
/// at most `2 * nnz` entries. The same seed always gives the same matrix.
///
/// # Errors
/// - `InvalidConfiguration` if n is 0 and nnz is not
pub fn synthetic(n: usize, nnz: usize, seed: u64) -> EmbedResult<SparseMatrix> {
    let begin = Instant::now();
    if n == 0 && nnz > 0 {
        return Err(EmbedError::invalid_configuration(
            "cannot place entries in a 0 x 0 matrix",
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut triplets = Vec::with_capacity(2 * nnz);
    for _ in 0..nnz {
        let row = rng.gen_range(0..n);
        let col = rng.gen_range(0..n);
        let value: f64 = rng.sample::<f64, _>(StandardNormal).abs();
        triplets.push((row, col, value));
        if row != col {
            triplets.push((col, row, value));
        }
    }
    let matrix = SparseMatrix::from_triplets(n, triplets)?;

    info!(
        n,
        nnz = matrix.nnz(),
        elapsed_ms = begin.elapsed().as_millis() as u64,
        "Generating synthetic data"
    );
    Ok(matrix)
}
