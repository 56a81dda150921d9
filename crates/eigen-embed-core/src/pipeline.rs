//! Embedding pipeline: preprocess, solve, scale, normalize.
//!
//! [`EigenEmbedding`] owns the raw cooccurrence matrix (never modified), the
//! preprocessed matrix, and the current embedding. Each stage replaces the
//! embedding with a new tensor. [`run`] drives the whole pipeline from an
//! [`EmbedConfig`] and writes the output file only after every stage
//! succeeded.

use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use tracing::{debug, info};

use crate::config::EmbedConfig;
use crate::device::{place, select_device};
use crate::error::{EmbedError, EmbedResult};
use crate::io::{load_cooccurrence, write_embedding, Vocabulary};
use crate::operand::Operand;
use crate::orthonormalize::{column_norms, orthonormalize};
use crate::preprocess::{preprocess, preprocess_pruned, Preprocessing};
use crate::product::BatchedProduct;
use crate::solver::Solver;
use crate::sparse::SparseMatrix;

/// Smallest row norm used as a divisor by [`EigenEmbedding::normalize_rows`].
const ROW_NORM_FLOOR: f64 = 1e-12;

/// Random `n x dim` start with orthonormal columns.
///
/// Entries are standard normal draws from a ChaCha8 stream seeded with `seed`.
///
/// # Errors
/// - `InvalidConfiguration` if dim > n
pub fn random_embedding(n: usize, dim: usize, seed: u64) -> EmbedResult<Tensor> {
    if dim > n {
        return Err(EmbedError::invalid_configuration(format!(
            "embedding dimension {} exceeds vocabulary size {}",
            dim, n
        )));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let values: Vec<f64> = (0..n * dim)
        .map(|_| rng.sample::<f64, _>(StandardNormal))
        .collect();
    let x = Tensor::from_vec(values, (n, dim), &Device::Cpu)?;
    Ok(orthonormalize(&x, None)?.q)
}

/// State of one embedding computation.
#[derive(Debug, Clone)]
pub struct EigenEmbedding {
    cooccurrence: SparseMatrix,
    vocab: Option<Vocabulary>,
    matrix: SparseMatrix,
    embedding: Tensor,
}

impl EigenEmbedding {
    /// Start from `cooccurrence` with a random orthonormal embedding.
    ///
    /// Until [`EigenEmbedding::preprocess`] runs, the solver sees the raw
    /// counts.
    ///
    /// # Errors
    /// - `InvalidConfiguration` if dim is 0 or exceeds n
    /// - `DimensionMismatch` if `vocab` does not have n words
    pub fn new(
        cooccurrence: SparseMatrix,
        vocab: Option<Vocabulary>,
        dim: usize,
        seed: u64,
    ) -> EmbedResult<Self> {
        if dim == 0 {
            return Err(EmbedError::invalid_parameter("dim", dim, "must be > 0"));
        }
        let embedding = random_embedding(cooccurrence.n(), dim, seed)?;
        Self::with_embedding(cooccurrence, vocab, embedding)
    }

    /// Start from a caller-supplied n x dim embedding.
    ///
    /// # Errors
    /// - `DimensionMismatch` if the embedding or `vocab` do not have n rows
    /// - `InvalidConfiguration` if dim exceeds n
    pub fn with_embedding(
        cooccurrence: SparseMatrix,
        vocab: Option<Vocabulary>,
        embedding: Tensor,
    ) -> EmbedResult<Self> {
        let n = cooccurrence.n();
        let (rows, dim) = embedding.dims2()?;
        if rows != n {
            return Err(EmbedError::dimension_mismatch(n, rows));
        }
        if dim > n {
            return Err(EmbedError::invalid_configuration(format!(
                "embedding dimension {} exceeds vocabulary size {}",
                dim, n
            )));
        }
        if let Some(vocab) = &vocab {
            if vocab.len() != n {
                return Err(EmbedError::dimension_mismatch(n, vocab.len()));
            }
        }
        Ok(Self {
            matrix: cooccurrence.clone(),
            cooccurrence,
            vocab,
            embedding,
        })
    }

    /// Load the vocabulary and the cooccurrence binary, then initialize
    /// randomly.
    ///
    /// # Errors
    /// - `Io` / `MalformedFile` from either file, with its path
    /// - `InvalidConfiguration` if dim exceeds the vocabulary size
    pub fn load_from_files(
        vocab_path: impl AsRef<Path>,
        cooccurrence_path: impl AsRef<Path>,
        dim: usize,
        seed: u64,
    ) -> EmbedResult<Self> {
        let begin = Instant::now();
        let vocab = Vocabulary::load(vocab_path)?;
        let cooccurrence = load_cooccurrence(cooccurrence_path, vocab.len())?;
        let embedding = Self::new(cooccurrence, Some(vocab), dim, seed)?;
        info!(
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "Loading data took"
        );
        Ok(embedding)
    }

    pub fn n(&self) -> usize {
        self.cooccurrence.n()
    }

    pub fn dim(&self) -> usize {
        self.embedding.dims().get(1).copied().unwrap_or(0)
    }

    /// The matrix as loaded.
    pub fn cooccurrence(&self) -> &SparseMatrix {
        &self.cooccurrence
    }

    /// The matrix the solver runs on.
    pub fn matrix(&self) -> &SparseMatrix {
        &self.matrix
    }

    pub fn embedding(&self) -> &Tensor {
        &self.embedding
    }

    pub fn vocab(&self) -> Option<&Vocabulary> {
        self.vocab.as_ref()
    }

    /// Recompute the solver's matrix from the raw counts.
    ///
    /// Can be called repeatedly with different modes.
    pub fn preprocess(&mut self, mode: Preprocessing, prune_zeros: bool) -> EmbedResult<()> {
        self.matrix = if prune_zeros {
            preprocess_pruned(&self.cooccurrence, mode)?
        } else {
            preprocess(&self.cooccurrence, mode)?
        };
        Ok(())
    }

    /// Run `solver`, then scale columns by `eigenvalue ^ scale` and, if
    /// `normalize`, rescale rows to unit norm.
    ///
    /// When `product` accelerates and the matrix plus the solver state fit in
    /// half its budget, they are moved to the accelerator in one transfer
    /// before the solve and the embedding is moved back afterwards. Products
    /// then stage their temporaries within what is left of the budget.
    /// Otherwise the data stays on the host and every product stages its own
    /// batches.
    ///
    /// # Errors
    /// - `InvalidConfiguration` if the solver parameters are invalid, before
    ///   any data moves
    pub fn solve(
        &mut self,
        solver: &Solver,
        product: &BatchedProduct,
        scale: f64,
        normalize: bool,
    ) -> EmbedResult<()> {
        solver.validate()?;
        let (n, dim) = self.embedding.dims2()?;

        let momentum = if solver.uses_momentum() {
            Some(Tensor::zeros((n, dim), self.embedding.dtype(), self.embedding.device())?)
        } else {
            None
        };

        let (target, product) = self.placement(product, momentum.is_some());
        let product = &product;
        let begin = Instant::now();
        let matrix = self.matrix.to_device(&target)?;
        let start = place(&self.embedding, &target)?;
        let momentum = match momentum {
            Some(m) => Some(place(&m, &target)?),
            None => None,
        };
        if !matches!(target, Device::Cpu) {
            info!(
                elapsed_ms = begin.elapsed().as_millis() as u64,
                "GPU loading took"
            );
        }

        let outcome = solver.solve(&matrix, &start, momentum.as_ref(), product)?;
        let mut embedding = scale_by_eigenvalues(&matrix, &outcome.embedding, scale, product)?;
        if normalize {
            embedding = normalize_rows(&embedding)?;
        }

        let begin = Instant::now();
        self.embedding = place(&embedding, &Device::Cpu)?;
        if !matches!(target, Device::Cpu) {
            info!(
                elapsed_ms = begin.elapsed().as_millis() as u64,
                "CPU loading took"
            );
        }
        Ok(())
    }

    /// Multiply column `i` by `lambda_i ^ p`, with `lambda_i` estimated as the
    /// norm of column `i` of `A X`.
    pub fn scale(&mut self, p: f64, product: &BatchedProduct) -> EmbedResult<()> {
        self.embedding = scale_by_eigenvalues(&self.matrix, &self.embedding, p, product)?;
        Ok(())
    }

    /// Rescale every row to unit norm.
    pub fn normalize_rows(&mut self) -> EmbedResult<()> {
        self.embedding = normalize_rows(&self.embedding)?;
        Ok(())
    }

    /// Write the embedding, one labelled row per word.
    ///
    /// Without a vocabulary rows are labelled by their index.
    pub fn save(&self, path: impl AsRef<Path>) -> EmbedResult<()> {
        let begin = Instant::now();
        let words: Vec<String> = match &self.vocab {
            Some(vocab) => vocab.words().to_vec(),
            None => (0..self.n()).map(|i| i.to_string()).collect(),
        };
        write_embedding(path, &words, &self.embedding)?;
        info!(
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "Saving took"
        );
        Ok(())
    }

    /// Device for the coarse pre-solve transfer, and the product to solve
    /// with once the resident state is accounted for.
    fn placement(&self, product: &BatchedProduct, with_momentum: bool) -> (Device, BatchedProduct) {
        if !product.accelerates() {
            return (Device::Cpu, product.clone());
        }
        let dense = self.embedding.footprint_bytes() * if with_momentum { 3 } else { 2 };
        let needed = self.matrix.footprint_bytes() + dense;
        let budget = product.memory_budget();
        if needed <= budget / 2 {
            let product = product.with_memory_budget(budget - needed);
            (product.device().clone(), product)
        } else {
            debug!(
                needed,
                memory_budget = budget,
                "Solver state exceeds half the memory budget; keeping it on the host"
            );
            (Device::Cpu, product.clone())
        }
    }
}

/// `X * diag(norm(A X)_i ^ p)`.
///
/// Exact only when `X` holds orthonormal eigenvectors; otherwise the norms
/// are estimates.
pub fn scale_by_eigenvalues(
    a: &SparseMatrix,
    x: &Tensor,
    p: f64,
    product: &BatchedProduct,
) -> EmbedResult<Tensor> {
    let begin = Instant::now();
    let ax = product.multiply(a, x)?;
    let eigenvalues = column_norms(&ax)?;
    debug!(?eigenvalues, "Estimated eigenvalues");

    let (_, dim) = x.dims2()?;
    let factors: Vec<f64> = eigenvalues.iter().map(|v| v.powf(p)).collect();
    let factors = Tensor::from_vec(factors, (1, dim), x.device())?.to_dtype(x.dtype())?;
    let scaled = x.broadcast_mul(&factors)?;
    info!(
        elapsed_ms = begin.elapsed().as_millis() as u64,
        "Final scaling took"
    );
    Ok(scaled)
}

/// Divide each row by its Euclidean norm. Zero rows stay zero.
pub fn normalize_rows(x: &Tensor) -> EmbedResult<Tensor> {
    let (n, _) = x.dims2()?;
    let norms = x
        .sqr()?
        .sum_keepdim(1)?
        .sqrt()?
        .to_dtype(DType::F64)?
        .flatten_all()?
        .to_vec1::<f64>()?;
    let divisor: Vec<f64> = norms.iter().map(|v| v.max(ROW_NORM_FLOOR)).collect();
    let divisor = Tensor::from_vec(divisor, (n, 1), x.device())?.to_dtype(x.dtype())?;
    Ok(x.broadcast_div(&divisor)?)
}

/// Load, preprocess, solve, scale, normalize and save as configured.
///
/// The configuration is validated and the solver built before any file is
/// opened. The output file is written last.
pub fn run(config: &EmbedConfig) -> EmbedResult<EigenEmbedding> {
    config.validate()?;
    let solver = config.solver.to_solver()?;
    let device = select_device(config.gpu.enabled, config.gpu.device_id);
    let product = BatchedProduct::from_config(&config.gpu, device);
    info!(
        solver = solver.name(),
        preprocessing = %config.pipeline.preprocessing,
        dim = config.pipeline.dim,
        accelerate = product.accelerates(),
        "Computing embedding"
    );

    let mut embedding = EigenEmbedding::load_from_files(
        &config.input.vocab,
        &config.input.cooccurrence,
        config.pipeline.dim,
        config.pipeline.seed,
    )?;
    info!(n = embedding.n(), nnz = embedding.cooccurrence().nnz(), "Loaded");

    embedding.preprocess(config.pipeline.preprocessing, config.pipeline.prune_zeros)?;
    embedding.solve(
        &solver,
        &product,
        config.pipeline.scale,
        config.pipeline.normalize,
    )?;
    embedding.save(&config.input.vectors)?;
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::PowerIterationParams;

    fn diag321() -> SparseMatrix {
        SparseMatrix::from_triplets(3, vec![(0, 0, 3.0), (1, 1, 2.0), (2, 2, 1.0)]).unwrap()
    }

    fn power(iterations: usize) -> Solver {
        Solver::PowerIteration(PowerIterationParams {
            iterations,
            momentum: 0.0,
            norm_freq: 1,
        })
    }

    #[test]
    fn test_random_embedding_is_orthonormal_and_seeded() {
        let a = random_embedding(20, 4, 1).unwrap();
        let b = random_embedding(20, 4, 1).unwrap();
        assert_eq!(a.to_vec2::<f64>().unwrap(), b.to_vec2::<f64>().unwrap());
        for norm in column_norms(&a).unwrap() {
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_dim_larger_than_vocabulary_rejected() {
        let err = EigenEmbedding::new(diag321(), None, 4, 0).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_supplied_embedding_shape_checked() {
        let x = Tensor::ones((2, 1), DType::F64, &Device::Cpu).unwrap();
        assert!(matches!(
            EigenEmbedding::with_embedding(diag321(), None, x),
            Err(EmbedError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_preprocess_keeps_raw_counts() {
        let raw = SparseMatrix::from_triplets(2, vec![(0, 1, 4.0), (1, 0, 4.0)]).unwrap();
        let mut e = EigenEmbedding::new(raw, None, 1, 0).unwrap();
        e.preprocess(Preprocessing::Log1p, false).unwrap();
        e.preprocess(Preprocessing::None, false).unwrap();
        assert_eq!(
            e.matrix().to_triplets().unwrap(),
            e.cooccurrence().to_triplets().unwrap()
        );
        assert_eq!(e.cooccurrence().to_triplets().unwrap()[0].2, 4.0);
    }

    #[test]
    fn test_scale_uses_eigenvalue_power() {
        // e0 and e1 are exact eigenvectors of diag(3, 2, 1)
        let x = Tensor::new(&[[1.0f64, 0.0], [0.0, 1.0], [0.0, 0.0]], &Device::Cpu).unwrap();
        let mut e = EigenEmbedding::with_embedding(diag321(), None, x).unwrap();
        e.scale(0.5, &BatchedProduct::host()).unwrap();
        let y = e.embedding().to_vec2::<f64>().unwrap();
        assert!((y[0][0] - 3f64.sqrt()).abs() < 1e-12);
        assert!((y[1][1] - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_rows_handles_zero_rows() {
        let x = Tensor::new(&[[3.0f64, 4.0], [0.0, 0.0]], &Device::Cpu).unwrap();
        let y = normalize_rows(&x).unwrap().to_vec2::<f64>().unwrap();
        assert!((y[0][0] - 0.6).abs() < 1e-12);
        assert!((y[0][1] - 0.8).abs() < 1e-12);
        assert_eq!(y[1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_solve_scales_then_normalizes() {
        let mut e = EigenEmbedding::new(diag321(), None, 1, 3).unwrap();
        e.solve(&power(50), &BatchedProduct::host(), 0.5, true).unwrap();
        let y = e.embedding().to_vec2::<f64>().unwrap();
        assert!((y[0][0].abs() - 1.0).abs() < 1e-9);
        for row in &y {
            assert!(row[0].abs() <= 1.0 + 1e-9);
        }
        assert!(matches!(e.embedding().device(), Device::Cpu));
    }

    #[test]
    fn test_invalid_solver_rejected_before_solving() {
        let mut e = EigenEmbedding::new(diag321(), None, 1, 3).unwrap();
        let before = e.embedding().to_vec2::<f64>().unwrap();
        let bad = Solver::PowerIteration(PowerIterationParams {
            iterations: 5,
            momentum: 0.0,
            norm_freq: 0,
        });
        assert!(e.solve(&bad, &BatchedProduct::host(), 0.5, true).is_err());
        assert_eq!(e.embedding().to_vec2::<f64>().unwrap(), before);
    }

    #[test]
    fn test_placement_leaves_remaining_budget_to_products() {
        let matrix = crate::synthetic::synthetic(20, 60, 4).unwrap();
        let embedding = EigenEmbedding::new(matrix, None, 3, 0).unwrap();
        let needed =
            embedding.matrix().footprint_bytes() + 2 * embedding.embedding().footprint_bytes();

        let roomy = BatchedProduct::new(Device::Cpu, 4 * needed, true);
        let (_, solving) = embedding.placement(&roomy, false);
        assert_eq!(solving.memory_budget(), 3 * needed);

        // More than half the budget: state stays put and keeps the full budget
        let tight = BatchedProduct::new(Device::Cpu, needed, true);
        let (target, solving) = embedding.placement(&tight, false);
        assert!(matches!(target, Device::Cpu));
        assert_eq!(solving.memory_budget(), needed);

        let host = BatchedProduct::host();
        let (_, solving) = embedding.placement(&host, true);
        assert_eq!(solving.memory_budget(), host.memory_budget());
    }
}
