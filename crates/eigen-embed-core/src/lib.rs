//! Word embeddings from the top eigenvectors of a cooccurrence matrix.
//!
//! The cooccurrence matrix is preprocessed (raw, `log1p`, or PPMI), then an
//! iterative eigensolver finds its dominant eigenspace. Columns are scaled by
//! a power of their eigenvalues and rows are optionally normalized.
//!
//! # Architecture
//!
//! - **SparseMatrix**: coordinate-format matrix on candle tensors
//! - **BatchedProduct**: sparse x dense product under a fast-memory budget
//! - **orthonormalize**: QR with a normalize-only fallback
//! - **Solver**: power iteration, Alecton, variance-reduced, SGD
//! - **EigenEmbedding**: preprocess, solve, scale, normalize, save
//!
//! # Example
//!
//! ```
//! use eigen_embed_core::{synthetic, BatchedProduct, EigenEmbedding, Preprocessing, SolverConfig};
//!
//! let matrix = synthetic(100, 500, 0).unwrap();
//! let mut embedding = EigenEmbedding::new(matrix, None, 5, 0).unwrap();
//! embedding.preprocess(Preprocessing::Ppmi, false).unwrap();
//!
//! let solver = SolverConfig::default().to_solver().unwrap();
//! embedding.solve(&solver, &BatchedProduct::host(), 0.5, true).unwrap();
//! assert_eq!(embedding.embedding().dims(), &[100, 5]);
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod io;
pub mod operand;
pub mod orthonormalize;
pub mod pipeline;
pub mod preprocess;
pub mod product;
pub mod solver;
pub mod sparse;
pub mod synthetic;

pub use config::{
    EmbedConfig, GpuConfig, InputConfig, PipelineConfig, SolverConfig, SolverMode,
    DEFAULT_MEMORY_BUDGET,
};
pub use device::{is_accelerated, select_device};
pub use error::{EmbedError, EmbedResult};
pub use io::{load_cooccurrence, read_embedding, write_cooccurrence, write_embedding, Vocabulary};
pub use operand::{Operand, OperandKind};
pub use orthonormalize::{orthonormalize, Orthonormalized};
pub use pipeline::{run, EigenEmbedding};
pub use preprocess::{preprocess, Preprocessing};
pub use product::{BatchPlan, BatchedProduct, ProductShape};
pub use solver::{
    AlectonParams, PowerIterationParams, SgdParams, SolveOutcome, Solver, VarianceReducedParams,
};
pub use sparse::SparseMatrix;
pub use synthetic::synthetic;
