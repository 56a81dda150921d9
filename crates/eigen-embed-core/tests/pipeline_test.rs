//! End-to-end tests: files in, embedding file out.
//!
//! Every test runs on the host. Staged (accelerated) products are exercised
//! by forcing the staging path onto the CPU device.

use std::io::Write;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use eigen_embed_core::{
    read_embedding, run, synthetic, write_cooccurrence, BatchedProduct, EigenEmbedding,
    EmbedConfig, EmbedError, Preprocessing, SolverConfig, SolverMode, Vocabulary,
};

// =============================================================================
// FIXTURES
// =============================================================================

fn write_vocab(path: &Path, lines: &[&str]) {
    let mut file = std::fs::File::create(path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
}

/// Ring of `n` words where neighbours cooccur, plus self counts.
fn write_ring_corpus(dir: &Path, n: usize) -> EmbedConfig {
    let vocab = dir.join("vocab.txt");
    let cooc = dir.join("cooccurrence.bin");
    let words: Vec<String> = (0..n).map(|i| format!("w{} {}", i, 100 - i)).collect();
    let refs: Vec<&str> = words.iter().map(String::as_str).collect();
    write_vocab(&vocab, &refs);

    let mut records = Vec::new();
    for i in 0..n as i32 {
        let j = (i + 1) % n as i32;
        records.push((i + 1, j + 1, 3.0 + i as f64));
        records.push((j + 1, i + 1, 3.0 + i as f64));
        records.push((i + 1, i + 1, 1.0));
    }
    write_cooccurrence(&cooc, &records).unwrap();

    let mut config = EmbedConfig::default();
    config.input.vocab = vocab;
    config.input.cooccurrence = cooc;
    config.input.vectors = dir.join("vectors.txt");
    config.pipeline.dim = 3;
    config.gpu.enabled = false;
    config.solver.iterations = 20;
    config
}

// =============================================================================
// FILE SCENARIOS
// =============================================================================

#[test]
fn test_two_word_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let vocab_path = dir.path().join("vocab.txt");
    let cooc_path = dir.path().join("cooc.bin");
    write_vocab(&vocab_path, &["cat 10", "dog 5"]);
    write_cooccurrence(&cooc_path, &[(1, 2, 4.0), (2, 1, 4.0)]).unwrap();

    let mut embedding = EigenEmbedding::load_from_files(&vocab_path, &cooc_path, 1, 0).unwrap();
    let raw = embedding.cooccurrence().to_dense().unwrap().to_vec2::<f64>().unwrap();
    assert_eq!(raw, vec![vec![0.0, 4.0], vec![4.0, 0.0]]);
    assert_eq!(embedding.vocab().unwrap().words(), &["cat", "dog"]);

    embedding.preprocess(Preprocessing::Ppmi, false).unwrap();
    let ppmi = embedding.matrix().to_dense().unwrap().to_vec2::<f64>().unwrap();
    assert_eq!(ppmi[0][1], ppmi[1][0]);
    assert!(ppmi[0][1] > 0.0);
    assert_eq!(ppmi[0][0], 0.0);
    assert_eq!(ppmi[1][1], 0.0);

    println!("[PASS] cat/dog matrix is symmetric before and after PPMI");
}

#[test]
fn test_vocabulary_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let vocab_path = dir.path().join("vocab.txt");
    let cooc_path = dir.path().join("cooc.bin");
    write_vocab(&vocab_path, &["cat 10", "dog 5"]);
    write_cooccurrence(&cooc_path, &[(1, 3, 1.0)]).unwrap();

    let err = EigenEmbedding::load_from_files(&vocab_path, &cooc_path, 1, 0).unwrap_err();
    assert!(matches!(err, EmbedError::MalformedFile { .. }));
    assert!(err.to_string().contains("cooc.bin"));
}

// =============================================================================
// FULL RUNS
// =============================================================================

#[test]
fn test_run_writes_one_line_per_word() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_ring_corpus(dir.path(), 12);
    let embedding = run(&config).unwrap();

    let (words, vectors) = read_embedding(&config.input.vectors).unwrap();
    assert_eq!(words.len(), 12);
    assert_eq!(words[0], "w0");
    assert_eq!(vectors.dims2().unwrap(), (12, 3));

    // Written text parses back to the in-memory result
    let diff = vectors
        .sub(embedding.embedding())
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f64>()
        .unwrap();
    assert!(diff < 1e-12, "diff {}", diff);

    // Rows are unit length after normalization
    let norms = vectors.sqr().unwrap().sum(1).unwrap().to_vec1::<f64>().unwrap();
    for norm in norms {
        assert!((norm - 1.0).abs() < 1e-9, "norm {}", norm);
    }
    println!("[PASS] run() wrote a normalized 12 x 3 embedding");
}

#[test]
fn test_every_solver_runs_end_to_end() {
    for mode in SolverMode::all() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_ring_corpus(dir.path(), 10);
        config.solver.mode = *mode;
        config.solver.batch = 16;
        config.solver.inner_loop = 2;
        config.solver.iterations = 5;
        config.solver.eta = 0.1;
        config.solver.momentum = match mode {
            SolverMode::PowerIteration | SolverMode::VarianceReduced => -0.1,
            _ => 0.0,
        };

        let embedding = run(&config).unwrap();
        let values = embedding
            .embedding()
            .flatten_all()
            .unwrap()
            .to_vec1::<f64>()
            .unwrap();
        assert!(values.iter().all(|v| v.is_finite()), "{} produced non-finite values", mode);
        assert!(config.input.vectors.exists());
        println!("[PASS] {} finished with finite output", mode);
    }
}

#[test]
fn test_zero_norm_freq_fails_before_reading_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EmbedConfig::default();
    // Files do not exist: a configuration error proves nothing was read
    config.input.vocab = dir.path().join("missing-vocab.txt");
    config.input.cooccurrence = dir.path().join("missing.bin");
    config.input.vectors = dir.path().join("vectors.txt");
    config.solver.norm_freq = 0;

    let err = run(&config).unwrap_err();
    assert!(err.is_configuration_error(), "got {:?}", err);
    assert!(!config.input.vectors.exists());
}

#[test]
fn test_failed_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_ring_corpus(dir.path(), 4);
    // dim > n is only detectable after loading
    config.pipeline.dim = 5;
    assert!(run(&config).is_err());
    assert!(!config.input.vectors.exists());
}

// =============================================================================
// SOLVER PROPERTIES
// =============================================================================

#[test]
fn test_power_iteration_finds_dominant_direction_from_random_start() {
    let matrix = eigen_embed_core::SparseMatrix::from_triplets(
        3,
        vec![(0, 0, 3.0), (1, 1, 2.0), (2, 2, 1.0)],
    )
    .unwrap();
    let start = eigen_embed_core::pipeline::random_embedding(3, 1, 42).unwrap();
    let solver = SolverConfig::default().to_solver().unwrap();
    let out = solver
        .solve(&matrix, &start, None, &BatchedProduct::host())
        .unwrap();
    let v = out.embedding.flatten_all().unwrap().to_vec1::<f64>().unwrap();
    let cosine = v[0].abs() / v.iter().map(|x| x * x).sum::<f64>().sqrt();
    assert!(cosine > 0.99, "cosine {}", cosine);
}

#[test]
fn test_staged_solve_matches_host_solve() {
    let matrix = synthetic(50, 400, 8).unwrap();
    let vocab = Vocabulary::from_pairs((0..50).map(|i| (format!("w{}", i), 1)));
    let solver = SolverConfig {
        iterations: 10,
        ..Default::default()
    }
    .to_solver()
    .unwrap();

    let mut host = EigenEmbedding::new(matrix.clone(), Some(vocab.clone()), 4, 1).unwrap();
    host.preprocess(Preprocessing::Log1p, false).unwrap();
    host.solve(&solver, &BatchedProduct::host(), 0.5, true).unwrap();

    // 2 KiB budget forces many entry and column batches
    let staged_product = BatchedProduct::new(Device::Cpu, 2048, true);
    let mut staged = EigenEmbedding::new(matrix, Some(vocab), 4, 1).unwrap();
    staged.preprocess(Preprocessing::Log1p, false).unwrap();
    staged.solve(&solver, &staged_product, 0.5, true).unwrap();

    let diff = host
        .embedding()
        .sub(staged.embedding())
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f64>()
        .unwrap();
    assert!(diff < 1e-6, "diff {}", diff);
}

#[test]
fn test_f32_matrix_solves_into_f64_embedding() {
    let matrix = synthetic(20, 80, 2).unwrap();
    let matrix = matrix
        .with_values(matrix.values().to_dtype(DType::F32).unwrap())
        .unwrap();
    let mut embedding = EigenEmbedding::new(matrix, None, 2, 0).unwrap();
    let solver = SolverConfig::default().to_solver().unwrap();
    embedding
        .solve(&solver, &BatchedProduct::host(), 0.5, false)
        .unwrap();
    assert_eq!(embedding.embedding().dtype(), DType::F64);
}

#[test]
fn test_supplied_embedding_is_used() {
    let matrix = synthetic(6, 10, 5).unwrap();
    let start = Tensor::ones((6, 2), DType::F64, &Device::Cpu).unwrap();
    let embedding = EigenEmbedding::with_embedding(matrix, None, start.clone()).unwrap();
    assert_eq!(
        embedding.embedding().to_vec2::<f64>().unwrap(),
        start.to_vec2::<f64>().unwrap()
    );
}
