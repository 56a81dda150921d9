//! eigen-embed command-line driver
//!
//! # Usage
//!
//! ```bash
//! # Defaults: vocab.txt + cooccurrence.shuf.bin -> vectors.txt, 50 dims, PPMI, power iteration
//! eigen-embed compute
//!
//! # Variance-reduced solver with momentum, 100 dimensions
//! eigen-embed compute -d 100 -s vr -m 0.5 -b 200000 -j 20
//!
//! # Settings from a TOML file, with a flag override
//! eigen-embed compute --config embed.toml --iterations 10
//!
//! # Host only, per-iteration logging
//! eigen-embed compute -g false --verbose
//! ```
//!
//! Flags > environment (`EIGEN_EMBED_*`) > config file > defaults.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use eigen_embed_core::{EmbedConfig, Preprocessing, SolverMode};

#[derive(Parser, Debug)]
#[command(name = "eigen-embed")]
#[command(about = "Word embeddings from the top eigenvectors of a cooccurrence matrix")]
struct Cli {
    /// Log every solver iteration and batch.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute an embedding from a vocabulary and a cooccurrence binary.
    Compute(ComputeArgs),
}

/// Flags left unset keep the value from the config file (or the default).
#[derive(Args, Debug, Default)]
struct ComputeArgs {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dimension of the embedding.
    #[arg(short = 'd', long)]
    dim: Option<usize>,

    /// Vocabulary file.
    #[arg(short = 'v', long)]
    vocab: Option<PathBuf>,

    /// Cooccurrence binary.
    #[arg(short = 'c', long)]
    cooccurrence: Option<PathBuf>,

    /// Output file for the embedding vectors.
    #[arg(short = 'o', long)]
    vectors: Option<PathBuf>,

    /// Preprocessing of the cooccurrence matrix: none, log1p, ppmi.
    #[arg(short = 'p', long)]
    preprocessing: Option<String>,

    /// Solver: pi, alecton, vr, sgd.
    #[arg(short = 's', long)]
    solver: Option<String>,

    /// Solver iterations.
    #[arg(short = 'i', long)]
    iterations: Option<usize>,

    /// Learning rate (alecton, sgd).
    #[arg(short = 'e', long)]
    eta: Option<f64>,

    /// Momentum weight (pi, vr). 0 disables momentum.
    #[arg(short = 'm', long, allow_hyphen_values = true)]
    momentum: Option<f64>,

    /// Orthonormalize every N steps.
    #[arg(short = 'f', long = "normfreq", allow_hyphen_values = true)]
    norm_freq: Option<i64>,

    /// Sampled entries per stochastic step.
    #[arg(short = 'b', long)]
    batch: Option<usize>,

    /// Inner-loop steps of the variance-reduced solver.
    #[arg(short = 'j', long = "innerloop")]
    inner_loop: Option<usize>,

    /// Column i is scaled by lambda_i ^ scale.
    #[arg(long, allow_hyphen_values = true)]
    scale: Option<f64>,

    /// Normalize each word vector to unit length.
    #[arg(short = 'n', long)]
    normalize: Option<bool>,

    /// Use the GPU when available.
    #[arg(short = 'g', long)]
    gpu: Option<bool>,

    /// Bytes of GPU memory the batched product may stage at once.
    #[arg(long)]
    memory_budget: Option<usize>,

    /// Seed for the initial embedding and batch sampling.
    #[arg(long)]
    seed: Option<u64>,
}

impl ComputeArgs {
    /// Load the config file (or defaults), apply environment, then flags.
    fn to_config(&self) -> Result<EmbedConfig> {
        let config = match &self.config {
            Some(path) => EmbedConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => EmbedConfig::default(),
        };
        let mut config = config.with_env_overrides();

        if let Some(v) = &self.vocab {
            config.input.vocab = v.clone();
        }
        if let Some(v) = &self.cooccurrence {
            config.input.cooccurrence = v.clone();
        }
        if let Some(v) = &self.vectors {
            config.input.vectors = v.clone();
        }
        if let Some(v) = self.dim {
            config.pipeline.dim = v;
        }
        if let Some(v) = &self.preprocessing {
            config.pipeline.preprocessing = v.parse::<Preprocessing>()?;
        }
        if let Some(v) = self.scale {
            config.pipeline.scale = v;
        }
        if let Some(v) = self.normalize {
            config.pipeline.normalize = v;
        }
        if let Some(v) = &self.solver {
            config.solver.mode = v.parse::<SolverMode>()?;
        }
        if let Some(v) = self.iterations {
            config.solver.iterations = v;
        }
        if let Some(v) = self.eta {
            config.solver.eta = v;
        }
        if let Some(v) = self.momentum {
            config.solver.momentum = v;
        }
        if let Some(v) = self.norm_freq {
            config.solver.norm_freq = v;
        }
        if let Some(v) = self.batch {
            config.solver.batch = v;
        }
        if let Some(v) = self.inner_loop {
            config.solver.inner_loop = v;
        }
        if let Some(v) = self.gpu {
            config.gpu.enabled = v;
        }
        if let Some(v) = self.memory_budget {
            config.gpu.memory_budget = v;
        }
        if let Some(v) = self.seed {
            config.pipeline.seed = v;
            config.solver.seed = v;
        }
        Ok(config)
    }
}

fn compute(args: &ComputeArgs) -> Result<()> {
    let config = args.to_config()?;
    let begin = Instant::now();
    eigen_embed_core::run(&config)?;
    info!(
        vectors = %config.input.vectors.display(),
        elapsed_ms = begin.elapsed().as_millis() as u64,
        "Embedding written"
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let result = match &cli.command {
        Commands::Compute(args) => compute(args),
    };
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ComputeArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Compute(args) => args,
        }
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse(&[
            "eigen-embed", "compute", "-d", "8", "-s", "vr", "-p", "log1p", "-f", "2", "-g",
            "false", "-m", "-0.5",
        ]);
        let config = args.to_config().unwrap();
        assert_eq!(config.pipeline.dim, 8);
        assert_eq!(config.solver.mode, SolverMode::VarianceReduced);
        assert_eq!(config.pipeline.preprocessing, Preprocessing::Log1p);
        assert_eq!(config.solver.norm_freq, 2);
        assert!(!config.gpu.enabled);
        assert_eq!(config.solver.momentum, -0.5);
    }

    #[test]
    fn test_unset_flags_keep_defaults() {
        let config = parse(&["eigen-embed", "compute"]).to_config().unwrap();
        assert_eq!(config.pipeline.dim, 50);
        assert_eq!(config.solver.batch, 100_000);
    }

    #[test]
    fn test_unknown_solver_rejected() {
        let args = parse(&["eigen-embed", "compute", "-s", "lanczos"]);
        assert!(args.to_config().is_err());
    }
}
